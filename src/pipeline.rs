//! The codebook pipeline: convert, seed, cluster, dump.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{debug, info, warn};

use crate::config::RunConfig;
use crate::error::Result;
use crate::kmeans::KMeans;
use crate::report::{save_report, summarize, write_assignments};
use crate::sampling::initial_centroids;
use crate::store::VectorStore;
use crate::utils::{as_matrix, write_vecs};

/// Binary sequence file of the parsed vectors.
pub const SEQUENCE_FILE: &str = "input-serial";
/// Initial centroids, fvecs.
pub const INITIAL_CLUSTERS_FILE: &str = "clusters-0.fvecs";
/// Final centroids, fvecs.
pub const CODEBOOK_FILE: &str = "codebook.fvecs";
/// Cluster report.
pub const REPORT_FILE: &str = "clusters-final.txt";
/// `id<TAB>cluster` of every vector.
pub const ASSIGNMENT_FILE: &str = "clustered-points.txt";

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// number of input vectors
    pub n_vector: usize,
    /// dimension of the vectors
    pub dim: usize,
    /// number of clusters
    pub n_cluster: usize,
    /// number of k-means iterations
    pub iterations: u32,
    /// whether k-means converged before the iteration cap
    pub converged: bool,
    /// within-cluster sum of squared distances
    pub inertia: f64,
    /// output directory
    pub output: PathBuf,
}

/// Sibling directory the outputs are written to before they replace `output`.
fn staging_dir(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "codebook".to_string());
    output.with_file_name(format!(".{}.tmp-{}", name, std::process::id()))
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn build(config: &RunConfig, dir: &Path) -> Result<RunSummary> {
    info!("preparing input from {}", config.input.display());
    let start = Instant::now();
    let parsed = VectorStore::read_text(&config.input)?;
    let sequence = dir.join(SEQUENCE_FILE);
    parsed.save(&sequence)?;
    drop(parsed);
    let store = VectorStore::load(&sequence)?;
    debug!(
        "converted {} vectors of dimension {} in {} s",
        store.len(),
        store.dim(),
        start.elapsed().as_secs_f32()
    );

    let kmeans = KMeans::new(
        config.n_cluster,
        config.max_iter,
        config.tolerance,
        config.distance,
    )?
    .with_parallel(config.parallel);

    info!(
        "running {} seed to get {} initial clusters",
        config.init, config.n_cluster
    );
    let centroids = initial_centroids(
        &store,
        config.n_cluster as usize,
        config.init,
        config.seed,
    )?;
    write_vecs(
        &dir.join(INITIAL_CLUSTERS_FILE),
        &as_matrix(&centroids, store.dim()),
    )?;

    info!("running k-means with {} distance", config.distance);
    let clustering = kmeans.fit(&store, &centroids)?;
    if clustering.converged {
        info!("k-means converged after {} iterations", clustering.iterations);
    } else {
        warn!(
            "k-means stopped at the iteration cap ({}) before converging",
            clustering.iterations
        );
    }

    info!("dumping clusters");
    let summaries = summarize(&store, &clustering);
    save_report(&dir.join(REPORT_FILE), &summaries)?;
    write_assignments(
        std::io::BufWriter::new(fs::File::create(dir.join(ASSIGNMENT_FILE))?),
        &store,
        &clustering,
    )?;
    write_vecs(
        &dir.join(CODEBOOK_FILE),
        &as_matrix(&clustering.centroids, clustering.dim),
    )?;

    Ok(RunSummary {
        n_vector: store.len(),
        dim: store.dim(),
        n_cluster: clustering.n_cluster(),
        iterations: clustering.iterations,
        converged: clustering.converged,
        inertia: clustering.inertia,
        output: config.output.clone(),
    })
}

/// Run the whole pipeline.
///
/// The outputs are staged next to the output directory and moved into place only when
/// every file is written, a failed run leaves no output behind.
pub fn run(config: &RunConfig) -> Result<RunSummary> {
    config.validate()?;
    if let Some(parent) = config.output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let staging = staging_dir(&config.output);
    if staging.exists() {
        remove_path(&staging)?;
    }
    fs::create_dir(&staging)?;

    let summary = match build(config, &staging) {
        Ok(summary) => summary,
        Err(err) => {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                warn!("failed to remove {}: {}", staging.display(), cleanup);
            }
            return Err(err);
        }
    };

    if config.output.exists() {
        debug!("replace the existing {}", config.output.display());
        remove_path(&config.output)?;
    }
    fs::rename(&staging, &config.output)?;
    Ok(summary)
}
