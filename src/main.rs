use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use argh::FromArgs;
use codebook::config::{
    DEFAULT_MAX_ITER, DEFAULT_N_CLUSTER, DEFAULT_SEED, DEFAULT_TOLERANCE, RunConfig,
};
use codebook::distance::Distance;
use codebook::pipeline::run;
use codebook::sampling::Init;
use log::{error, info};

/// Build a vector quantization codebook with K-means.
#[derive(FromArgs, Debug)]
struct Args {
    /// text file with one whitespace-separated vector per line
    #[argh(option)]
    input: PathBuf,
    /// output directory (replaced if it exists)
    #[argh(option)]
    output: PathBuf,
    /// number of clusters
    #[argh(option, default = "DEFAULT_N_CLUSTER")]
    n_cluster: u32,
    /// stop once no centroid moves farther than this
    #[argh(option, default = "DEFAULT_TOLERANCE")]
    tolerance: f32,
    /// max number of iterations
    #[argh(option, default = "DEFAULT_MAX_ITER")]
    max_iter: u32,
    /// seed of the centroid initialization
    #[argh(option, default = "DEFAULT_SEED")]
    seed: u64,
    /// distance metric: euclidean, squared-euclidean or manhattan
    #[argh(option, default = "Distance::Euclidean")]
    distance: Distance,
    /// centroid initialization: random or kmeans++
    #[argh(option, default = "Init::Random")]
    init: Init,
    /// assign vectors on the current thread only
    #[argh(switch)]
    single_thread: bool,
}

impl From<Args> for RunConfig {
    fn from(args: Args) -> Self {
        RunConfig {
            input: args.input,
            output: args.output,
            n_cluster: args.n_cluster,
            tolerance: args.tolerance,
            max_iter: args.max_iter,
            seed: args.seed,
            distance: args.distance,
            init: args.init,
            parallel: !args.single_thread,
        }
    }
}

fn main() -> ExitCode {
    let args: Args = argh::from_env();
    logforth::stderr().apply();

    info!("args: {:?}", args);
    let config = RunConfig::from(args);
    let start = Instant::now();
    match run(&config) {
        Ok(summary) => {
            info!(
                "built {} centroids from {} vectors of dimension {} into {}",
                summary.n_cluster,
                summary.n_vector,
                summary.dim,
                summary.output.display()
            );
            info!("job finished in {} seconds", start.elapsed().as_secs_f32());
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{}", err);
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}
