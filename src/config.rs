//! Run configuration.

use std::path::{Path, PathBuf};

use crate::distance::Distance;
use crate::error::{CodebookError, Result};
use crate::sampling::Init;

/// Default number of clusters (codebook size).
pub const DEFAULT_N_CLUSTER: u32 = 1024;
/// Default convergence threshold on the centroid displacement.
pub const DEFAULT_TOLERANCE: f32 = 1e-3;
/// Default iteration cap.
pub const DEFAULT_MAX_ITER: u32 = 100;
/// Default seed of the centroid initialization.
pub const DEFAULT_SEED: u64 = 42;

/// Everything a run needs, fixed before the run starts.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// text file with one vector per line
    pub input: PathBuf,
    /// output directory, replaced by the run
    pub output: PathBuf,
    /// number of clusters
    pub n_cluster: u32,
    /// stop once no centroid moves farther than this
    pub tolerance: f32,
    /// max number of iterations
    pub max_iter: u32,
    /// seed of the centroid initialization
    pub seed: u64,
    /// distance metric
    pub distance: Distance,
    /// centroid initialization strategy
    pub init: Init,
    /// run the assignment step on multiple threads
    pub parallel: bool,
}

impl RunConfig {
    /// Configuration with the default parameters.
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            n_cluster: DEFAULT_N_CLUSTER,
            tolerance: DEFAULT_TOLERANCE,
            max_iter: DEFAULT_MAX_ITER,
            seed: DEFAULT_SEED,
            distance: Distance::default(),
            init: Init::default(),
            parallel: true,
        }
    }

    /// Check the parameters that do not depend on the data.
    pub fn validate(&self) -> Result<()> {
        if self.input.as_os_str().is_empty() {
            return Err(CodebookError::Usage("input path is empty".to_string()));
        }
        if self.output.as_os_str().is_empty() {
            return Err(CodebookError::Usage("output path is empty".to_string()));
        }
        // the output is replaced as a whole, it must not hold the input
        if resolve(&self.input).starts_with(resolve(&self.output)) {
            return Err(CodebookError::Usage(format!(
                "input {} lies inside the output {}",
                self.input.display(),
                self.output.display()
            )));
        }
        if self.max_iter == 0 {
            return Err(CodebookError::Usage(
                "max iterations must be greater than 0".to_string(),
            ));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(CodebookError::Usage(format!(
                "invalid tolerance {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// Absolute form of `path`, following symlinks of the parts that exist.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(path) = path.canonicalize() {
        return path;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            resolve(parent).join(name)
        }
        _ => path.to_path_buf(),
    }
}
