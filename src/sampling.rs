//! Pick the initial centroids.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use aligned_vec::AVec;
use log::debug;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};

use crate::distance::squared_euclidean;
use crate::error::{CodebookError, Result};
use crate::store::VectorStore;
use crate::utils::ALIGN;

/// How the initial centroids are chosen.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum Init {
    /// uniform sampling without replacement
    #[default]
    Random,
    /// k-means++ (D² weighted sampling)
    KMeansPlusPlus,
}

impl FromStr for Init {
    type Err = CodebookError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(Init::Random),
            "kmeans++" | "k-means++" | "kmeanspp" => Ok(Init::KMeansPlusPlus),
            other => Err(CodebookError::Usage(format!("unknown init `{}`", other))),
        }
    }
}

impl fmt::Display for Init {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Init::Random => f.write_str("random"),
            Init::KMeansPlusPlus => f.write_str("kmeans++"),
        }
    }
}

/// Check that `n_cluster` seeds can be drawn from `store`.
fn check_population(store: &VectorStore, n_cluster: usize) -> Result<()> {
    if n_cluster == 0 {
        return Err(CodebookError::DegenerateInput(
            "number of clusters must be greater than 0".to_string(),
        ));
    }
    if store.is_empty() {
        return Err(CodebookError::DegenerateInput(
            "cannot seed centroids from an empty population".to_string(),
        ));
    }
    if store.len() < n_cluster {
        return Err(CodebookError::InsufficientData {
            population: store.len(),
            n_cluster,
        });
    }
    Ok(())
}

/// Bitwise key of a vector, with `-0.0` folded into `0.0`.
fn vector_key(vec: &[f32]) -> Vec<u32> {
    vec.iter().map(|&x| (x + 0.0).to_bits()).collect()
}

/// Pick `n_cluster` vectors uniformly at random without replacement.
///
/// The picked vectors are pairwise distinct unless the population holds fewer than
/// `n_cluster` distinct vectors, in which case duplicates fill the remaining seeds.
/// Returns the store indices of the seeds.
pub fn random_seed_indices(
    store: &VectorStore,
    n_cluster: usize,
    seed: u64,
) -> Result<Vec<usize>> {
    check_population(store, n_cluster)?;
    let mut rng = StdRng::seed_from_u64(seed);

    // a prefix of a random permutation is a uniform sample without replacement
    let permutation = index::sample(&mut rng, store.len(), store.len());
    let mut seen = HashSet::with_capacity(n_cluster);
    let mut picked = Vec::with_capacity(n_cluster);
    let mut duplicates = Vec::new();
    for i in permutation.iter() {
        if picked.len() == n_cluster {
            break;
        }
        if seen.insert(vector_key(store.vector(i))) {
            picked.push(i);
        } else if duplicates.len() < n_cluster {
            duplicates.push(i);
        }
    }
    if picked.len() < n_cluster {
        debug!(
            "only {} distinct vectors for {} clusters, reuse duplicates",
            picked.len(),
            n_cluster
        );
        let missing = n_cluster - picked.len();
        picked.extend(duplicates.into_iter().take(missing));
    }
    Ok(picked)
}

/// Pick `n_cluster` seeds with k-means++.
///
/// The first seed is uniform, each next one is drawn with a probability proportional to
/// its squared distance to the closest seed so far. Returns the store indices of the seeds.
pub fn kmeans_plus_plus_indices(
    store: &VectorStore,
    n_cluster: usize,
    seed: u64,
) -> Result<Vec<usize>> {
    check_population(store, n_cluster)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let num = store.len();

    let mut picked = Vec::with_capacity(n_cluster);
    let mut chosen = vec![false; num];
    let first = rng.random_range(0..num);
    picked.push(first);
    chosen[first] = true;

    let mut nearest: Vec<f32> = (0..num)
        .map(|i| squared_euclidean(store.vector(i), store.vector(first)))
        .collect();
    while picked.len() < n_cluster {
        let total: f64 = nearest.iter().map(|&d| d as f64).sum();
        let next = if total > 0.0 {
            let target = rng.random::<f64>() * total;
            let mut acc = 0.0;
            let mut next = None;
            for (i, &d) in nearest.iter().enumerate() {
                if d <= 0.0 {
                    continue;
                }
                acc += d as f64;
                next = Some(i);
                if acc > target {
                    break;
                }
            }
            next
        } else {
            None
        };
        // every remaining vector duplicates a seed, fall back to a uniform pick
        let next = match next {
            Some(i) => i,
            None => {
                let rest: Vec<usize> = (0..num).filter(|&i| !chosen[i]).collect();
                rest[rng.random_range(0..rest.len())]
            }
        };
        picked.push(next);
        chosen[next] = true;
        let centroid = store.vector(next);
        for (i, d) in nearest.iter_mut().enumerate() {
            *d = d.min(squared_euclidean(store.vector(i), centroid));
        }
    }
    Ok(picked)
}

/// Gather the seed vectors into one continuous buffer.
pub fn gather(store: &VectorStore, indices: &[usize]) -> AVec<f32> {
    AVec::from_iter(
        ALIGN,
        indices.iter().flat_map(|&i| store.vector(i).iter().copied()),
    )
}

/// Initial centroids for `store` with the selected strategy.
pub fn initial_centroids(
    store: &VectorStore,
    n_cluster: usize,
    init: Init,
    seed: u64,
) -> Result<AVec<f32>> {
    let indices = match init {
        Init::Random => random_seed_indices(store, n_cluster, seed)?,
        Init::KMeansPlusPlus => kmeans_plus_plus_indices(store, n_cluster, seed)?,
    };
    Ok(gather(store, &indices))
}
