//! K-means clustering implementation.

use std::time::Instant;

use aligned_vec::AVec;
use log::{debug, warn};
use rayon::prelude::*;

use crate::distance::{Distance, argmin, squared_euclidean};
use crate::error::{CodebookError, Result};
use crate::store::VectorStore;
use crate::utils::ALIGN;

const RAYON_BLOCK_SIZE: usize = 64;

/// Nearest centroid of `vec` and the squared Euclidean distance to it.
#[inline]
fn nearest(
    vec: &[f32],
    centroids: &[f32],
    dim: usize,
    distance: Distance,
    buf: &mut [f32],
) -> (u32, f64) {
    for (j, centroid) in centroids.chunks(dim).enumerate() {
        buf[j] = distance.rank(vec, centroid);
    }
    let label = argmin(buf);
    let sse = match distance {
        Distance::Euclidean | Distance::SquaredEuclidean => buf[label] as f64,
        Distance::Manhattan => {
            squared_euclidean(vec, &centroids[label * dim..(label + 1) * dim]) as f64
        }
    };
    (label as u32, sse)
}

/// Assign vectors to centroids in single thread.
///
/// Returns the within-cluster sum of squared Euclidean distances.
pub fn base_assign(
    vecs: &[f32],
    centroids: &[f32],
    dim: usize,
    distance: Distance,
    labels: &mut [u32],
) -> f64 {
    let mut distances = vec![f32::MAX; centroids.len() / dim];
    let mut inertia = 0.0;
    for (i, vec) in vecs.chunks(dim).enumerate() {
        let (label, sse) = nearest(vec, centroids, dim, distance, &mut distances);
        labels[i] = label;
        inertia += sse;
    }
    inertia
}

/// Assign vectors to centroids in multi-threads.
///
/// Every block of vectors is labeled independently, the labels are written back in
/// input order once all blocks are done.
pub fn base_assign_parallel(
    vecs: &[f32],
    centroids: &[f32],
    dim: usize,
    distance: Distance,
    labels: &mut [u32],
) -> f64 {
    let blocks: Vec<(Vec<u32>, f64)> = vecs
        .par_chunks(dim * RAYON_BLOCK_SIZE)
        .map(|block| {
            let mut par_labels = vec![0; block.len() / dim];
            let mut par_distances = vec![f32::MAX; centroids.len() / dim];
            let mut par_inertia = 0.0;
            for (i, v) in block.chunks(dim).enumerate() {
                let (label, sse) = nearest(v, centroids, dim, distance, &mut par_distances);
                par_labels[i] = label;
                par_inertia += sse;
            }
            (par_labels, par_inertia)
        })
        .collect();

    let mut inertia = 0.0;
    for ((block_labels, block_inertia), target) in blocks
        .iter()
        .zip(labels.chunks_mut(RAYON_BLOCK_SIZE))
    {
        target.copy_from_slice(block_labels);
        inertia += block_inertia;
    }
    inertia
}

/// Update centroids to the mean of assigned vectors.
///
/// A centroid without any member keeps its position. Returns the largest centroid
/// displacement measured with `distance` and the size of every cluster.
pub fn update_centroids(
    vecs: &[f32],
    centroids: &mut [f32],
    dim: usize,
    labels: &[u32],
    distance: Distance,
) -> (f32, Vec<usize>) {
    let mut means = vec![0.0f64; centroids.len()];
    let mut elements = vec![0usize; centroids.len() / dim];
    for (i, vec) in vecs.chunks(dim).enumerate() {
        let label = labels[i] as usize;
        elements[label] += 1;
        means[label * dim..(label + 1) * dim]
            .iter_mut()
            .zip(vec.iter())
            .for_each(|(m, &v)| *m += v as f64);
    }

    let mut shift = 0.0f32;
    let mut updated = vec![0.0f32; dim];
    for ((centroid, mean), &element) in centroids
        .chunks_mut(dim)
        .zip(means.chunks(dim))
        .zip(elements.iter())
    {
        if element == 0 {
            continue;
        }
        let divider = (element as f64).recip();
        updated
            .iter_mut()
            .zip(mean.iter())
            .for_each(|(u, &m)| *u = (m * divider) as f32);
        shift = shift.max(distance.measure(centroid, &updated));
        centroid.copy_from_slice(&updated);
    }
    (shift, elements)
}

/// Per-iteration statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationStat {
    /// within-cluster sum of squared distances of this iteration's assignment
    pub inertia: f64,
    /// largest centroid displacement caused by this iteration's update
    pub shift: f32,
}

/// Result of a K-means run.
#[derive(Debug, Clone)]
pub struct Clustering {
    /// final centroids, `n_cluster * dim` values
    pub centroids: AVec<f32>,
    /// dimension of every centroid
    pub dim: usize,
    /// cluster index of every vector, in store order
    pub labels: Vec<u32>,
    /// number of assignment & update rounds that ran
    pub iterations: u32,
    /// whether the run stopped because the centroids stopped moving
    pub converged: bool,
    /// statistics of every round
    pub history: Vec<IterationStat>,
    /// within-cluster sum of squared distances of the final assignment
    pub inertia: f64,
}

impl Clustering {
    /// Number of clusters.
    pub fn n_cluster(&self) -> usize {
        self.centroids.len() / self.dim
    }

    /// Centroid of cluster `index`.
    pub fn centroid(&self, index: usize) -> &[f32] {
        &self.centroids[index * self.dim..(index + 1) * self.dim]
    }
}

/// K-means clustering algorithm (Lloyd's iterations).
#[derive(Debug, Clone)]
pub struct KMeans {
    n_cluster: u32,
    max_iter: u32,
    tolerance: f32,
    distance: Distance,
    parallel: bool,
}

impl Default for KMeans {
    fn default() -> Self {
        Self {
            n_cluster: 1024,
            max_iter: 100,
            tolerance: 1e-3,
            distance: Distance::default(),
            parallel: true,
        }
    }
}

impl KMeans {
    /// Create a new KMeans instance.
    ///
    /// # Arguments
    ///
    /// * `n_cluster` - number of clusters
    /// * `max_iter` - max number of iterations
    /// * `tolerance` - stop when no centroid moves farther than this value
    /// * `distance` - distance metric
    pub fn new(n_cluster: u32, max_iter: u32, tolerance: f32, distance: Distance) -> Result<Self> {
        if n_cluster < 1 {
            return Err(CodebookError::DegenerateInput(
                "n_cluster must be greater than 0".to_string(),
            ));
        }
        if max_iter < 1 {
            return Err(CodebookError::Usage("max_iter must be greater than 0".to_string()));
        }
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(CodebookError::Usage(
                "tolerance must be a finite non-negative number".to_string(),
            ));
        }
        Ok(Self {
            n_cluster,
            max_iter,
            tolerance,
            distance,
            parallel: true,
        })
    }

    /// Run the assignment step on multiple threads or not.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Number of clusters.
    pub fn n_cluster(&self) -> u32 {
        self.n_cluster
    }

    /// Distance metric.
    pub fn distance(&self) -> Distance {
        self.distance
    }

    fn assign(&self, vecs: &[f32], centroids: &[f32], dim: usize, labels: &mut [u32]) -> f64 {
        if self.parallel {
            base_assign_parallel(vecs, centroids, dim, self.distance, labels)
        } else {
            base_assign(vecs, centroids, dim, self.distance, labels)
        }
    }

    /// Refine `centroids` over the vectors of `store`.
    ///
    /// `centroids` must hold exactly `n_cluster` vectors of the store's dimension.
    pub fn fit(&self, store: &VectorStore, centroids: &[f32]) -> Result<Clustering> {
        let num = store.len();
        let dim = store.dim();
        let n_cluster = self.n_cluster as usize;
        if num == 0 {
            return Err(CodebookError::DegenerateInput(
                "the population is empty".to_string(),
            ));
        }
        if centroids.len() != n_cluster * dim {
            return Err(CodebookError::DegenerateInput(format!(
                "expect {} initial centroids of dimension {}, got {} values",
                n_cluster,
                dim,
                centroids.len()
            )));
        }
        debug!("num of points: {}, num of clusters: {}", num, n_cluster);

        let vecs = store.as_slice();
        let mut centroids = AVec::<f32>::from_slice(ALIGN, centroids);
        let mut labels: Vec<u32> = vec![0; num];
        let mut history = Vec::with_capacity(self.max_iter as usize);
        let mut converged = false;

        debug!("start training");
        for i in 0..self.max_iter {
            let start_time = Instant::now();
            let inertia = self.assign(vecs, &centroids, dim, &mut labels);
            let (shift, elements) =
                update_centroids(vecs, &mut centroids, dim, &labels, self.distance);
            history.push(IterationStat { inertia, shift });
            let empty = elements.iter().filter(|&&e| e == 0).count();
            if empty != 0 {
                debug!("iter {}: {} empty clusters keep their centroids", i, empty);
            }
            debug!(
                "iter {} takes {} s, inertia {}, shift {}",
                i,
                start_time.elapsed().as_secs_f32(),
                inertia,
                shift
            );
            if shift <= self.tolerance {
                debug!("converged at iter {}", i);
                converged = true;
                break;
            }
        }
        if !converged {
            warn!("k-means did not converge within {} iterations", self.max_iter);
        }

        // classify every vector against the frozen centroids
        let inertia = self.assign(vecs, &centroids, dim, &mut labels);

        Ok(Clustering {
            centroids,
            dim,
            labels,
            iterations: history.len() as u32,
            converged,
            history,
            inertia,
        })
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    use super::*;
    use crate::sampling::{Init, initial_centroids};
    use crate::utils::as_continuous_vec;

    fn store_of(vecs: &[Vec<f32>]) -> VectorStore {
        let dim = vecs[0].len();
        let ids = (1..=vecs.len() as u64).collect();
        VectorStore::new(dim, ids, as_continuous_vec(vecs)).unwrap()
    }

    fn blobs(n_per_blob: usize, centers: &[[f32; 3]], seed: u64) -> VectorStore {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0f32, 0.5).unwrap();
        let mut vecs = Vec::new();
        for _ in 0..n_per_blob {
            for center in centers.iter() {
                vecs.push(center.iter().map(|&c| c + normal.sample(&mut rng)).collect());
            }
        }
        store_of(&vecs)
    }

    #[test]
    fn test_two_clusters() {
        let store = VectorStore::from_text(Cursor::new("0 0\n0 1\n10 0\n10 1\n")).unwrap();
        let km = KMeans::new(2, 100, 1e-3, Distance::Euclidean).unwrap();
        let result = km.fit(&store, &[0.0, 0.0, 10.0, 0.0]).unwrap();
        assert!(result.converged);
        assert!(result.iterations <= 2);
        assert_eq!(result.centroid(0), &[0.0, 0.5]);
        assert_eq!(result.centroid(1), &[10.0, 0.5]);
        assert_eq!(result.labels, vec![0, 0, 1, 1]);
        assert_eq!(result.inertia, 1.0);
    }

    #[test]
    fn test_assign_ties() {
        let vecs = [1.0, 0.0];
        let centroids = [0.0, 0.0, 2.0, 0.0, 1.0, 1.0];
        let mut labels = [9];
        base_assign(&vecs, &centroids, 2, Distance::Euclidean, &mut labels);
        assert_eq!(labels, [0]);
        base_assign_parallel(&vecs, &centroids, 2, Distance::Manhattan, &mut labels);
        assert_eq!(labels, [0]);
    }

    #[test]
    fn test_parallel_matches_single_thread() {
        let store = blobs(300, &[[0.0, 0.0, 0.0], [5.0, 5.0, 0.0], [0.0, 5.0, 5.0]], 3);
        let mut rng = StdRng::seed_from_u64(9);
        let centroids: Vec<f32> = (0..8 * 3).map(|_| rng.random::<f32>() * 5.0).collect();
        let mut single = vec![0; store.len()];
        let mut multi = vec![0; store.len()];
        for distance in [Distance::Euclidean, Distance::Manhattan] {
            let a = base_assign(store.as_slice(), &centroids, 3, distance, &mut single);
            let b = base_assign_parallel(store.as_slice(), &centroids, 3, distance, &mut multi);
            assert_eq!(single, multi);
            assert!((a - b).abs() <= 1e-6 * a.max(1.0));
        }
    }

    #[test]
    fn test_empty_cluster_keeps_centroid() {
        let vecs = [0.0, 0.0, 1.0, 1.0];
        let mut centroids = [0.0, 0.0, 100.0, 100.0];
        let labels = [0, 0];
        let (shift, elements) =
            update_centroids(&vecs, &mut centroids, 2, &labels, Distance::Euclidean);
        assert_eq!(centroids, [0.5, 0.5, 100.0, 100.0]);
        assert_eq!(elements, vec![2, 0]);
        assert!((shift - 0.5f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_kmeans_blobs() {
        let centers = [
            [0.0, 0.0, 0.0],
            [10.0, 10.0, 10.0],
            [-10.0, 10.0, 0.0],
            [10.0, -10.0, 5.0],
        ];
        let store = blobs(100, &centers, 42);
        let init = initial_centroids(&store, 4, Init::KMeansPlusPlus, 5).unwrap();
        let km = KMeans::new(4, 50, 1e-4, Distance::Euclidean).unwrap();
        let result = km.fit(&store, &init).unwrap();
        assert!(result.converged);
        assert_eq!(result.n_cluster(), 4);

        // every true center is close to one learned centroid
        for center in centers.iter() {
            let closest = (0..4)
                .map(|k| squared_euclidean(center, result.centroid(k)))
                .fold(f32::MAX, f32::min);
            assert!(closest < 0.5, "center {:?} is {} away", center, closest);
        }
        // the vectors of a blob share one label
        for (b, _) in centers.iter().enumerate() {
            let label = result.labels[b];
            assert!((0..100).all(|i| result.labels[i * centers.len() + b] == label));
        }
    }

    #[test]
    fn test_inertia_non_increasing() {
        let store = blobs(60, &[[0.0, 0.0, 0.0], [3.0, 0.0, 0.0], [0.0, 3.0, 0.0]], 7);
        for seed in 0..5 {
            let init = initial_centroids(&store, 6, Init::Random, seed).unwrap();
            let km = KMeans::new(6, 100, 0.0, Distance::Euclidean).unwrap();
            let result = km.fit(&store, &init).unwrap();
            for pair in result.history.windows(2) {
                assert!(
                    pair[1].inertia <= pair[0].inertia * (1.0 + 1e-5),
                    "seed {}: {:?}",
                    seed,
                    result.history
                );
            }
            let last = result.history.last().unwrap();
            assert!(result.inertia <= last.inertia * (1.0 + 1e-5));
        }
    }

    #[test]
    fn test_deterministic() {
        let store = blobs(50, &[[0.0, 0.0, 0.0], [4.0, 4.0, 4.0]], 1);
        let init = initial_centroids(&store, 5, Init::Random, 2).unwrap();
        let km = KMeans::new(5, 30, 1e-3, Distance::Euclidean).unwrap();
        let first = km.fit(&store, &init).unwrap();
        let second = km.clone().with_parallel(false).fit(&store, &init).unwrap();
        assert_eq!(first.labels, second.labels);
        assert_eq!(
            bytemuck::cast_slice::<f32, u8>(&first.centroids),
            bytemuck::cast_slice::<f32, u8>(&second.centroids)
        );
        assert_eq!(first.iterations, second.iterations);
    }

    #[test]
    fn test_iteration_cap() {
        let store = blobs(40, &[[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]], 4);
        let init = initial_centroids(&store, 7, Init::Random, 4).unwrap();
        let km = KMeans::new(7, 1, 0.0, Distance::Euclidean).unwrap();
        let result = km.fit(&store, &init).unwrap();
        assert_eq!(result.iterations, 1);
        assert!(!result.converged);
        assert_eq!(result.labels.len(), store.len());
    }

    #[test]
    fn test_singletons() {
        let vecs: Vec<Vec<f32>> = (0..6).map(|i| vec![i as f32 * 2.0, 1.0]).collect();
        let store = store_of(&vecs);
        let init = initial_centroids(&store, 6, Init::Random, 0).unwrap();
        let result = KMeans::new(6, 10, 1e-3, Distance::Euclidean)
            .unwrap()
            .fit(&store, &init)
            .unwrap();
        let mut labels = result.labels.clone();
        labels.sort_unstable();
        assert_eq!(labels, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(result.inertia, 0.0);
    }

    #[test]
    fn test_invalid() {
        assert!(matches!(
            KMeans::new(0, 10, 1e-3, Distance::Euclidean),
            Err(CodebookError::DegenerateInput(_))
        ));
        assert!(matches!(
            KMeans::new(2, 0, 1e-3, Distance::Euclidean),
            Err(CodebookError::Usage(_))
        ));
        assert!(matches!(
            KMeans::new(2, 10, f32::NAN, Distance::Euclidean),
            Err(CodebookError::Usage(_))
        ));
        let empty = VectorStore::from_text(Cursor::new("")).unwrap();
        let km = KMeans::new(2, 10, 1e-3, Distance::Euclidean).unwrap();
        assert!(matches!(
            km.fit(&empty, &[]),
            Err(CodebookError::DegenerateInput(_))
        ));
        let store = VectorStore::from_text(Cursor::new("1 2\n3 4\n")).unwrap();
        assert!(matches!(
            km.fit(&store, &[1.0, 2.0]),
            Err(CodebookError::DegenerateInput(_))
        ));
    }
}
