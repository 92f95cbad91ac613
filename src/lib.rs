//! Build a vector quantization codebook with seeded K-means.
//!
//! The pipeline reads whitespace-separated vectors from a text file, stores them as
//! named vectors, picks the initial centroids, runs Lloyd's algorithm and dumps the
//! final clusters.

#![forbid(missing_docs)]

pub mod config;
pub mod distance;
pub mod error;
pub mod kmeans;
pub mod pipeline;
pub mod report;
pub mod sampling;
pub mod simd;
pub mod store;
pub mod utils;

pub use error::{CodebookError, Result};
