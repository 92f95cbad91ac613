//! Compute the distance between vectors.

use std::fmt;
use std::str::FromStr;

use crate::error::CodebookError;

/// Distance metrics.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum Distance {
    /// L2 distance
    #[default]
    Euclidean,
    /// L2 distance without the square root
    SquaredEuclidean,
    /// L1 distance
    Manhattan,
}

impl Distance {
    /// Distance between two vectors of the same dimension.
    #[inline]
    pub fn measure(self, lhs: &[f32], rhs: &[f32]) -> f32 {
        match self {
            Distance::Euclidean => squared_euclidean(lhs, rhs).sqrt(),
            Distance::SquaredEuclidean => squared_euclidean(lhs, rhs),
            Distance::Manhattan => native_manhattan(lhs, rhs),
        }
    }

    /// A value with the same ordering as [`Distance::measure`] that is cheaper to compute.
    ///
    /// Used to pick the nearest centroid.
    #[inline]
    pub fn rank(self, lhs: &[f32], rhs: &[f32]) -> f32 {
        match self {
            Distance::Euclidean | Distance::SquaredEuclidean => squared_euclidean(lhs, rhs),
            Distance::Manhattan => native_manhattan(lhs, rhs),
        }
    }
}

impl FromStr for Distance {
    type Err = CodebookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(Distance::Euclidean),
            "squared-euclidean" | "squared_euclidean" => Ok(Distance::SquaredEuclidean),
            "manhattan" | "l1" => Ok(Distance::Manhattan),
            other => Err(CodebookError::Usage(format!("unknown distance `{}`", other))),
        }
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Distance::Euclidean => "euclidean",
            Distance::SquaredEuclidean => "squared-euclidean",
            Distance::Manhattan => "manhattan",
        };
        f.write_str(name)
    }
}

/// Squared Euclidean distance without SIMD.
#[inline]
pub fn native_squared_euclidean(lhs: &[f32], rhs: &[f32]) -> f32 {
    lhs.iter()
        .zip(rhs.iter())
        .map(|(&l, &r)| (l - r) * (l - r))
        .sum()
}

/// Manhattan distance without SIMD.
#[inline]
pub fn native_manhattan(lhs: &[f32], rhs: &[f32]) -> f32 {
    lhs.iter().zip(rhs.iter()).map(|(&l, &r)| (l - r).abs()).sum()
}

/// Squared Euclidean distance, with SIMD if the CPU supports AVX2 & FMA.
#[inline]
pub fn squared_euclidean(lhs: &[f32], rhs: &[f32]) -> f32 {
    #[cfg(any(target_arch = "x86_64", target_arch = "x86"))]
    {
        if let Some(simd) = pulp::x86::V3::try_new() {
            return crate::simd::l2_squared_distance(simd, lhs, rhs);
        }
    }
    native_squared_euclidean(lhs, rhs)
}

/// Index of the minimum value. Ties go to the lowest index.
///
/// Returns 0 for an empty slice.
#[inline]
pub fn argmin(vec: &[f32]) -> usize {
    let mut index = 0;
    let mut minimal = f32::MAX;
    for (i, &val) in vec.iter().enumerate() {
        if val < minimal {
            minimal = val;
            index = i;
        }
    }
    index
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_measures() {
        let a = [0.0, 0.0];
        let b = [3.0, 4.0];
        assert_eq!(Distance::Euclidean.measure(&a, &b), 5.0);
        assert_eq!(Distance::SquaredEuclidean.measure(&a, &b), 25.0);
        assert_eq!(Distance::Manhattan.measure(&a, &b), 7.0);
        assert_eq!(Distance::Euclidean.measure(&b, &b), 0.0);
    }

    #[test]
    fn test_rank_keeps_order() {
        let origin = [1.0, 1.0, 1.0];
        let near = [1.5, 1.0, 0.5];
        let far = [4.0, -2.0, 1.0];
        for distance in [
            Distance::Euclidean,
            Distance::SquaredEuclidean,
            Distance::Manhattan,
        ] {
            assert!(distance.rank(&origin, &near) < distance.rank(&origin, &far));
            assert!(distance.measure(&origin, &near) < distance.measure(&origin, &far));
        }
    }

    #[test]
    fn test_argmin_ties() {
        assert_eq!(argmin(&[3.0, 1.0, 2.0, 1.0]), 1);
        assert_eq!(argmin(&[0.0, 0.0]), 0);
        assert_eq!(argmin(&[]), 0);
    }

    #[test]
    fn test_parse() {
        assert_eq!("euclidean".parse::<Distance>().unwrap(), Distance::Euclidean);
        assert_eq!("L1".parse::<Distance>().unwrap(), Distance::Manhattan);
        assert_eq!(
            Distance::SquaredEuclidean
                .to_string()
                .parse::<Distance>()
                .unwrap(),
            Distance::SquaredEuclidean
        );
        assert!(matches!(
            "cosine".parse::<Distance>(),
            Err(CodebookError::Usage(_))
        ));
    }
}
