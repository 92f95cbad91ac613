//! Accelerate with SIMD.

use core::iter;

use pulp::{Simd, as_arrays};

#[inline(always)]
fn abs2_add<S: Simd>(simd: S, x: S::f32s, acc: S::f32s) -> S::f32s {
    simd.mul_add_f32s(x, x, acc)
}

/// Compute the squared Euclidean distance between two vectors.
///
/// Code refers to <https://github.com/nmslib/hnswlib/blob/master/hnswlib/space_l2.h>
#[inline]
pub fn l2_squared_distance<S: Simd>(simd: S, lhs: &[f32], rhs: &[f32]) -> f32 {
    simd.vectorize(
        #[inline(always)]
        || {
            assert_eq!(lhs.len(), rhs.len());

            let (lhs, lhs_tail) = S::as_simd_f32s(lhs);
            let (rhs, rhs_tail) = S::as_simd_f32s(rhs);

            let (lhs2, lhs1) = as_arrays::<2, _>(lhs);
            let (rhs2, rhs1) = as_arrays::<2, _>(rhs);

            let mut sum0 = simd.splat_f32s(0.0);
            let mut sum1 = simd.splat_f32s(0.0);

            for (&[l0, l1], &[r0, r1]) in iter::zip(lhs2, rhs2) {
                sum0 = abs2_add(simd, simd.sub_f32s(l0, r0), sum0);
                sum1 = abs2_add(simd, simd.sub_f32s(l1, r1), sum1);
            }

            for (&l0, &r0) in iter::zip(lhs1, rhs1) {
                sum0 = abs2_add(simd, simd.sub_f32s(l0, r0), sum0);
            }
            {
                let l0 = simd.partial_load_f32s(lhs_tail);
                let r0 = simd.partial_load_f32s(rhs_tail);

                sum0 = abs2_add(simd, simd.sub_f32s(l0, r0), sum0);
            }

            simd.reduce_sum_f32s(simd.add_f32s(sum0, sum1))
        },
    )
}
