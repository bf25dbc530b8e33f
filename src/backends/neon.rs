//! ARM NEON backend implementation (AArch64 128-bit SIMD)
//!
//! Processes two 64-bit words per step.

#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::*;

use super::FoldBackend;

/// ARM NEON backend (128-bit SIMD)
pub struct NeonBackend;

impl FoldBackend for NeonBackend {
    #[target_feature(enable = "neon")]
    unsafe fn and_xor_fold(a: &[u64], b: &[u64]) -> u64 {
        let len = a.len();
        let mut i = 0;
        let mut acc = vdupq_n_u64(0);

        while i + 2 <= len {
            let va = vld1q_u64(a.as_ptr().add(i));
            let vb = vld1q_u64(b.as_ptr().add(i));
            acc = veorq_u64(acc, vandq_u64(va, vb));
            i += 2;
        }

        let mut folded = vgetq_lane_u64::<0>(acc) ^ vgetq_lane_u64::<1>(acc);
        for j in i..len {
            folded ^= a[j] & b[j];
        }
        folded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::scalar;

    #[test]
    fn test_neon_fold_matches_scalar() {
        let a = [3u64, 5, 7, 11, 13];
        let b = [u64::MAX, 1, 6, 0, 13];
        let folded = unsafe { NeonBackend::and_xor_fold(&a, &b) };
        assert_eq!(folded, scalar::fold(&a, &b));
    }
}
