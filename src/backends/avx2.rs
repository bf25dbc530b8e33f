//! AVX2 backend implementation (x86_64 advanced SIMD)
//!
//! Processes four 64-bit words per step in a 256-bit register, folds the two
//! 128-bit halves together and then the two remaining lanes.
//!
//! # Safety
//!
//! All AVX2 intrinsics are marked `unsafe` by Rust. Entry is guarded by runtime
//! feature detection in [`CpuBackend`](super::CpuBackend).

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

use super::FoldBackend;

/// AVX2 backend (256-bit SIMD for x86_64)
pub struct Avx2Backend;

impl FoldBackend for Avx2Backend {
    #[target_feature(enable = "avx2")]
    unsafe fn and_xor_fold(a: &[u64], b: &[u64]) -> u64 {
        let len = a.len();
        let mut i = 0;
        let mut acc = _mm256_setzero_si256();

        while i + 4 <= len {
            let va = _mm256_loadu_si256(a.as_ptr().add(i) as *const __m256i);
            let vb = _mm256_loadu_si256(b.as_ptr().add(i) as *const __m256i);
            acc = _mm256_xor_si256(acc, _mm256_and_si256(va, vb));
            i += 4;
        }

        let low = _mm256_castsi256_si128(acc);
        let high = _mm256_extracti128_si256::<1>(acc);
        let half = _mm_xor_si128(low, high);
        let mut lanes = [0u64; 2];
        _mm_storeu_si128(lanes.as_mut_ptr() as *mut __m128i, half);
        let mut folded = lanes[0] ^ lanes[1];

        // Remainder words
        for j in i..len {
            folded ^= a[j] & b[j];
        }
        folded
    }
}
