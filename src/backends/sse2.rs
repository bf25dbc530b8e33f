//! SSE2 backend implementation (x86_64 baseline SIMD)
//!
//! Processes two 64-bit words per step in a 128-bit register.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

use super::FoldBackend;

/// SSE2 backend (128-bit SIMD for x86_64)
pub struct Sse2Backend;

impl FoldBackend for Sse2Backend {
    #[target_feature(enable = "sse2")]
    unsafe fn and_xor_fold(a: &[u64], b: &[u64]) -> u64 {
        let len = a.len();
        let mut i = 0;
        let mut acc = _mm_setzero_si128();

        while i + 2 <= len {
            let va = _mm_loadu_si128(a.as_ptr().add(i) as *const __m128i);
            let vb = _mm_loadu_si128(b.as_ptr().add(i) as *const __m128i);
            acc = _mm_xor_si128(acc, _mm_and_si128(va, vb));
            i += 2;
        }

        let mut lanes = [0u64; 2];
        _mm_storeu_si128(lanes.as_mut_ptr() as *mut __m128i, acc);
        let mut folded = lanes[0] ^ lanes[1];

        for j in i..len {
            folded ^= a[j] & b[j];
        }
        folded
    }
}
