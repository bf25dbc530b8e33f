//! Scalar (non-SIMD) backend implementation
//!
//! Portable baseline that works on every platform. Also used for the remainder
//! words the vector backends leave over.

use super::FoldBackend;

/// Scalar backend (no SIMD)
pub struct ScalarBackend;

impl FoldBackend for ScalarBackend {
    unsafe fn and_xor_fold(a: &[u64], b: &[u64]) -> u64 {
        fold(a, b)
    }
}

/// Safe scalar fold: `XOR_i (a[i] AND b[i])`
#[inline]
pub fn fold(a: &[u64], b: &[u64]) -> u64 {
    a.iter().zip(b).fold(0, |acc, (x, y)| acc ^ (x & y))
}
