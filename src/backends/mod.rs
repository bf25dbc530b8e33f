//! Backend implementations
//!
//! The CPU backends implement the inner loop of the bit-sliced multiplier: AND two
//! packed rows word by word, XOR-accumulate in vector lanes, and fold the lanes to a
//! single word whose parity is one output bit. The `accel` module holds the device
//! abstraction and the kernels dispatched through it.
//!
//! # Safety
//!
//! All `unsafe` code is isolated within backend implementations. The public API
//! remains 100% safe: [`CpuBackend::and_xor_fold`] only enters a vector backend after
//! runtime feature detection has confirmed the CPU supports it.
//!
//! # Backends
//!
//! - `scalar`: Portable baseline implementation (no SIMD)
//! - `sse2`: x86_64 baseline SIMD (128-bit, 2 words per step)
//! - `avx2`: x86_64 advanced SIMD (256-bit, 4 words per step)
//! - `neon`: AArch64 SIMD (128-bit, 2 words per step)

pub mod accel;
pub mod scalar;

#[cfg(target_arch = "x86_64")]
pub mod sse2;

#[cfg(target_arch = "x86_64")]
pub mod avx2;

#[cfg(target_arch = "aarch64")]
pub mod neon;

use std::fmt;

/// Fold kernel shared by every CPU backend
///
/// # Safety
///
/// Implementations may use SIMD intrinsics. Callers must ensure the CPU supports the
/// backend's instruction set.
pub trait FoldBackend {
    /// Returns `XOR_i (a[i] AND b[i])`
    ///
    /// # Safety
    ///
    /// - `a` and `b` must have the same length
    /// - the CPU must support the backend's instruction set
    unsafe fn and_xor_fold(a: &[u64], b: &[u64]) -> u64;
}

/// CPU backend used by the bit-sliced multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuBackend {
    /// Portable scalar loop
    Scalar,
    /// SSE2 (x86_64 baseline)
    Sse2,
    /// AVX2 (256-bit)
    Avx2,
    /// ARM NEON
    Neon,
}

impl CpuBackend {
    /// All backends, narrowest first
    pub const ALL: [CpuBackend; 4] = [
        CpuBackend::Scalar,
        CpuBackend::Sse2,
        CpuBackend::Avx2,
        CpuBackend::Neon,
    ];

    /// Select the widest backend the running CPU supports
    pub fn select_best() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("avx2") {
                return CpuBackend::Avx2;
            }
            if is_x86_feature_detected!("sse2") {
                return CpuBackend::Sse2;
            }
        }

        #[cfg(target_arch = "aarch64")]
        {
            if std::arch::is_aarch64_feature_detected!("neon") {
                return CpuBackend::Neon;
            }
        }

        CpuBackend::Scalar
    }

    /// True if the running CPU can execute this backend
    pub fn is_supported(self) -> bool {
        match self {
            CpuBackend::Scalar => true,
            #[cfg(target_arch = "x86_64")]
            CpuBackend::Sse2 => is_x86_feature_detected!("sse2"),
            #[cfg(target_arch = "x86_64")]
            CpuBackend::Avx2 => is_x86_feature_detected!("avx2"),
            #[cfg(target_arch = "aarch64")]
            CpuBackend::Neon => std::arch::is_aarch64_feature_detected!("neon"),
            #[allow(unreachable_patterns)]
            _ => false,
        }
    }

    /// Backends the running CPU supports
    pub fn supported() -> Vec<CpuBackend> {
        Self::ALL.into_iter().filter(|b| b.is_supported()).collect()
    }

    /// Lower-case backend name
    pub fn name(self) -> &'static str {
        match self {
            CpuBackend::Scalar => "scalar",
            CpuBackend::Sse2 => "sse2",
            CpuBackend::Avx2 => "avx2",
            CpuBackend::Neon => "neon",
        }
    }

    /// `XOR_i (a[i] AND b[i])` using this backend
    ///
    /// Slices of unequal length are folded over their common prefix, like
    /// [`scalar::fold`]. Falls back to the scalar loop if this backend is not
    /// supported, so callers should check [`CpuBackend::is_supported`] when the
    /// choice matters.
    #[inline]
    pub fn and_xor_fold(self, a: &[u64], b: &[u64]) -> u64 {
        let len = a.len().min(b.len());
        let (a, b) = (&a[..len], &b[..len]);
        if !self.is_supported() {
            return scalar::fold(a, b);
        }
        // SAFETY: the instruction set was detected above and both slices were cut to
        // the same length
        unsafe {
            match self {
                #[cfg(target_arch = "x86_64")]
                CpuBackend::Sse2 => sse2::Sse2Backend::and_xor_fold(a, b),
                #[cfg(target_arch = "x86_64")]
                CpuBackend::Avx2 => avx2::Avx2Backend::and_xor_fold(a, b),
                #[cfg(target_arch = "aarch64")]
                CpuBackend::Neon => neon::NeonBackend::and_xor_fold(a, b),
                _ => scalar::ScalarBackend::and_xor_fold(a, b),
            }
        }
    }
}

impl fmt::Display for CpuBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parity of a word: the GF(2) sum of its bits
#[inline]
pub fn parity(word: u64) -> bool {
    word.count_ones() & 1 == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_scalar_always_supported() {
        assert!(CpuBackend::Scalar.is_supported());
        assert!(CpuBackend::supported().contains(&CpuBackend::Scalar));
    }

    #[test]
    fn test_select_best_is_supported() {
        let backend = CpuBackend::select_best();
        assert!(backend.is_supported());

        #[cfg(target_arch = "x86_64")]
        assert!(matches!(backend, CpuBackend::Sse2 | CpuBackend::Avx2));
    }

    #[test]
    fn test_parity() {
        assert!(!parity(0));
        assert!(parity(1));
        assert!(!parity(0b11));
        assert!(parity(u64::MAX ^ 1));
    }

    #[test]
    fn test_backends_agree_with_scalar() {
        let mut rng = StdRng::seed_from_u64(99);
        // lengths cover the empty case and every remainder after 2- and 4-word steps
        for len in 0..19 {
            let a: Vec<u64> = (0..len).map(|_| rng.gen()).collect();
            let b: Vec<u64> = (0..len).map(|_| rng.gen()).collect();
            let expected = scalar::fold(&a, &b);
            for backend in CpuBackend::supported() {
                assert_eq!(backend.and_xor_fold(&a, &b), expected, "{backend} len={len}");
            }
        }
    }

    #[test]
    fn test_unequal_lengths_fold_common_prefix() {
        // `b` is a short view into a longer allocation; words past its end must not be read
        let backing = [1u64; 8];
        let a = [u64::MAX; 4];
        let b = &backing[..1];
        for backend in CpuBackend::supported() {
            assert_eq!(backend.and_xor_fold(&a, b), 1, "{backend}");
            assert_eq!(backend.and_xor_fold(b, &a), 1, "{backend}");
            assert_eq!(backend.and_xor_fold(&a, &[]), 0, "{backend}");
        }

        let mut rng = StdRng::seed_from_u64(100);
        let long: Vec<u64> = (0..19).map(|_| rng.gen()).collect();
        let short: Vec<u64> = (0..7).map(|_| rng.gen()).collect();
        let expected = scalar::fold(&long, &short);
        for backend in CpuBackend::supported() {
            assert_eq!(backend.and_xor_fold(&long, &short), expected, "{backend}");
        }
    }

    #[test]
    fn test_names() {
        assert_eq!(CpuBackend::Avx2.to_string(), "avx2");
        assert_eq!(CpuBackend::Scalar.name(), "scalar");
    }
}
