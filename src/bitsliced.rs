//! Bit-sliced CPU multiplication
//!
//! B is transposed once so that output `(i, j)` is the parity of the AND of two
//! contiguous packed rows: row `i` of A and row `j` of Bᵀ. The row pair is reduced by
//! the selected [`CpuBackend`].

use crate::backends::{parity, CpuBackend};
use crate::multiplier::MatrixMultiply;
use crate::{BitMatrix, Gf2Error, Result};

/// Vectorized multiplier over transposed rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitslicedMultiplier {
    backend: CpuBackend,
}

impl Default for BitslicedMultiplier {
    fn default() -> Self {
        Self::new()
    }
}

impl BitslicedMultiplier {
    /// Multiplier using the widest backend this CPU supports
    pub fn new() -> Self {
        Self {
            backend: CpuBackend::select_best(),
        }
    }

    /// Multiplier pinned to a specific backend
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the CPU does not support `backend`.
    pub fn with_backend(backend: CpuBackend) -> Result<Self> {
        if !backend.is_supported() {
            return Err(Gf2Error::unavailable(
                backend.name(),
                "instruction set not supported by this CPU",
            ));
        }
        Ok(Self { backend })
    }

    /// Backend in use
    pub fn backend(&self) -> CpuBackend {
        self.backend
    }
}

impl MatrixMultiply for BitslicedMultiplier {
    fn name(&self) -> &str {
        "simd"
    }

    fn multiply(&self, a: &BitMatrix, b: &BitMatrix) -> Result<BitMatrix> {
        if a.cols() != b.rows() {
            return Err(Gf2Error::dimension_mismatch(a.shape(), b.shape()));
        }

        let b_t = b.transpose();
        let mut result = BitMatrix::new(a.rows(), b.cols());

        // Rows of A and Bᵀ both span the shared dimension, so they have the same
        // word count and zero padding.
        for i in 0..a.rows() {
            let a_row = a.row_words(i);
            for j in 0..b.cols() {
                let folded = self.backend.and_xor_fold(a_row, b_t.row_words(j));
                result.set(i, j, parity(folded));
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ReferenceMultiplier;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_every_supported_backend_matches_reference() {
        let mut rng = StdRng::seed_from_u64(2024);
        for (m, k, n) in [(1, 1, 1), (7, 64, 5), (13, 65, 9), (4, 300, 70), (3, 0, 4)] {
            let a = BitMatrix::random_with(m, k, &mut rng);
            let b = BitMatrix::random_with(k, n, &mut rng);
            let expected = ReferenceMultiplier.multiply(&a, &b).unwrap();
            for backend in CpuBackend::supported() {
                let multiplier = BitslicedMultiplier::with_backend(backend).unwrap();
                assert_eq!(
                    multiplier.multiply(&a, &b).unwrap(),
                    expected,
                    "{backend} on {m}x{k} × {k}x{n}"
                );
            }
        }
    }

    #[test]
    fn test_unsupported_backend_rejected() {
        for backend in CpuBackend::ALL {
            let result = BitslicedMultiplier::with_backend(backend);
            if backend.is_supported() {
                assert_eq!(result.unwrap().backend(), backend);
            } else {
                assert!(matches!(
                    result.unwrap_err(),
                    Gf2Error::BackendUnavailable { .. }
                ));
            }
        }
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = BitslicedMultiplier::new()
            .multiply(&BitMatrix::new(2, 3), &BitMatrix::new(2, 3))
            .unwrap_err();
        assert!(matches!(err, Gf2Error::DimensionMismatch { .. }));
    }
}
