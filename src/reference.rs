//! Scalar reference multiplication
//!
//! The element-by-element triple loop. Every other strategy is checked against it.

use crate::multiplier::MatrixMultiply;
use crate::{BitMatrix, Gf2Error, Result};

/// Ground-truth multiplier: `C[i][j] = XOR_k (A[i][k] AND B[k][j])`
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceMultiplier;

impl ReferenceMultiplier {
    /// Create a reference multiplier
    pub fn new() -> Self {
        Self
    }
}

/// Value of one output element of `a × b`
///
/// Inputs must be dimension-compatible; out-of-range coordinates read as zero.
pub(crate) fn reference_cell(a: &BitMatrix, b: &BitMatrix, row: usize, col: usize) -> bool {
    (0..a.cols()).fold(false, |sum, k| sum ^ (a.get(row, k) & b.get(k, col)))
}

impl MatrixMultiply for ReferenceMultiplier {
    fn name(&self) -> &str {
        "serial"
    }

    fn multiply(&self, a: &BitMatrix, b: &BitMatrix) -> Result<BitMatrix> {
        if a.cols() != b.rows() {
            return Err(Gf2Error::dimension_mismatch(a.shape(), b.shape()));
        }

        let mut result = BitMatrix::new(a.rows(), b.cols());
        for i in 0..a.rows() {
            for j in 0..b.cols() {
                result.set(i, j, reference_cell(a, b, i, j));
            }
        }
        Ok(result)
    }
}
