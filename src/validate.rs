//! Spot checks of a computed product
//!
//! Recomputing a full product is as expensive as the multiplication under test, so
//! these check a subset of cells against the defining formula
//! `C[i][j] = XOR_k (A[i][k] AND B[k][j])`.

use rand::Rng;

use crate::reference::reference_cell;
use crate::BitMatrix;

/// Edge of the top-left window checked by [`validate`]
pub const VALIDATION_WINDOW: usize = 10;

fn shapes_match(a: &BitMatrix, b: &BitMatrix, c: &BitMatrix) -> bool {
    a.cols() == b.rows() && c.shape() == (a.rows(), b.cols())
}

/// Check the top-left 10×10 cells of `c` against `a × b`
///
/// Returns `false` if the shapes are inconsistent.
///
/// # Example
///
/// ```
/// use gf2mm::{validate, BitMatrix};
///
/// let a = BitMatrix::identity(4);
/// assert!(validate(&a, &a, &a));
/// assert!(!validate(&a, &a, &BitMatrix::new(4, 4)));
/// ```
pub fn validate(a: &BitMatrix, b: &BitMatrix, c: &BitMatrix) -> bool {
    if !shapes_match(a, b, c) {
        return false;
    }
    let rows = a.rows().min(VALIDATION_WINDOW);
    let cols = b.cols().min(VALIDATION_WINDOW);
    (0..rows).all(|i| (0..cols).all(|j| reference_cell(a, b, i, j) == c.get(i, j)))
}

/// Check `samples` uniformly random cells of `c` against `a × b`
///
/// Returns `false` if the shapes are inconsistent.
pub fn validate_sampled<R: Rng + ?Sized>(
    a: &BitMatrix,
    b: &BitMatrix,
    c: &BitMatrix,
    samples: usize,
    rng: &mut R,
) -> bool {
    if !shapes_match(a, b, c) {
        return false;
    }
    if c.rows() == 0 || c.cols() == 0 {
        return true;
    }
    (0..samples).all(|_| {
        let i = rng.gen_range(0..c.rows());
        let j = rng.gen_range(0..c.cols());
        reference_cell(a, b, i, j) == c.get(i, j)
    })
}
