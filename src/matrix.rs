//! Bit-packed matrices over GF(2)
//!
//! Elements are single bits stored row-major in 64-bit words. Row `r` occupies
//! `words_per_row = ceil(cols / 64)` consecutive words and element `(r, c)` is bit
//! `c % 64` of word `r * words_per_row + c / 64`.
//!
//! # Example
//!
//! ```
//! use gf2mm::BitMatrix;
//!
//! let mut m = BitMatrix::new(2, 70);
//! m.set(1, 69, true);
//! assert!(m.get(1, 69));
//! assert!(!m.get(0, 69));
//! assert_eq!(m.words_per_row(), 2);
//! ```

use std::fmt;

use rand::Rng;

use crate::transpose::transpose_words;
use crate::{Gf2Error, Result};

/// Bits per storage word
pub const WORD_BITS: usize = 64;

/// Number of 64-bit words needed to hold `cols` bits
#[inline]
pub const fn words_for(cols: usize) -> usize {
    cols.div_ceil(WORD_BITS)
}

/// Mask of the valid bits in the last word of a row of `cols` bits
#[inline]
pub(crate) const fn tail_mask(cols: usize) -> u64 {
    match cols % WORD_BITS {
        0 => u64::MAX,
        used => (1u64 << used) - 1,
    }
}

/// A dense matrix over GF(2) with bit-packed row-major storage
///
/// Bits beyond `cols` in the last word of each row are always zero, so two
/// matrices are equal exactly when their shapes and words are equal.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BitMatrix {
    rows: usize,
    cols: usize,
    words_per_row: usize,
    data: Vec<u64>,
}

impl BitMatrix {
    /// Creates a zero matrix of the given shape
    ///
    /// # Example
    ///
    /// ```
    /// use gf2mm::BitMatrix;
    ///
    /// let m = BitMatrix::new(3, 4);
    /// assert_eq!(m.shape(), (3, 4));
    /// assert!(m.is_zero());
    /// ```
    pub fn new(rows: usize, cols: usize) -> Self {
        let words_per_row = words_for(cols);
        Self {
            rows,
            cols,
            words_per_row,
            data: vec![0; rows * words_per_row],
        }
    }

    /// Alias for [`BitMatrix::new`]
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::new(rows, cols)
    }

    /// Creates the `n×n` identity matrix
    pub fn identity(n: usize) -> Self {
        let mut m = Self::new(n, n);
        for i in 0..n {
            m.set(i, i, true);
        }
        m
    }

    /// Creates a matrix by evaluating `f(row, col)` for every element
    pub fn from_fn<F>(rows: usize, cols: usize, mut f: F) -> Self
    where
        F: FnMut(usize, usize) -> bool,
    {
        let mut m = Self::new(rows, cols);
        for r in 0..rows {
            for c in 0..cols {
                if f(r, c) {
                    m.set(r, c, true);
                }
            }
        }
        m
    }

    /// Creates a matrix from rows of 0/1 values (any nonzero value is a one)
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the rows have different lengths.
    ///
    /// # Example
    ///
    /// ```
    /// use gf2mm::BitMatrix;
    ///
    /// let m = BitMatrix::from_rows(&[[1, 0, 1], [0, 1, 1]]).unwrap();
    /// assert_eq!(m.shape(), (2, 3));
    /// assert!(m.get(0, 2));
    /// ```
    pub fn from_rows<R: AsRef<[u8]>>(rows: &[R]) -> Result<Self> {
        let cols = rows.first().map_or(0, |row| row.as_ref().len());
        let mut m = Self::new(rows.len(), cols);
        for (r, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != cols {
                return Err(Gf2Error::InvalidInput(format!(
                    "Row {} has {} columns, expected {}",
                    r,
                    row.len(),
                    cols
                )));
            }
            for (c, &value) in row.iter().enumerate() {
                if value != 0 {
                    m.set(r, c, true);
                }
            }
        }
        Ok(m)
    }

    /// Creates a matrix from packed row-major words
    ///
    /// Padding bits beyond `cols` are cleared.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `words.len() != rows * ceil(cols / 64)`.
    pub fn from_words(rows: usize, cols: usize, words: Vec<u64>) -> Result<Self> {
        let words_per_row = words_for(cols);
        if words.len() != rows * words_per_row {
            return Err(Gf2Error::InvalidInput(format!(
                "Word count {} does not match a {}x{} matrix (expected {})",
                words.len(),
                rows,
                cols,
                rows * words_per_row
            )));
        }
        let mut m = Self {
            rows,
            cols,
            words_per_row,
            data: words,
        };
        m.clear_padding();
        Ok(m)
    }

    /// Creates a uniformly random matrix using the thread RNG
    pub fn random(rows: usize, cols: usize) -> Self {
        let mut m = Self::new(rows, cols);
        m.random_fill();
        m
    }

    /// Creates a uniformly random matrix from the given RNG
    pub fn random_with<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Self {
        let mut m = Self::new(rows, cols);
        m.random_fill_with(rng);
        m
    }

    /// Overwrites every element with a uniformly random bit (thread RNG)
    pub fn random_fill(&mut self) {
        self.random_fill_with(&mut rand::thread_rng());
    }

    /// Overwrites every element with a uniformly random bit drawn from `rng`
    pub fn random_fill_with<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for word in &mut self.data {
            *word = rng.gen();
        }
        self.clear_padding();
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Number of 64-bit words per row
    pub fn words_per_row(&self) -> usize {
        self.words_per_row
    }

    /// Reads element `(row, col)`; out-of-range coordinates read as `false`
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> bool {
        if row >= self.rows || col >= self.cols {
            return false;
        }
        let word = self.data[row * self.words_per_row + col / WORD_BITS];
        (word >> (col % WORD_BITS)) & 1 == 1
    }

    /// Writes element `(row, col)`; out-of-range coordinates are ignored
    #[inline]
    pub fn set(&mut self, row: usize, col: usize, bit: bool) {
        if row >= self.rows || col >= self.cols {
            return;
        }
        let word = &mut self.data[row * self.words_per_row + col / WORD_BITS];
        let mask = 1u64 << (col % WORD_BITS);
        if bit {
            *word |= mask;
        } else {
            *word &= !mask;
        }
    }

    /// Returns the `cols × rows` transpose
    ///
    /// # Example
    ///
    /// ```
    /// use gf2mm::BitMatrix;
    ///
    /// let m = BitMatrix::from_rows(&[[1, 1, 0]]).unwrap();
    /// let t = m.transpose();
    /// assert_eq!(t.shape(), (3, 1));
    /// assert!(t.get(1, 0));
    /// assert_eq!(t.transpose(), m);
    /// ```
    pub fn transpose(&self) -> BitMatrix {
        let words = transpose_words(&self.data, self.rows, self.cols);
        BitMatrix {
            rows: self.cols,
            cols: self.rows,
            words_per_row: words_for(self.rows),
            data: words,
        }
    }

    /// Packed words of one row
    ///
    /// # Panics
    ///
    /// Panics if `row >= self.rows()`.
    pub fn row_words(&self, row: usize) -> &[u64] {
        let start = row * self.words_per_row;
        &self.data[start..start + self.words_per_row]
    }

    /// All packed words, row-major
    pub fn as_words(&self) -> &[u64] {
        &self.data
    }

    /// Number of one bits
    pub fn count_ones(&self) -> usize {
        self.data.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// True if every element is zero
    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|&w| w == 0)
    }

    /// Renders at most `max_rows × max_cols` elements, eliding the rest with `...`
    ///
    /// # Example
    ///
    /// ```
    /// use gf2mm::BitMatrix;
    ///
    /// let m = BitMatrix::identity(3);
    /// assert_eq!(m.preview(2, 2), "GF(2) Matrix 3x3:\n1 0 ...\n0 1 ...\n...\n");
    /// ```
    pub fn preview(&self, max_rows: usize, max_cols: usize) -> String {
        let rows_shown = self.rows.min(max_rows);
        let cols_shown = self.cols.min(max_cols);
        let mut out = format!("GF(2) Matrix {}x{}:\n", self.rows, self.cols);

        for r in 0..rows_shown {
            let cells: Vec<&str> = (0..cols_shown)
                .map(|c| if self.get(r, c) { "1" } else { "0" })
                .collect();
            out.push_str(&cells.join(" "));
            if cols_shown < self.cols {
                out.push_str(" ...");
            }
            out.push('\n');
        }
        if rows_shown < self.rows {
            out.push_str("...\n");
        }
        out
    }

    /// Replaces the contents with `words` (same layout), clearing padding
    pub(crate) fn overwrite_words(&mut self, words: &[u64]) {
        debug_assert_eq!(words.len(), self.data.len());
        self.data.copy_from_slice(words);
        self.clear_padding();
    }

    fn clear_padding(&mut self) {
        if self.words_per_row == 0 {
            return;
        }
        let mask = tail_mask(self.cols);
        if mask == u64::MAX {
            return;
        }
        let last = self.words_per_row - 1;
        for row in self.data.chunks_exact_mut(self.words_per_row) {
            row[last] &= mask;
        }
    }
}

impl fmt::Display for BitMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in 0..self.rows {
            for c in 0..self.cols {
                f.write_str(if self.get(r, c) { "1" } else { "0" })?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl fmt::Debug for BitMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitMatrix")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("ones", &self.count_ones())
            .finish()?;
        if self.rows > 0 && self.cols > 0 {
            write!(f, "\n{}", self.preview(8, 32))?;
        }
        Ok(())
    }
}
