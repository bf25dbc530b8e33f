//! Host implementations of the device kernels
//!
//! Each function is the body of one invocation (or, for the tiled kernel, one
//! workgroup) written against flat word slices exactly as the shaders in
//! `shaders.rs` address their storage buffers. [`HostDevice`](super::HostDevice)
//! runs them over a dispatch grid.

use super::device::{KernelParams, TILE};
use crate::backends::parity;

/// Naive: XOR together the words of the B rows selected by A's set bits
pub fn naive_word(a: &[u64], b: &[u64], p: &KernelParams, row: usize, word: usize) -> u64 {
    let wpr_a = p.words_per_row_a as usize;
    let wpr_b = p.words_per_row_b as usize;
    let mut acc = 0u64;
    for k in 0..p.a_cols as usize {
        let a_word = a[row * wpr_a + k / 64];
        if (a_word >> (k % 64)) & 1 == 1 {
            acc ^= b[k * wpr_b + word];
        }
    }
    acc
}

/// Transposed: 64 parities of A's row against consecutive Bᵀ rows
pub fn transposed_word(a: &[u64], b_t: &[u64], p: &KernelParams, row: usize, word: usize) -> u64 {
    let wpr = p.words_per_row_a as usize;
    let a_row = &a[row * wpr..(row + 1) * wpr];
    let mut out = 0u64;
    for bit in 0..64 {
        let col = word * 64 + bit;
        if col >= p.b_cols as usize {
            break;
        }
        let b_row = &b_t[col * wpr..(col + 1) * wpr];
        let folded = a_row.iter().zip(b_row).fold(0u64, |acc, (x, y)| acc ^ (x & y));
        if parity(folded) {
            out |= 1 << bit;
        }
    }
    out
}

/// Vectorized: like [`transposed_word`] with four independent lane accumulators
pub fn vectorized_word(a: &[u64], b_t: &[u64], p: &KernelParams, row: usize, word: usize) -> u64 {
    let wpr = p.words_per_row_a as usize;
    let a_row = &a[row * wpr..(row + 1) * wpr];
    let mut out = 0u64;
    for bit in 0..64 {
        let col = word * 64 + bit;
        if col >= p.b_cols as usize {
            break;
        }
        let b_row = &b_t[col * wpr..(col + 1) * wpr];

        let mut lanes = [0u64; 4];
        let mut a_steps = a_row.chunks_exact(4);
        let mut b_steps = b_row.chunks_exact(4);
        for (x, y) in (&mut a_steps).zip(&mut b_steps) {
            for lane in 0..4 {
                lanes[lane] ^= x[lane] & y[lane];
            }
        }
        let mut folded = lanes[0] ^ lanes[1] ^ lanes[2] ^ lanes[3];
        for (x, y) in a_steps.remainder().iter().zip(b_steps.remainder()) {
            folded ^= x & y;
        }

        if parity(folded) {
            out |= 1 << bit;
        }
    }
    out
}

/// M4R pass 1: word `word` of table entry `entry = t * 2^k + v`
///
/// The entry is the XOR of B rows `t*k + p` for every set bit `p` of `v`; rows at
/// or beyond `a_cols` contribute nothing.
pub fn m4r_build_word(b: &[u64], p: &KernelParams, entry: usize, word: usize) -> u64 {
    let k = p.chunk_bits as usize;
    let wpr_b = p.words_per_row_b as usize;
    let table = entry >> k;
    let value = entry & ((1 << k) - 1);
    let mut acc = 0u64;
    for bit in 0..k {
        let b_row = table * k + bit;
        if (value >> bit) & 1 == 1 && b_row < p.a_cols as usize {
            acc ^= b[b_row * wpr_b + word];
        }
    }
    acc
}

/// M4R pass 2: one output word from one table lookup per k-bit chunk of A's row
pub fn m4r_multiply_word(a: &[u64], table: &[u64], p: &KernelParams, row: usize, word: usize) -> u64 {
    let k = p.chunk_bits as usize;
    let chunks_per_word = 64 / k;
    let mask = (1u64 << k) - 1;
    let wpr_a = p.words_per_row_a as usize;
    let wpr_b = p.words_per_row_b as usize;
    let mut acc = 0u64;
    for t in 0..p.num_tables as usize {
        let a_word = a[row * wpr_a + t / chunks_per_word];
        let value = ((a_word >> ((t % chunks_per_word) * k)) & mask) as usize;
        acc ^= table[((t << k) + value) * wpr_b + word];
    }
    acc
}

/// Tiled: one 16×16 workgroup
///
/// `out_rows` holds the result rows `group_x*16 ..` (at most 16 rows of
/// `words_per_row_result` words). Every invocation keeps its own accumulator; the
/// shared arrays are refilled once per shared-dimension word, with the two
/// barriers of the shader becoming phase boundaries here.
pub fn tiled_workgroup(
    a: &[u64],
    b: &[u64],
    p: &KernelParams,
    group_x: usize,
    group_y: usize,
    out_rows: &mut [u64],
) {
    let tile = TILE as usize;
    let a_rows = p.a_rows as usize;
    let a_cols = p.a_cols as usize;
    let wpr_a = p.words_per_row_a as usize;
    let wpr_b = p.words_per_row_b as usize;
    let wpr_r = p.words_per_row_result as usize;

    let mut a_tile = [0u64; 16];
    let mut b_tile = [0u64; 64 * 16];
    let mut acc = [[0u64; 16]; 16];

    for kw in 0..wpr_a {
        // phase 1: cooperative loads
        for (lx, slot) in a_tile.iter_mut().enumerate() {
            let row = group_x * tile + lx;
            *slot = if row < a_rows { a[row * wpr_a + kw] } else { 0 };
        }
        for (idx, slot) in b_tile.iter_mut().enumerate() {
            let b_row = kw * 64 + idx / tile;
            let b_word = group_y * tile + idx % tile;
            *slot = if b_row < a_cols && b_word < wpr_b {
                b[b_row * wpr_b + b_word]
            } else {
                0
            };
        }

        // phase 2: accumulate
        for (lx, row_acc) in acc.iter_mut().enumerate() {
            let mut bits = a_tile[lx];
            while bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                for (ly, word_acc) in row_acc.iter_mut().enumerate() {
                    *word_acc ^= b_tile[bit * tile + ly];
                }
                bits &= bits - 1;
            }
        }
    }

    for (lx, row_acc) in acc.iter().enumerate() {
        let row = group_x * tile + lx;
        if row >= a_rows {
            break;
        }
        for (ly, value) in row_acc.iter().enumerate() {
            let word = group_y * tile + ly;
            if word < wpr_r {
                out_rows[lx * wpr_r + word] = *value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::accel::KernelVariant;
    use crate::BitMatrix;

    fn params(variant: KernelVariant, a: &BitMatrix, b: &BitMatrix, k: u32) -> KernelParams {
        KernelParams::for_variant(variant, a.rows(), a.cols(), b.cols(), k).unwrap()
    }

    fn sample() -> (BitMatrix, BitMatrix, BitMatrix) {
        let a = BitMatrix::from_rows(&[[1, 0, 1], [0, 1, 1]]).unwrap();
        let b = BitMatrix::from_rows(&[[1, 0], [0, 1], [1, 1]]).unwrap();
        let c = BitMatrix::from_rows(&[[0, 1], [1, 0]]).unwrap();
        (a, b, c)
    }

    #[test]
    fn test_naive_word() {
        let (a, b, c) = sample();
        let p = params(KernelVariant::Naive, &a, &b, 8);
        for row in 0..2 {
            assert_eq!(naive_word(a.as_words(), b.as_words(), &p, row, 0), c.row_words(row)[0]);
        }
    }

    #[test]
    fn test_transposed_and_vectorized_words() {
        let (a, b, c) = sample();
        let b_t = b.transpose();
        let p = params(KernelVariant::Transposed, &a, &b, 8);
        for row in 0..2 {
            let expected = c.row_words(row)[0];
            assert_eq!(transposed_word(a.as_words(), b_t.as_words(), &p, row, 0), expected);
            assert_eq!(vectorized_word(a.as_words(), b_t.as_words(), &p, row, 0), expected);
        }
    }

    #[test]
    fn test_m4r_table_entries() {
        let (a, b, _) = sample();
        let p = params(KernelVariant::M4r, &a, &b, 2);
        // table 0 covers B rows 0 and 1
        assert_eq!(m4r_build_word(b.as_words(), &p, 0b00, 0), 0);
        assert_eq!(m4r_build_word(b.as_words(), &p, 0b01, 0), 0b01);
        assert_eq!(m4r_build_word(b.as_words(), &p, 0b10, 0), 0b10);
        assert_eq!(m4r_build_word(b.as_words(), &p, 0b11, 0), 0b11);
        // table 1 covers B row 2 and the nonexistent row 3
        assert_eq!(m4r_build_word(b.as_words(), &p, 4 + 0b01, 0), 0b11);
        assert_eq!(m4r_build_word(b.as_words(), &p, 4 + 0b10, 0), 0);
    }

    #[test]
    fn test_m4r_multiply_word() {
        let (a, b, c) = sample();
        let p = params(KernelVariant::M4r, &a, &b, 8);
        let table: Vec<u64> = (0..p.num_tables as usize * p.table_rows())
            .map(|entry| m4r_build_word(b.as_words(), &p, entry, 0))
            .collect();
        for row in 0..2 {
            assert_eq!(m4r_multiply_word(a.as_words(), &table, &p, row, 0), c.row_words(row)[0]);
        }
    }

    #[test]
    fn test_tiled_workgroup() {
        let (a, b, c) = sample();
        let p = params(KernelVariant::Tiled, &a, &b, 8);
        let mut out = vec![0u64; 2];
        tiled_workgroup(a.as_words(), b.as_words(), &p, 0, 0, &mut out);
        assert_eq!(out, c.as_words());
    }
}
