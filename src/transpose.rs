//! 64×64 bit-block transpose
//!
//! A block is 64 words where bit `c` of word `r` is element `(r, c)`. Transposing
//! swaps the off-diagonal `s×s` sub-blocks for `s = 32, 16, ..., 1` with masked
//! delta swaps (Hacker's Delight, 2nd ed., §7.3), six passes of 32 swaps each.

/// Masks selecting the low `s` bits of every `2s`-bit group, indexed by `log2(s)`
const SWAP_MASKS: [u64; 6] = [
    0x5555_5555_5555_5555,
    0x3333_3333_3333_3333,
    0x0F0F_0F0F_0F0F_0F0F,
    0x00FF_00FF_00FF_00FF,
    0x0000_FFFF_0000_FFFF,
    0x0000_0000_FFFF_FFFF,
];

/// Transpose a 64×64 bit block in place.
pub fn transpose_64x64(block: &mut [u64; 64]) {
    for level in (0..6).rev() {
        let width = 1usize << level;
        let mask = SWAP_MASKS[level];
        let mut top = 0;
        while top < 64 {
            for upper in top..top + width {
                let lower = upper + width;
                // high half of the upper row trades places with low half of the lower row
                let diff = ((block[upper] >> width) ^ block[lower]) & mask;
                block[lower] ^= diff;
                block[upper] ^= diff << width;
            }
            top += 2 * width;
        }
    }
}

/// Transpose a row-major packed bit matrix.
///
/// `src` holds `rows` rows of `ceil(cols/64)` words; the result holds `cols` rows of
/// `ceil(rows/64)` words. Padding bits of `src` must be zero; padding bits of the
/// result are zero.
pub fn transpose_words(src: &[u64], rows: usize, cols: usize) -> Vec<u64> {
    let src_stride = cols.div_ceil(64);
    let dst_stride = rows.div_ceil(64);
    let mut dst = vec![0u64; cols * dst_stride];
    let mut block = [0u64; 64];

    for row_block in 0..dst_stride {
        let row_base = row_block * 64;
        let block_rows = (rows - row_base).min(64);

        for col_block in 0..src_stride {
            block.fill(0);
            for (offset, slot) in block.iter_mut().take(block_rows).enumerate() {
                *slot = src[(row_base + offset) * src_stride + col_block];
            }

            transpose_64x64(&mut block);

            let col_base = col_block * 64;
            let block_cols = (cols - col_base).min(64);
            for (offset, word) in block.iter().take(block_cols).enumerate() {
                dst[(col_base + offset) * dst_stride + row_block] = *word;
            }
        }
    }

    dst
}
