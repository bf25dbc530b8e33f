//! Device contract and dispatch descriptors
//!
//! A [`Device`] owns buffers and compiled pipelines and executes dispatches
//! asynchronously; [`Device::synchronize_and_wait`] is the completion fence. The
//! engine never sees the vendor API behind it.

use bytemuck::{Pod, Zeroable};
use std::fmt;

use crate::config::SUPPORTED_M4R_CHUNK_BITS;
use crate::matrix::words_for;
use crate::{Gf2Error, Result};

/// Invocations per workgroup edge
pub const TILE: u32 = 16;

/// Maximum invocations per workgroup
pub const MAX_GROUP_INVOCATIONS: u32 = 256;

/// Bytes per packed word
pub const WORD_BYTES: usize = std::mem::size_of::<u64>();

/// A compute kernel. M4R needs two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KernelId {
    /// One invocation per output word; XORs B rows selected by A's bits
    Naive,
    /// One invocation per output word; parities of A rows against Bᵀ rows
    Transposed,
    /// Workgroup-staged 16×16 tiles of B rows
    Tiled,
    /// Like `Transposed` with 4-word steps and 4 lane accumulators
    Vectorized,
    /// M4R pass 1: lookup table build
    M4rBuild,
    /// M4R pass 2: table lookups per A chunk
    M4rMultiply,
}

impl KernelId {
    /// Every kernel, in compile order
    pub const ALL: [KernelId; 6] = [
        KernelId::Naive,
        KernelId::Transposed,
        KernelId::Tiled,
        KernelId::Vectorized,
        KernelId::M4rBuild,
        KernelId::M4rMultiply,
    ];

    /// Kernel name, also the shader label
    pub fn name(self) -> &'static str {
        match self {
            KernelId::Naive => "gf2_naive",
            KernelId::Transposed => "gf2_transposed",
            KernelId::Tiled => "gf2_tiled",
            KernelId::Vectorized => "gf2_vectorized",
            KernelId::M4rBuild => "m4r_build",
            KernelId::M4rMultiply => "m4r_multiply",
        }
    }

    /// Number of bound buffers, parameter buffer included
    ///
    /// Binding order: `a, b, c, params` for the four single-pass kernels,
    /// `b, table, params` for [`KernelId::M4rBuild`] and `a, table, c, params` for
    /// [`KernelId::M4rMultiply`].
    pub fn binding_count(self) -> usize {
        match self {
            KernelId::M4rBuild => 3,
            _ => 4,
        }
    }

    /// Binding index of the buffer the kernel writes
    pub fn output_binding(self) -> usize {
        match self {
            KernelId::M4rBuild => 1,
            _ => 2,
        }
    }
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accelerator algorithm selectable by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelVariant {
    /// Direct addressing
    Naive,
    /// Host-transposed B
    Transposed,
    /// Workgroup-local staging
    Tiled,
    /// Four words per step
    Vectorized,
    /// Method of Four Russians (two passes)
    M4r,
}

impl KernelVariant {
    /// Every variant
    pub const ALL: [KernelVariant; 5] = [
        KernelVariant::Naive,
        KernelVariant::Transposed,
        KernelVariant::Tiled,
        KernelVariant::Vectorized,
        KernelVariant::M4r,
    ];

    /// Kernels dispatched for this variant, in order
    pub fn kernels(self) -> &'static [KernelId] {
        match self {
            KernelVariant::Naive => &[KernelId::Naive],
            KernelVariant::Transposed => &[KernelId::Transposed],
            KernelVariant::Tiled => &[KernelId::Tiled],
            KernelVariant::Vectorized => &[KernelId::Vectorized],
            KernelVariant::M4r => &[KernelId::M4rBuild, KernelId::M4rMultiply],
        }
    }

    /// True if B is uploaded transposed
    pub fn uses_transposed_b(self) -> bool {
        matches!(self, KernelVariant::Transposed | KernelVariant::Vectorized)
    }

    /// Lower-case variant name
    pub fn name(self) -> &'static str {
        match self {
            KernelVariant::Naive => "naive",
            KernelVariant::Transposed => "transposed",
            KernelVariant::Tiled => "tiled",
            KernelVariant::Vectorized => "vectorized",
            KernelVariant::M4r => "m4r",
        }
    }
}

impl fmt::Display for KernelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Total invocations per axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridShape {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl GridShape {
    /// Two-dimensional grid
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y, z: 1 }
    }

    /// Workgroups needed to cover the grid with `group`
    pub fn workgroups(&self, group: GroupShape) -> (u32, u32, u32) {
        (
            self.x.div_ceil(group.x.max(1)),
            self.y.div_ceil(group.y.max(1)),
            self.z.div_ceil(group.z.max(1)),
        )
    }
}

/// Invocations per workgroup per axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupShape {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl GroupShape {
    /// The 16×16 group every kernel is compiled for
    pub const TILE: GroupShape = GroupShape {
        x: TILE,
        y: TILE,
        z: 1,
    };

    /// Invocations in one workgroup
    pub fn invocations(&self) -> u64 {
        u64::from(self.x) * u64::from(self.y) * u64::from(self.z)
    }
}

/// Addressing for one dispatch, uploaded verbatim as the parameter buffer
///
/// For [`KernelVariant::Transposed`] and [`KernelVariant::Vectorized`],
/// `words_per_row_b` is the row width of Bᵀ; otherwise it is the row width of B.
/// `chunk_bits` and `num_tables` are zero outside M4R.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct KernelParams {
    pub a_rows: u32,
    pub a_cols: u32,
    pub b_cols: u32,
    pub words_per_row_a: u32,
    pub words_per_row_b: u32,
    pub words_per_row_result: u32,
    pub chunk_bits: u32,
    pub num_tables: u32,
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        Gf2Error::InvalidInput(format!(
            "{what} = {value} exceeds the 32-bit addressing of device kernels"
        ))
    })
}

impl KernelParams {
    /// Build the descriptor for `A (a_rows × a_cols) × B (a_cols × b_cols)`
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if any dimension or buffer size does not fit in
    /// 32-bit kernel addressing.
    pub fn for_variant(
        variant: KernelVariant,
        a_rows: usize,
        a_cols: usize,
        b_cols: usize,
        chunk_bits: u32,
    ) -> Result<Self> {
        let words_per_row_a = words_for(a_cols);
        let words_per_row_result = words_for(b_cols);
        let words_per_row_b = if variant.uses_transposed_b() {
            words_per_row_a
        } else {
            words_per_row_result
        };
        let (chunk_bits, num_tables) = match variant {
            KernelVariant::M4r => {
                if !SUPPORTED_M4R_CHUNK_BITS.contains(&chunk_bits) {
                    return Err(Gf2Error::InvalidInput(format!(
                        "unsupported M4R chunk width {chunk_bits}"
                    )));
                }
                (chunk_bits, words_per_row_a * (64 / chunk_bits as usize))
            }
            _ => (0, 0),
        };

        let params = Self {
            a_rows: to_u32(a_rows, "a_rows")?,
            a_cols: to_u32(a_cols, "a_cols")?,
            b_cols: to_u32(b_cols, "b_cols")?,
            words_per_row_a: to_u32(words_per_row_a, "words_per_row_a")?,
            words_per_row_b: to_u32(words_per_row_b, "words_per_row_b")?,
            words_per_row_result: to_u32(words_per_row_result, "words_per_row_result")?,
            chunk_bits,
            num_tables: to_u32(num_tables, "num_tables")?,
        };

        // flat word indices inside the kernels are 32-bit as well
        for kernel in variant.kernels() {
            for words in params.required_words(*kernel) {
                to_u32(words, "buffer words")?;
            }
        }
        Ok(params)
    }

    /// Rows per M4R table (`2^chunk_bits`)
    pub fn table_rows(&self) -> usize {
        1usize << self.chunk_bits
    }

    /// Words in the M4R table buffer
    pub fn table_words(&self) -> usize {
        self.num_tables as usize * self.table_rows() * self.words_per_row_b as usize
    }

    /// Minimum size in words of each bound buffer, parameter buffer excluded, in
    /// binding order
    pub fn required_words(&self, kernel: KernelId) -> Vec<usize> {
        let a = self.a_rows as usize * self.words_per_row_a as usize;
        let c = self.a_rows as usize * self.words_per_row_result as usize;
        let b_rows = match kernel {
            KernelId::Transposed | KernelId::Vectorized => self.b_cols as usize,
            _ => self.a_cols as usize,
        };
        let b = b_rows * self.words_per_row_b as usize;
        match kernel {
            KernelId::Naive | KernelId::Transposed | KernelId::Tiled | KernelId::Vectorized => {
                vec![a, b, c]
            }
            KernelId::M4rBuild => vec![b, self.table_words()],
            KernelId::M4rMultiply => vec![a, self.table_words(), c],
        }
    }

    /// Grid covering every word the kernel writes
    pub fn grid(&self, kernel: KernelId) -> GridShape {
        match kernel {
            KernelId::M4rBuild => GridShape::new(
                self.num_tables.saturating_mul(1 << self.chunk_bits),
                self.words_per_row_b,
            ),
            _ => GridShape::new(self.a_rows, self.words_per_row_result),
        }
    }
}

/// Accelerator capability contract
///
/// Dispatches are asynchronous: [`Device::dispatch`] only records work and
/// [`Device::synchronize_and_wait`] blocks until everything recorded before it has
/// finished and its writes are visible. Buffers must be passed back to
/// [`Device::release`] when no longer needed.
pub trait Device {
    /// Device-resident buffer
    type Buffer;
    /// Compiled kernel
    type Pipeline;

    /// Human-readable device name
    fn name(&self) -> &str;

    /// Allocate a zeroed buffer of `bytes` bytes
    fn allocate(&self, bytes: usize) -> Result<Self::Buffer>;

    /// Allocate a buffer initialized with `data`
    fn allocate_from_data(&self, data: &[u8]) -> Result<Self::Buffer>;

    /// Compile a kernel
    fn compile(&self, kernel: KernelId) -> Result<Self::Pipeline>;

    /// Record a dispatch over `grid` invocations in groups of `group`
    fn dispatch(
        &self,
        pipeline: &Self::Pipeline,
        buffers: &[&Self::Buffer],
        grid: GridShape,
        group: GroupShape,
    ) -> Result<()>;

    /// Block until every recorded dispatch has completed
    fn synchronize_and_wait(&self) -> Result<()>;

    /// Copy the first `out.len()` bytes of `buffer` to host memory
    fn read(&self, buffer: &Self::Buffer, out: &mut [u8]) -> Result<()>;

    /// Free a buffer
    fn release(&self, buffer: Self::Buffer);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_are_32_bytes() {
        assert_eq!(std::mem::size_of::<KernelParams>(), 32);
        let params = KernelParams::zeroed();
        assert_eq!(bytemuck::bytes_of(&params).len(), 32);
    }

    #[test]
    fn test_params_plain_variant() {
        let p = KernelParams::for_variant(KernelVariant::Naive, 10, 130, 70, 8).unwrap();
        assert_eq!(p.words_per_row_a, 3);
        assert_eq!(p.words_per_row_b, 2);
        assert_eq!(p.words_per_row_result, 2);
        assert_eq!(p.chunk_bits, 0);
        assert_eq!(p.num_tables, 0);
        assert_eq!(p.required_words(KernelId::Naive), vec![30, 260, 20]);
        assert_eq!(p.grid(KernelId::Naive), GridShape::new(10, 2));
    }

    #[test]
    fn test_params_transposed_variant() {
        let p = KernelParams::for_variant(KernelVariant::Transposed, 10, 130, 70, 8).unwrap();
        assert_eq!(p.words_per_row_b, 3);
        assert_eq!(p.required_words(KernelId::Transposed), vec![30, 70 * 3, 20]);
    }

    #[test]
    fn test_params_m4r_variant() {
        let p = KernelParams::for_variant(KernelVariant::M4r, 5, 100, 3, 4).unwrap();
        assert_eq!(p.chunk_bits, 4);
        assert_eq!(p.num_tables, 2 * 16);
        assert_eq!(p.table_rows(), 16);
        assert_eq!(p.table_words(), 32 * 16);
        assert_eq!(p.required_words(KernelId::M4rBuild), vec![100, 512]);
        assert_eq!(p.required_words(KernelId::M4rMultiply), vec![10, 512, 5]);
        assert_eq!(p.grid(KernelId::M4rBuild), GridShape::new(512, 1));
        assert_eq!(p.grid(KernelId::M4rMultiply), GridShape::new(5, 1));
    }

    #[test]
    fn test_params_reject_oversized_dimensions() {
        let err = KernelParams::for_variant(KernelVariant::Naive, u32::MAX as usize + 1, 1, 1, 8)
            .unwrap_err();
        assert!(matches!(err, Gf2Error::InvalidInput(_)));
    }

    #[test]
    fn test_workgroups_round_up() {
        let grid = GridShape::new(33, 16);
        assert_eq!(grid.workgroups(GroupShape::TILE), (3, 1, 1));
        assert_eq!(GroupShape::TILE.invocations(), 256);
    }

    #[test]
    fn test_variant_kernels() {
        assert_eq!(KernelVariant::M4r.kernels().len(), 2);
        assert!(KernelVariant::Vectorized.uses_transposed_b());
        assert!(!KernelVariant::Tiled.uses_transposed_b());
        for kernel in KernelId::ALL {
            assert!(kernel.output_binding() < kernel.binding_count() - 1);
        }
    }
}
