//! gf2mm: Bit-Packed GF(2) Matrix Multiplication
//!
//! Dense matrix multiplication over GF(2) (addition = XOR, multiplication = AND) on
//! bit-packed matrices, with interchangeable strategies that agree bit-for-bit:
//!
//! 1. **Serial** - element-by-element reference loop (the correctness oracle)
//! 2. **Simd** - bit-sliced rows of A and Bᵀ reduced with SSE2/AVX2/NEON
//! 3. **Accelerator** - five kernel variants (Naive, Transposed, Tiled,
//!    Vectorized, M4R) dispatched through a [`Device`]: the CPU-emulated
//!    [`HostDevice`], or `WgpuDevice` (Vulkan/Metal/DX12) with the `gpu` feature
//!
//! # Design Principles
//!
//! - **One interface**: every strategy is a [`MatrixMultiply`] selected by [`Strategy`]
//! - **Runtime dispatch**: the SIMD backend is chosen from detected CPU features
//! - **Zero unsafe in public API**: `unsafe` is isolated in the backends
//! - **Vendor-neutral devices**: algorithms never see the GPU API behind [`Device`]
//!
//! # Quick Start
//!
//! ```rust
//! use gf2mm::{multiply, BitMatrix, Strategy};
//!
//! let a = BitMatrix::from_rows(&[[1, 0, 1], [0, 1, 1]]).unwrap();
//! let b = BitMatrix::from_rows(&[[1, 0], [0, 1], [1, 1]]).unwrap();
//!
//! let c = multiply(Strategy::M4r, &a, &b).unwrap();
//! assert_eq!(c, BitMatrix::from_rows(&[[0, 1], [1, 0]]).unwrap());
//! ```

pub mod backends;
pub mod bitsliced;
pub mod config;
pub mod error;
pub mod matrix;
pub mod multiplier;
pub mod reference;
pub mod transpose;
pub mod validate;

use std::fmt;
use std::str::FromStr;

pub use backends::accel::{
    AcceleratorEngine, Device, GridShape, GroupShape, HostDevice, HostDeviceConfig, KernelId,
    KernelParams, KernelVariant,
};
#[cfg(feature = "gpu")]
pub use backends::accel::WgpuDevice;
pub use backends::CpuBackend;
pub use bitsliced::BitslicedMultiplier;
pub use config::EngineConfig;
pub use error::{Gf2Error, Result};
pub use matrix::BitMatrix;
pub use multiplier::{multiply, throughput_gops, MatrixMultiply, Multiplier};
pub use reference::ReferenceMultiplier;
pub use validate::{validate, validate_sampled};

/// Multiplication strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Scalar reference loop
    Serial,
    /// Bit-sliced CPU SIMD
    Simd,
    /// Accelerator, direct addressing
    Naive,
    /// Accelerator, host-transposed B
    Transposed,
    /// Accelerator, workgroup-tiled
    Tiled,
    /// Accelerator, four words per step
    Vectorized,
    /// Accelerator, Method of Four Russians
    M4r,
}

impl Strategy {
    /// Every strategy
    pub const ALL: [Strategy; 7] = [
        Strategy::Serial,
        Strategy::Simd,
        Strategy::Naive,
        Strategy::Transposed,
        Strategy::Tiled,
        Strategy::Vectorized,
        Strategy::M4r,
    ];

    /// Accelerator variant behind this strategy (`None` for CPU strategies)
    pub fn kernel_variant(self) -> Option<KernelVariant> {
        match self {
            Strategy::Serial | Strategy::Simd => None,
            Strategy::Naive => Some(KernelVariant::Naive),
            Strategy::Transposed => Some(KernelVariant::Transposed),
            Strategy::Tiled => Some(KernelVariant::Tiled),
            Strategy::Vectorized => Some(KernelVariant::Vectorized),
            Strategy::M4r => Some(KernelVariant::M4r),
        }
    }

    /// True for strategies that run on a [`Device`]
    pub fn is_accelerated(self) -> bool {
        self.kernel_variant().is_some()
    }

    /// Lower-case strategy name
    pub fn name(self) -> &'static str {
        match self.kernel_variant() {
            Some(variant) => variant.name(),
            None if self == Strategy::Serial => "serial",
            None => "simd",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = Gf2Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.name() == wanted)
            .ok_or_else(|| Gf2Error::InvalidInput(format!("unknown strategy '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_names_round_trip() {
        for strategy in Strategy::ALL {
            assert_eq!(strategy.to_string().parse::<Strategy>().unwrap(), strategy);
        }
        assert_eq!(" M4R ".parse::<Strategy>().unwrap(), Strategy::M4r);
        assert!(matches!(
            "blas".parse::<Strategy>(),
            Err(Gf2Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_strategy_variants() {
        assert!(!Strategy::Serial.is_accelerated());
        assert!(!Strategy::Simd.is_accelerated());
        assert_eq!(Strategy::M4r.kernel_variant(), Some(KernelVariant::M4r));
        assert_eq!(
            Strategy::ALL.iter().filter(|s| s.is_accelerated()).count(),
            KernelVariant::ALL.len()
        );
    }
}
