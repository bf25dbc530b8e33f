//! Engine configuration
//!
//! ```rust
//! use gf2mm::EngineConfig;
//!
//! let config = EngineConfig::default().with_m4r_chunk_bits(4);
//! assert!(config.validate().is_ok());
//! assert_eq!(config.m4r_chunk_bits, 4);
//! ```

use crate::{Gf2Error, Result};

/// Default M4R chunk width in bits
pub const DEFAULT_M4R_CHUNK_BITS: u32 = 8;

/// Chunk widths that divide a 64-bit word evenly
pub const SUPPORTED_M4R_CHUNK_BITS: [u32; 4] = [1, 2, 4, 8];

/// Configuration for an [`AcceleratorEngine`](crate::AcceleratorEngine)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Bits of A consumed per M4R lookup; each table has `2^m4r_chunk_bits` rows
    pub m4r_chunk_bits: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            m4r_chunk_bits: DEFAULT_M4R_CHUNK_BITS,
        }
    }
}

impl EngineConfig {
    /// Set the M4R chunk width
    #[must_use]
    pub const fn with_m4r_chunk_bits(mut self, bits: u32) -> Self {
        self.m4r_chunk_bits = bits;
        self
    }

    /// Number of chunks per 64-bit word of A
    #[must_use]
    pub const fn chunks_per_word(&self) -> u32 {
        64 / self.m4r_chunk_bits
    }

    /// Check the configuration
    ///
    /// # Errors
    ///
    /// Returns [`Gf2Error::InvalidInput`] if the chunk width does not divide 64 or
    /// exceeds 8 bits.
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_M4R_CHUNK_BITS.contains(&self.m4r_chunk_bits) {
            return Err(Gf2Error::InvalidInput(format!(
                "M4R chunk width must be one of {:?}, got {}",
                SUPPORTED_M4R_CHUNK_BITS, self.m4r_chunk_bits
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.m4r_chunk_bits, 8);
        assert_eq!(config.chunks_per_word(), 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_supported_widths_validate() {
        for bits in SUPPORTED_M4R_CHUNK_BITS {
            let config = EngineConfig::default().with_m4r_chunk_bits(bits);
            assert!(config.validate().is_ok(), "width {bits} rejected");
            assert_eq!(config.chunks_per_word() * bits, 64);
        }
    }

    #[test]
    fn test_unsupported_widths_rejected() {
        for bits in [0, 3, 5, 16, 64] {
            let err = EngineConfig::default()
                .with_m4r_chunk_bits(bits)
                .validate()
                .unwrap_err();
            assert!(matches!(err, Gf2Error::InvalidInput(_)), "width {bits}");
        }
    }
}
