//! Error types for GF(2) multiplication

use thiserror::Error;

/// Result type for gf2mm operations
pub type Result<T> = std::result::Result<T, Gf2Error>;

/// Errors that can occur while building matrices or multiplying them
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Gf2Error {
    /// Inner dimensions of the operands disagree (`A.cols != B.rows`)
    #[error(
        "Dimension mismatch: {left_rows}x{left_cols} × {right_rows}x{right_cols} (inner dimensions {left_cols} and {right_rows} must match)"
    )]
    DimensionMismatch {
        /// Rows of the left operand
        left_rows: usize,
        /// Columns of the left operand
        left_cols: usize,
        /// Rows of the right operand
        right_rows: usize,
        /// Columns of the right operand
        right_cols: usize,
    },

    /// A strategy cannot run: its kernel failed to compile, or the CPU lacks the
    /// requested instruction set
    #[error("Backend unavailable ({backend}): {reason}")]
    BackendUnavailable {
        /// Name of the backend or kernel variant
        backend: String,
        /// Why it is unusable
        reason: String,
    },

    /// Device memory exhausted
    #[error("Allocation of {requested} bytes failed: {reason}")]
    AllocationFailure {
        /// Requested size in bytes
        requested: usize,
        /// Device-reported cause
        reason: String,
    },

    /// Device-reported execution fault
    #[error("Device execution failed: {0}")]
    DeviceExecutionFailure(String),

    /// Invalid input or configuration
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Gf2Error {
    pub(crate) fn dimension_mismatch(left: (usize, usize), right: (usize, usize)) -> Self {
        Self::DimensionMismatch {
            left_rows: left.0,
            left_cols: left.1,
            right_rows: right.0,
            right_cols: right.1,
        }
    }

    pub(crate) fn unavailable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_error() {
        let err = Gf2Error::dimension_mismatch((2, 3), (4, 5));
        assert_eq!(
            err.to_string(),
            "Dimension mismatch: 2x3 × 4x5 (inner dimensions 3 and 4 must match)"
        );
    }

    #[test]
    fn test_backend_unavailable_error() {
        let err = Gf2Error::unavailable("m4r", "kernel m4r_build failed to compile");
        assert_eq!(
            err.to_string(),
            "Backend unavailable (m4r): kernel m4r_build failed to compile"
        );
    }

    #[test]
    fn test_allocation_failure_error() {
        let err = Gf2Error::AllocationFailure {
            requested: 4096,
            reason: "limit of 1024 bytes exceeded".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Allocation of 4096 bytes failed: limit of 1024 bytes exceeded"
        );
    }

    #[test]
    fn test_device_execution_failure_error() {
        let err = Gf2Error::DeviceExecutionFailure("buffer too small".to_string());
        assert_eq!(err.to_string(), "Device execution failed: buffer too small");
    }

    #[test]
    fn test_invalid_input_error() {
        let err = Gf2Error::InvalidInput("ragged rows".to_string());
        assert_eq!(err.to_string(), "Invalid input: ragged rows");
    }

    #[test]
    fn test_error_equality() {
        let err1 = Gf2Error::dimension_mismatch((1, 2), (3, 4));
        let err2 = Gf2Error::dimension_mismatch((1, 2), (3, 4));
        assert_eq!(err1, err2);
        assert_ne!(err1, Gf2Error::dimension_mismatch((1, 2), (3, 5)));
    }
}
