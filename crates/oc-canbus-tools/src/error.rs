//! CAN transport and diagnostic query error types.

use thiserror::Error;

/// Errors that can occur while talking to ECUs.
#[derive(Debug, Error)]
pub enum CanError {
    #[error("CAN interface error: {0}")]
    Interface(String),

    #[error("UDS protocol error: {0}")]
    Protocol(String),

    #[error("Safety violation: service 0x{service:02X} is not allowed")]
    SafetyViolation { service: u8 },

    #[error("Response timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("ISO-TP error: {0}")]
    IsoTp(String),

    #[error("Invalid diagnostic address 0x{address:X}")]
    InvalidAddress { address: u32 },
}

/// Convenience alias for CAN bus results.
pub type CanResult<T> = Result<T, CanError>;
