//! Catalog, codec and checksum error types.

use thiserror::Error;

/// Load-time errors. All of them mean the definition file is corrupt or
/// incompatible and must not be used.
#[derive(Debug, Error)]
pub enum DbcError {
    #[error("malformed definition at line {line}: {text}")]
    MalformedDefinition { line: usize, text: String },

    #[error("duplicate message address 0x{address:X} at line {line}")]
    DuplicateAddress { address: u32, line: usize },

    #[error("signal {signal} does not fit in {size}-byte message 0x{address:X}")]
    SignalOutOfBounds {
        address: u32,
        signal: String,
        size: usize,
    },

    #[error("checksum layout violation at line {line}: {reason}")]
    ChecksumLayout { line: usize, reason: String },

    #[error("include error: {0}")]
    Include(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias for catalog loading results.
pub type DbcResult<T> = Result<T, DbcError>;

/// Checksum engine errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChecksumError {
    #[error("no checksum seed defined for address 0x{address:X}")]
    MissingSeed { address: u32 },

    #[error("payload of {len} bytes too short for checksum of 0x{address:X} (need {need})")]
    PayloadTooShort {
        address: u32,
        len: usize,
        need: usize,
    },
}

/// Runtime encode/decode errors. `UnknownMessage` only means that one
/// message is unavailable; callers keep going.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unknown message 0x{address:X}")]
    UnknownMessage { address: u32 },

    #[error("unknown message {name}")]
    UnknownMessageName { name: String },

    #[error("message 0x{address:X} has no signal {signal}")]
    UnknownSignal { address: u32, signal: String },

    #[error("message 0x{address:X} expects {expected} bytes, got {actual}")]
    LengthMismatch {
        address: u32,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Checksum(#[from] ChecksumError),
}

/// Convenience alias for codec results.
pub type CodecResult<T> = Result<T, CodecError>;
