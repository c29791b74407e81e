//! Identification error types.
//!
//! Only loading platform tables and configuration can fail. Query failures
//! degrade to "nothing collected" and ambiguous matches are values.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Duplicate brand '{0}'")]
    DuplicateBrand(String),

    #[error("Duplicate platform '{0}'")]
    DuplicatePlatform(String),

    #[error("Platform '{platform}' refers to unknown brand '{brand}'")]
    UnknownBrand { platform: String, brand: String },

    #[error("Invalid platform table: {0}")]
    Table(String),
}

pub type IdentResult<T> = Result<T, IdentError>;
