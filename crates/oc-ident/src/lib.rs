//! Vehicle identification.
//!
//! Two independent sources of evidence:
//!
//! - **Fingerprinting** watches passive traffic and eliminates platforms
//!   whose recorded (address, length) signatures contradict it.
//! - **Firmware queries** find the ECUs present, read their firmware
//!   versions over ISO-TP and match them against known platform tables,
//!   exactly first and fuzzily as a fallback.
//!
//! [`identify::identify`] runs both and prefers a confident firmware match.

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod fw_match;
pub mod fw_query;
pub mod identify;
pub mod platforms;

pub use config::IdentConfig;
pub use error::{IdentError, IdentResult};
pub use fingerprint::{Fingerprint, FingerprintResult, FingerprintState, Fingerprinter, can_fingerprint};
pub use fw_match::{FwMatch, match_fw_to_car};
pub use fw_query::FwQuery;
pub use identify::{IdentSource, Identification, identify};
pub use platforms::{BrandConfig, FwRequest, PlatformRegistry};
