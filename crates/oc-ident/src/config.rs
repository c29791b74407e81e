//! Identification settings, loadable from TOML.

use std::time::Duration;

use oc_protocol::{Ecu, FUZZY_EXCLUDE_ECUS};
use serde::{Deserialize, Serialize};

use crate::error::IdentResult;

/// Tunables for fingerprinting and firmware queries. Every field has a
/// default, so an empty document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentConfig {
    /// Batches observed before a fingerprint decision is considered.
    #[serde(default = "default_fingerprint_window")]
    pub fingerprint_window: usize,
    /// Extra batches past the window before deciding.
    #[serde(default = "default_fingerprint_grace")]
    pub fingerprint_grace: usize,
    /// Wall-clock bound on fingerprinting in milliseconds.
    #[serde(default)]
    pub fingerprint_timeout_ms: Option<u64>,
    /// Diagnostic address accepted with any length.
    #[serde(default = "default_debug_address")]
    pub debug_address: u32,
    /// Addresses never used for elimination (VIN query traffic).
    #[serde(default = "default_fingerprint_ignore")]
    pub fingerprint_ignore: Vec<u32>,
    /// TesterPresent scan timeout per chunk.
    #[serde(default = "default_presence_timeout_ms")]
    pub presence_timeout_ms: u64,
    /// Per-address silence timeout during firmware queries.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Bound on one parallel query.
    #[serde(default = "default_total_timeout_ms")]
    pub total_timeout_ms: u64,
    /// Targets per query round.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Connected interfaces; each provides four buses.
    #[serde(default = "default_num_pandas")]
    pub num_pandas: u8,
    /// Retries for a chunk whose query failed at the transport.
    #[serde(default = "default_query_retries")]
    pub query_retries: usize,
    #[serde(default = "default_vin_retries")]
    pub vin_retries: usize,
    /// ECU roles ignored by fuzzy matching.
    #[serde(default = "default_fuzzy_exclude_ecus")]
    pub fuzzy_exclude_ecus: Vec<Ecu>,
    #[serde(default = "default_true")]
    pub allow_exact: bool,
    #[serde(default = "default_true")]
    pub allow_fuzzy: bool,
    /// Gap requested between consecutive frames of segmented answers.
    #[serde(default = "default_separation_time_ms")]
    pub separation_time_ms: u64,
}

fn default_fingerprint_window() -> usize {
    100
}

fn default_fingerprint_grace() -> usize {
    2
}

fn default_debug_address() -> u32 {
    0x758
}

fn default_fingerprint_ignore() -> Vec<u32> {
    vec![0x7DF, 0x7E0, 0x7E8]
}

fn default_presence_timeout_ms() -> u64 {
    100
}

fn default_query_timeout_ms() -> u64 {
    100
}

fn default_total_timeout_ms() -> u64 {
    60_000
}

fn default_chunk_size() -> usize {
    128
}

fn default_num_pandas() -> u8 {
    1
}

fn default_query_retries() -> usize {
    1
}

fn default_vin_retries() -> usize {
    2
}

fn default_fuzzy_exclude_ecus() -> Vec<Ecu> {
    FUZZY_EXCLUDE_ECUS.to_vec()
}

fn default_true() -> bool {
    true
}

fn default_separation_time_ms() -> u64 {
    10
}

impl Default for IdentConfig {
    fn default() -> Self {
        Self {
            fingerprint_window: default_fingerprint_window(),
            fingerprint_grace: default_fingerprint_grace(),
            fingerprint_timeout_ms: None,
            debug_address: default_debug_address(),
            fingerprint_ignore: default_fingerprint_ignore(),
            presence_timeout_ms: default_presence_timeout_ms(),
            query_timeout_ms: default_query_timeout_ms(),
            total_timeout_ms: default_total_timeout_ms(),
            chunk_size: default_chunk_size(),
            num_pandas: default_num_pandas(),
            query_retries: default_query_retries(),
            vin_retries: default_vin_retries(),
            fuzzy_exclude_ecus: default_fuzzy_exclude_ecus(),
            allow_exact: true,
            allow_fuzzy: true,
            separation_time_ms: default_separation_time_ms(),
        }
    }
}

impl IdentConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> IdentResult<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn presence_timeout(&self) -> Duration {
        Duration::from_millis(self.presence_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_millis(self.total_timeout_ms)
    }

    pub fn separation_time(&self) -> Duration {
        Duration::from_millis(self.separation_time_ms)
    }

    pub fn fingerprint_timeout(&self) -> Option<Duration> {
        self.fingerprint_timeout_ms.map(Duration::from_millis)
    }

    /// Highest bus index reachable with the configured interfaces.
    pub fn max_bus(&self) -> u8 {
        (self.num_pandas.saturating_mul(4)).saturating_sub(1)
    }

    /// Chunk size used for splitting targets; never zero.
    pub fn chunk(&self) -> usize {
        self.chunk_size.max(1)
    }
}
