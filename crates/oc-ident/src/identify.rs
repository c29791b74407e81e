//! End-to-end vehicle identification.

use std::collections::BTreeSet;

use oc_canbus_tools::CanTransport;
use oc_canbus_tools::vin::{VinResult, get_vin};
use oc_protocol::{CanBatch, CarFw, EcuAddrBus};
use serde::Serialize;

use crate::config::IdentConfig;
use crate::fingerprint::{FingerprintResult, Fingerprinter, can_fingerprint};
use crate::fw_match::{FwMatch, match_fw_to_car};
use crate::fw_query::FwQuery;
use crate::platforms::PlatformRegistry;

/// Buses queried for the VIN.
const VIN_BUSES: &[u8] = &[0, 1];

/// Evidence the chosen platform came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentSource {
    FwExact,
    FwFuzzy,
    Fingerprint,
    None,
}

/// Identification outcome together with all evidence collected.
#[derive(Debug, Clone, Serialize)]
pub struct Identification {
    pub platform: Option<String>,
    pub source: IdentSource,
    pub vin: VinResult,
    pub present_ecus: BTreeSet<EcuAddrBus>,
    pub fw: Vec<CarFw>,
    pub fw_match: FwMatch,
    pub fingerprint: FingerprintResult,
}

/// Fingerprint the passive traffic in `frames`, then query VIN and
/// firmware over `transport`. A confident firmware match wins over the
/// fingerprint.
pub async fn identify(
    transport: &dyn CanTransport,
    frames: impl IntoIterator<Item = CanBatch>,
    registry: &PlatformRegistry,
    config: &IdentConfig,
) -> Identification {
    let mut fingerprinter = Fingerprinter::new(registry, config);
    let fingerprint = can_fingerprint(&mut fingerprinter, frames);

    let vin = get_vin(transport, VIN_BUSES, config.query_timeout(), config.vin_retries).await;

    let query = FwQuery::new(transport, registry, config);
    let present_ecus = query.get_present_ecus().await;
    let fw = query.get_fw_versions_ordered(&vin.vin, &present_ecus).await;
    let fw_match = match_fw_to_car(registry, &fw, &vin.vin, config);

    let (platform, source) = match (fw_match.platform(), fingerprint.platform()) {
        (Some(p), _) if fw_match.exact => (Some(p.to_string()), IdentSource::FwExact),
        (Some(p), _) => (Some(p.to_string()), IdentSource::FwFuzzy),
        (None, Some(p)) => (Some(p.to_string()), IdentSource::Fingerprint),
        (None, None) => (None, IdentSource::None),
    };

    match &platform {
        Some(p) => tracing::info!(
            platform = p,
            source = ?source,
            vin = vin.vin.as_str(),
            fw_count = fw.len(),
            "vehicle identified"
        ),
        None => tracing::warn!(
            vin = vin.vin.as_str(),
            fw_count = fw.len(),
            candidates = ?fw_match.candidates,
            "vehicle not identified"
        ),
    }

    Identification {
        platform,
        source,
        vin,
        present_ecus,
        fw,
        fw_match,
        fingerprint,
    }
}
