//! Shared fixtures for the end-to-end tests.
//!
//! Simulated vehicles are assembled from the builtin platform tables, so a
//! firmware string only ever lives in one place.

#![allow(dead_code)]

use std::sync::Once;

use oc_canbus_tools::mock::{MockCanTransport, MockEcu};
use oc_ident::{IdentConfig, Identification, PlatformRegistry, identify};
use oc_protocol::{CanBatch, CanFrame, Ecu};

pub const RAV4_VIN: &[u8] = b"2T3W1RFV8KW000001";
pub const GOLF_VIN: &[u8] = b"WVWZZZAUZGW000001";

const VIN_REQUEST: &[u8] = &[0x22, 0xF1, 0x90];
const VIN_RESPONSE: &[u8] = &[0x62, 0xF1, 0x90];

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness. Honours `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A simulated vehicle plus everything needed to identify it.
pub struct TestHarness {
    pub transport: MockCanTransport,
    pub registry: &'static PlatformRegistry,
    pub config: IdentConfig,
}

impl TestHarness {
    pub fn new(ecus: impl IntoIterator<Item = MockEcu>) -> Self {
        init_tracing();
        Self {
            transport: MockCanTransport::with_ecus(ecus),
            registry: PlatformRegistry::builtin(),
            config: IdentConfig::default(),
        }
    }

    pub async fn identify(&self, frames: Vec<CanBatch>) -> Identification {
        identify(&self.transport, frames, self.registry, &self.config).await
    }
}

pub fn payload(prefix: &[u8], body: &[u8]) -> Vec<u8> {
    [prefix, body].concat()
}

/// A known firmware version of `ecu` on a builtin platform.
pub fn builtin_version(platform: &str, ecu: Ecu) -> Vec<u8> {
    PlatformRegistry::builtin()
        .platform(platform)
        .and_then(|p| p.fw_versions.iter().find(|(key, _)| key.ecu == ecu))
        .and_then(|(_, versions)| versions.iter().next().cloned())
        .unwrap_or_else(|| panic!("{platform} has no {ecu} firmware"))
}

// ── Simulated vehicles ──────────────────────────────────────────

/// Toyota RAV4: KWP version reads, an OBD engine and a sub-addressed
/// radar/camera pair behind one gateway address.
pub fn rav4_ecus() -> Vec<MockEcu> {
    let version = |ecu| builtin_version("TOYOTA_RAV4", ecu);
    let kwp = |tx: u32, ecu| {
        MockEcu::new(tx, tx + 8, 0)
            .on_request(&[0x1A, 0x88, 0x01], &payload(&[0x5A, 0x88, 0x01], &version(ecu)))
    };
    vec![
        MockEcu::new(0x7E0, 0x7E8, 0)
            .functional()
            .on_request(&[0x09, 0x04], &payload(&[0x49, 0x04], &version(Ecu::Engine)))
            .on_request(VIN_REQUEST, &payload(VIN_RESPONSE, RAV4_VIN)),
        kwp(0x7B0, Ecu::Abs),
        kwp(0x7A1, Ecu::Eps),
        kwp(0x750, Ecu::FwdRadar).with_sub_addr(0x0F),
        kwp(0x750, Ecu::FwdCamera).with_sub_addr(0x6D),
    ]
}

/// Honda Civic: 29-bit UDS ECUs behind the gateway, reachable only while
/// OBD multiplexing is on.
pub fn civic_ecus() -> Vec<MockEcu> {
    let uds = |tx: u32, rx: u32, ecu| {
        MockEcu::new(tx, rx, 1)
            .with_obd_multiplexing(true)
            .on_request(
                &[0x22, 0xF1, 0x81],
                &payload(&[0x62, 0xF1, 0x81], &builtin_version("HONDA_CIVIC", ecu)),
            )
    };
    vec![
        uds(0x18DA_10F1, 0x18DA_F110, Ecu::Engine),
        uds(0x18DA_1EF1, 0x18DA_F11E, Ecu::Transmission),
        uds(0x18DA_30F1, 0x18DA_F130, Ecu::Eps),
        uds(0x18DA_28F1, 0x18DA_F128, Ecu::Vsa),
        uds(0x18DA_B0F1, 0x18DA_F1B0, Ecu::FwdRadar),
    ]
}

/// Volkswagen on bus 1. Each ECU reports firmware from `platform_of(ecu)`,
/// so tests can build cars with swapped parts.
pub fn vw_ecus(platform_of: impl Fn(Ecu) -> &'static str) -> Vec<MockEcu> {
    let module = |tx: u32, rx: u32, ecu: Ecu| {
        MockEcu::new(tx, rx, 1)
            .on_request(&[0x10, 0x03], &[0x50, 0x03])
            .on_request(
                &[0x22, 0xF1, 0x87],
                &payload(&[0x62, 0xF1, 0x87], &builtin_version(platform_of(ecu), ecu)),
            )
    };
    vec![
        module(0x7E0, 0x7E8, Ecu::Engine)
            .functional()
            .on_request(VIN_REQUEST, &payload(VIN_RESPONSE, GOLF_VIN)),
        module(0x7E1, 0x7E9, Ecu::Transmission),
        module(0x715, 0x77F, Ecu::Srs),
        module(0x712, 0x77C, Ecu::Eps),
        module(0x757, 0x7C1, Ecu::FwdRadar),
    ]
}

// ── Passive traffic ─────────────────────────────────────────────

/// `count` batches, each carrying one frame per `(address, length)`.
pub fn traffic(signature: &[(u32, usize)], bus: u8, count: u64) -> Vec<CanBatch> {
    (0..count)
        .map(|i| {
            CanBatch::new(
                i * 10_000_000,
                signature
                    .iter()
                    .map(|&(address, len)| CanFrame::new(address, vec![0; len], bus))
                    .collect(),
            )
        })
        .collect()
}
