//! Passive CAN fingerprinting.
//!
//! Every platform carries one or more recorded snapshots of the
//! `(address, length)` pairs its buses emit. While sampling, each observed
//! frame on bus 0 or 1 eliminates platforms none of whose snapshots are
//! consistent with it. Payload bytes are never inspected.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use oc_protocol::{CanBatch, CanFrame, EXTENDED_ADDRESS_MIN};
use serde::Serialize;
use tokio::time::Instant;

use crate::config::IdentConfig;
use crate::platforms::PlatformRegistry;

/// Buses whose traffic can eliminate candidates.
const FINGERPRINT_BUSES: usize = 2;

/// Sources at or above this are loopback/echo, not vehicle traffic.
const MAX_SOURCE_BUS: u8 = 128;

/// Recorded `address -> length` pairs of one platform.
pub type Snapshot = BTreeMap<u32, usize>;

/// Evidence table: last length seen per address, per bus and overall.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Fingerprint {
    pub by_bus: BTreeMap<u8, BTreeMap<u32, usize>>,
    pub any: BTreeMap<u32, usize>,
}

impl Fingerprint {
    fn record(&mut self, frame: &CanFrame) {
        self.by_bus
            .entry(frame.src)
            .or_default()
            .insert(frame.address, frame.len());
        self.any.insert(frame.address, frame.len());
    }

    pub fn bus(&self, bus: u8) -> Option<&BTreeMap<u32, usize>> {
        self.by_bus.get(&bus)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FingerprintResult {
    Match {
        platform: String,
        bus: u8,
        fingerprint: Fingerprint,
    },
    NoMatch {
        fingerprint: Fingerprint,
    },
}

impl FingerprintResult {
    pub fn platform(&self) -> Option<&str> {
        match self {
            Self::Match { platform, .. } => Some(platform),
            Self::NoMatch { .. } => None,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        match self {
            Self::Match { fingerprint, .. } | Self::NoMatch { fingerprint } => fingerprint,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintState {
    Sampling,
    Decided(FingerprintResult),
}

/// Fingerprinting state machine for one session.
#[derive(Debug)]
pub struct Fingerprinter {
    signatures: BTreeMap<String, Vec<Snapshot>>,
    candidates: [BTreeSet<String>; FINGERPRINT_BUSES],
    fingerprint: Fingerprint,
    batches: usize,
    window: usize,
    grace: usize,
    debug_address: u32,
    ignore: Vec<u32>,
    max_duration: Option<Duration>,
    started: Option<Instant>,
    decided: Option<FingerprintResult>,
}

impl Fingerprinter {
    /// Seed candidates with every registry platform that has signatures.
    pub fn new(registry: &PlatformRegistry, config: &IdentConfig) -> Self {
        Self::with_signatures(
            registry
                .platforms()
                .filter(|p| !p.fingerprints.is_empty())
                .map(|p| (p.name.clone(), p.fingerprints.clone())),
            config,
        )
    }

    pub fn with_signatures(
        signatures: impl IntoIterator<Item = (String, Vec<Snapshot>)>,
        config: &IdentConfig,
    ) -> Self {
        let signatures: BTreeMap<String, Vec<Snapshot>> = signatures.into_iter().collect();
        let all: BTreeSet<String> = signatures.keys().cloned().collect();
        Self {
            signatures,
            candidates: [all.clone(), all],
            fingerprint: Fingerprint::default(),
            batches: 0,
            window: config.fingerprint_window,
            grace: config.fingerprint_grace,
            debug_address: config.debug_address,
            ignore: config.fingerprint_ignore.clone(),
            max_duration: config.fingerprint_timeout(),
            started: None,
            decided: None,
        }
    }

    /// Surviving candidates on bus 0 or 1.
    pub fn candidates(&self, bus: u8) -> Option<&BTreeSet<String>> {
        self.candidates.get(usize::from(bus))
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn evidence(&self) -> &Fingerprint {
        &self.fingerprint
    }

    fn is_exempt(&self, address: u32) -> bool {
        address >= EXTENDED_ADDRESS_MIN
            || address == self.debug_address
            || self.ignore.contains(&address)
    }

    /// Feed one batch of received frames. Once decided, further batches
    /// are ignored and the same result is returned.
    pub fn observe(&mut self, batch: &CanBatch) -> FingerprintState {
        if let Some(result) = &self.decided {
            return FingerprintState::Decided(result.clone());
        }
        let started = *self.started.get_or_insert_with(Instant::now);

        for frame in &batch.frames {
            if frame.src < MAX_SOURCE_BUS {
                self.fingerprint.record(frame);
            }
            if self.is_exempt(frame.address) {
                continue;
            }
            let signatures = &self.signatures;
            let Some(set) = self.candidates.get_mut(usize::from(frame.src)) else {
                continue;
            };
            let before = set.len();
            set.retain(|name| {
                signatures
                    .get(name)
                    .is_some_and(|snapshots| consistent(snapshots, frame.address, frame.len()))
            });
            if set.len() != before {
                tracing::debug!(
                    bus = frame.src,
                    address = format!("0x{:X}", frame.address),
                    len = frame.len(),
                    remaining = set.len(),
                    "fingerprint candidates eliminated"
                );
            }
        }
        self.batches += 1;

        match self.decide(started) {
            Some(result) => {
                match &result {
                    FingerprintResult::Match { platform, bus, .. } => {
                        tracing::info!(platform, bus, batches = self.batches, "fingerprinted");
                    }
                    FingerprintResult::NoMatch { .. } => {
                        tracing::info!(batches = self.batches, "no fingerprint match");
                    }
                }
                self.decided = Some(result.clone());
                FingerprintState::Decided(result)
            }
            None => FingerprintState::Sampling,
        }
    }

    fn decide(&self, started: Instant) -> Option<FingerprintResult> {
        if self.batches >= self.window + self.grace {
            let mut decided = self
                .candidates
                .iter()
                .enumerate()
                .filter_map(|(bus, set)| match set.len() {
                    1 => set.iter().next().map(|p| (bus, p)),
                    _ => None,
                });
            if let Some((bus, platform)) = decided.next() {
                // buses naming different platforms is ambiguous, not a match
                if decided.any(|(_, other)| other != platform) {
                    tracing::warn!("buses disagree on the fingerprinted platform");
                    return Some(self.no_match());
                }
                return Some(FingerprintResult::Match {
                    platform: platform.clone(),
                    bus: bus as u8,
                    fingerprint: self.fingerprint.clone(),
                });
            }
            if self.candidates.iter().all(BTreeSet::is_empty) {
                return Some(self.no_match());
            }
        }

        let hard_limit = (2 * self.window).max(self.window + self.grace);
        let expired = self.max_duration.is_some_and(|d| started.elapsed() >= d);
        if self.batches >= hard_limit || expired {
            return Some(self.no_match());
        }
        None
    }

    fn no_match(&self) -> FingerprintResult {
        FingerprintResult::NoMatch {
            fingerprint: self.fingerprint.clone(),
        }
    }

    /// Result once input has run out: the decision if one was reached,
    /// otherwise no match.
    pub fn finish(&mut self) -> FingerprintResult {
        self.decided.clone().unwrap_or_else(|| self.no_match())
    }
}

/// A platform survives if one of its snapshots lacks the address or
/// records it with exactly this length.
fn consistent(snapshots: &[Snapshot], address: u32, len: usize) -> bool {
    snapshots
        .iter()
        .any(|s| s.get(&address).is_none_or(|&expected| expected == len))
}

/// Drive a fingerprinter over received batches until it decides or the
/// input ends.
pub fn can_fingerprint(
    fingerprinter: &mut Fingerprinter,
    batches: impl IntoIterator<Item = CanBatch>,
) -> FingerprintResult {
    for batch in batches {
        if let FingerprintState::Decided(result) = fingerprinter.observe(&batch) {
            return result;
        }
    }
    fingerprinter.finish()
}
