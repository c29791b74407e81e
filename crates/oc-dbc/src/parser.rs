//! Stateful receive-side decoder with checksum and counter validation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use oc_protocol::{CanBatch, CanFrame, hex_bytes};

use crate::catalog::{Catalog, MessageDef};
use crate::codec::{SignalValues, get_raw_value, mask, unpack_message, verify_checksum};
use crate::error::{CodecError, CodecResult};

/// Consecutive counter faults after which a message is considered invalid.
pub const MAX_BAD_COUNTER: u32 = 5;

/// A message the parser should track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscription {
    Address(u32),
    Name(String),
}

impl From<u32> for Subscription {
    fn from(address: u32) -> Self {
        Subscription::Address(address)
    }
}

impl From<&str> for Subscription {
    fn from(name: &str) -> Self {
        Subscription::Name(name.to_string())
    }
}

#[derive(Debug, Clone, Default)]
struct MessageState {
    values: SignalValues,
    all_values: BTreeMap<String, Vec<f64>>,
    nanos: Option<u64>,
    counter: Option<u64>,
    counter_fail: u32,
}

impl MessageState {
    /// Track the rolling counter. Returns false once too many frames in a row
    /// have skipped or repeated a count.
    fn update_counter(&mut self, msg: &MessageDef, data: &[u8]) -> bool {
        let Some(sig) = msg.counter_signal() else {
            return true;
        };
        let current = get_raw_value(data, sig);
        let expected = self.counter.map(|previous| previous.wrapping_add(1) & mask(sig.size));
        if let Some(expected) = expected
            && expected != current
        {
            self.counter_fail = (self.counter_fail + 1).min(MAX_BAD_COUNTER);
            tracing::warn!(
                address = format!("0x{:X}", msg.address),
                expected,
                got = current,
                "counter mismatch"
            );
        } else if self.counter_fail > 0 {
            self.counter_fail -= 1;
        }
        self.counter = Some(current);
        self.counter_fail < MAX_BAD_COUNTER
    }
}

/// Decodes the subscribed messages of one bus. Owned by a single session.
#[derive(Debug, Clone)]
pub struct CanParser {
    catalog: Arc<Catalog>,
    bus: u8,
    states: HashMap<u32, MessageState>,
}

impl CanParser {
    pub fn new(
        catalog: Arc<Catalog>,
        bus: u8,
        subscriptions: impl IntoIterator<Item = Subscription>,
    ) -> CodecResult<Self> {
        let mut states = HashMap::new();
        for sub in subscriptions {
            let address = match sub {
                Subscription::Address(address) => catalog
                    .message(address)
                    .map(|m| m.address)
                    .ok_or(CodecError::UnknownMessage { address })?,
                Subscription::Name(name) => catalog
                    .address_of(&name)
                    .ok_or(CodecError::UnknownMessageName { name })?,
            };
            states.insert(address, MessageState::default());
        }
        Ok(Self {
            catalog,
            bus,
            states,
        })
    }

    pub fn bus(&self) -> u8 {
        self.bus
    }

    /// Feed received batches. Returns the addresses that got new values, in
    /// arrival order.
    pub fn update(&mut self, batches: &[CanBatch]) -> Vec<u32> {
        for state in self.states.values_mut() {
            state.all_values.clear();
        }

        let bus = self.bus;
        let mut updated = Vec::new();
        for batch in batches {
            for frame in batch.frames.iter().filter(|f| f.src == bus) {
                if self.parse_frame(frame, batch.nanos) {
                    updated.push(frame.address);
                }
            }
        }
        updated
    }

    fn parse_frame(&mut self, frame: &CanFrame, nanos: u64) -> bool {
        let Some(state) = self.states.get_mut(&frame.address) else {
            return false;
        };
        let Some(msg) = self.catalog.message(frame.address) else {
            return false;
        };

        let values = match unpack_message(msg, &frame.data) {
            Ok(values) => values,
            Err(e) => {
                tracing::debug!(address = format!("0x{:X}", frame.address), error = %e, "frame skipped");
                return false;
            }
        };

        match verify_checksum(msg, &frame.data) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    address = format!("0x{:X}", frame.address),
                    data = %hex_bytes(&frame.data),
                    "checksum mismatch, frame dropped"
                );
                return false;
            }
            Err(e) => {
                tracing::warn!(address = format!("0x{:X}", frame.address), error = %e, "checksum unavailable");
                return false;
            }
        }

        if !state.update_counter(msg, &frame.data) {
            return false;
        }

        for (name, value) in &values {
            state
                .all_values
                .entry(name.clone())
                .or_default()
                .push(*value);
        }
        state.values = values;
        state.nanos = Some(nanos);
        true
    }

    /// Latest decoded values of a message.
    pub fn vl(&self, address: u32) -> Option<&SignalValues> {
        self.states
            .get(&address)
            .filter(|s| s.nanos.is_some())
            .map(|s| &s.values)
    }

    pub fn vl_by_name(&self, name: &str) -> Option<&SignalValues> {
        self.catalog.address_of(name).and_then(|a| self.vl(a))
    }

    /// Every value decoded for a message during the last `update`.
    pub fn vl_all(&self, address: u32) -> Option<&BTreeMap<String, Vec<f64>>> {
        self.states.get(&address).map(|s| &s.all_values)
    }

    /// Batch timestamp of the last accepted frame.
    pub fn ts(&self, address: u32) -> Option<u64> {
        self.states.get(&address).and_then(|s| s.nanos)
    }

    /// Whether a message has been seen and its counter is healthy.
    pub fn is_valid(&self, address: u32) -> bool {
        self.states
            .get(&address)
            .is_some_and(|s| s.nanos.is_some() && s.counter_fail < MAX_BAD_COUNTER)
    }

    /// All subscribed messages seen and none with a failed counter.
    pub fn can_valid(&self) -> bool {
        self.states.keys().all(|&a| self.is_valid(a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumLayout;
    use crate::dbc::parse_with;
    use crate::include::NoIncludes;
    use crate::packer::CanPacker;

    const DBC: &str = r#"
BO_ 608 STEER_TORQUE_SENSOR: 8 XXX
 SG_ STEER_TORQUE_DRIVER : 15|16@0- (1,0) [-32768|32767] "" XXX
 SG_ CHECKSUM : 63|8@0+ (1,0) [0|255] "" XXX

BO_ 1552 BODY_CONTROL: 8 XXX
 SG_ DOOR_OPEN : 0|1@0+ (1,0) [0|1] "" XXX
"#;

    const COUNTED_DBC: &str = r#"
BO_ 296 VSA_STATUS: 4 XXX
 SG_ BRAKE : 7|8@0+ (1,0) [0|255] "" XXX
 SG_ COUNTER : 29|2@0+ (1,0) [0|3] "" XXX
 SG_ CHECKSUM : 27|4@0+ (1,0) [0|15] "" XXX
"#;

    fn catalog(name: &str, text: &str) -> Arc<Catalog> {
        Arc::new(parse_with(name, text, &NoIncludes, ChecksumLayout::for_dbc(name)).unwrap())
    }

    fn batch(nanos: u64, frames: Vec<CanFrame>) -> CanBatch {
        CanBatch::new(nanos, frames)
    }

    #[test]
    fn decodes_subscribed_frames_on_its_bus() {
        let cat = catalog("toyota_test", DBC);
        let mut packer = CanPacker::new(cat.clone());
        let mut parser = CanParser::new(cat, 0, [Subscription::from(608), Subscription::from("BODY_CONTROL")]).unwrap();
        assert!(!parser.can_valid());

        let good = packer.pack(608, &[("STEER_TORQUE_DRIVER", -12.0)]).unwrap();
        let updated = parser.update(&[batch(
            10,
            vec![
                CanFrame::new(608, good.clone(), 0),
                CanFrame::new(608, good, 1),
                CanFrame::new(1552, vec![0x01, 0, 0, 0, 0, 0, 0, 0], 0),
            ],
        )]);
        assert_eq!(updated, vec![608, 1552]);
        assert_eq!(parser.vl(608).unwrap()["STEER_TORQUE_DRIVER"], -12.0);
        assert_eq!(parser.vl_by_name("BODY_CONTROL").unwrap()["DOOR_OPEN"], 1.0);
        assert_eq!(parser.ts(608), Some(10));
        assert!(parser.can_valid());
    }

    #[test]
    fn bad_checksum_is_dropped() {
        let cat = catalog("toyota_test", DBC);
        let mut packer = CanPacker::new(cat.clone());
        let mut parser = CanParser::new(cat, 0, [Subscription::Address(608)]).unwrap();

        let mut data = packer.pack(608, &[("STEER_TORQUE_DRIVER", 5.0)]).unwrap();
        data[7] = data[7].wrapping_add(1);
        assert!(parser.update(&[batch(1, vec![CanFrame::new(608, data, 0)])]).is_empty());
        assert!(parser.vl(608).is_none());
    }

    #[test]
    fn wrong_length_is_skipped() {
        let cat = catalog("toyota_test", DBC);
        let mut parser = CanParser::new(cat, 0, [Subscription::Address(1552)]).unwrap();
        assert!(parser.update(&[batch(1, vec![CanFrame::new(1552, vec![1], 0)])]).is_empty());
    }

    #[test]
    fn vl_all_collects_within_one_update() {
        let cat = catalog("toyota_test", DBC);
        let mut parser = CanParser::new(cat, 0, [Subscription::Address(1552)]).unwrap();
        let frame = |v: u8| CanFrame::new(1552, vec![v, 0, 0, 0, 0, 0, 0, 0], 0);
        parser.update(&[batch(1, vec![frame(1)]), batch(2, vec![frame(0), frame(1)])]);
        assert_eq!(parser.vl_all(1552).unwrap()["DOOR_OPEN"], vec![1.0, 0.0, 1.0]);
        parser.update(&[]);
        assert!(parser.vl_all(1552).unwrap().is_empty());
        assert_eq!(parser.ts(1552), Some(2));
    }

    #[test]
    fn counter_faults_invalidate_after_limit() {
        let cat = catalog("honda_test", COUNTED_DBC);
        let mut packer = CanPacker::new(cat.clone());
        let mut parser = CanParser::new(cat, 0, [Subscription::Address(296)]).unwrap();

        // in-sequence frames are accepted
        for n in 0..4 {
            let data = packer.pack(296, &[("COUNTER", n as f64)]).unwrap();
            assert_eq!(parser.update(&[batch(n, vec![CanFrame::new(296, data, 0)])]), vec![296]);
        }
        assert!(parser.is_valid(296));

        // the same counter over and over is a fault every time
        for n in 0..MAX_BAD_COUNTER as u64 {
            let data = packer.pack(296, &[("COUNTER", 1.0)]).unwrap();
            parser.update(&[batch(10 + n, vec![CanFrame::new(296, data, 0)])]);
        }
        assert!(!parser.is_valid(296));
        assert!(!parser.can_valid());
    }

    #[test]
    fn full_width_counter_wraps_without_fault() {
        let text = "BO_ 900 SEQUENCED: 8 XXX\n SG_ COUNTER : 0|64@1+ (1,0) [0|0] \"\" XXX\n";
        let cat = catalog("generic_test", text);
        let mut parser = CanParser::new(cat, 0, [Subscription::Address(900)]).unwrap();
        let frames = [u64::MAX - 1, u64::MAX, 0, 1]
            .into_iter()
            .enumerate()
            .map(|(i, n)| batch(i as u64, vec![CanFrame::new(900, n.to_le_bytes().to_vec(), 0)]))
            .collect::<Vec<_>>();
        parser.update(&frames);
        assert_eq!(parser.states[&900].counter_fail, 0);
        assert_eq!(parser.states[&900].counter, Some(1));
        assert!(parser.is_valid(900));
    }

    #[test]
    fn unknown_subscription_is_an_error() {
        let cat = catalog("toyota_test", DBC);
        assert!(matches!(
            CanParser::new(cat.clone(), 0, [Subscription::Address(0x999)]),
            Err(CodecError::UnknownMessage { address: 0x999 })
        ));
        assert!(matches!(
            CanParser::new(cat, 0, [Subscription::from("NOPE")]),
            Err(CodecError::UnknownMessageName { .. })
        ));
    }
}
