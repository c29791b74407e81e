//! In-memory model of a parsed DBC file.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::checksum::{ChecksumKind, ChecksumLayout};
use crate::error::{DbcError, DbcResult};
use crate::include::FsIncludeResolver;

/// Largest supported message, in bytes (CAN-FD).
pub const MAX_MESSAGE_SIZE: usize = 64;

/// Big-endian ("Motorola") bit order for a 64-byte frame: byte-major,
/// bit 7 first within each byte. Index `k` is the k-th bit of a signal
/// walking from its MSB towards its LSB.
pub static BE_BITS: LazyLock<[usize; MAX_MESSAGE_SIZE * 8]> = LazyLock::new(|| {
    let mut bits = [0usize; MAX_MESSAGE_SIZE * 8];
    let mut k = 0;
    for byte in 0..MAX_MESSAGE_SIZE {
        for bit in (0..8).rev() {
            bits[k] = byte * 8 + bit;
            k += 1;
        }
    }
    bits
});

/// Position of `bit` in [`BE_BITS`].
fn be_index(bit: usize) -> Option<usize> {
    ((bit / 8) * 8).checked_add(7 - bit % 8)
}

/// Compute `(msb, lsb)` for a signal. `None` if a big-endian signal would
/// run off the end of the largest supported frame, or if the DBC numbers
/// overflow.
pub fn bit_layout(start_bit: usize, size: usize, little_endian: bool) -> Option<(usize, usize)> {
    if size == 0 {
        return None;
    }
    if little_endian {
        Some((start_bit.checked_add(size - 1)?, start_bit))
    } else {
        let idx = be_index(start_bit)?.checked_add(size - 1)?;
        BE_BITS.get(idx).map(|&lsb| (start_bit, lsb))
    }
}

/// A DBC numeric literal, kept as written so integer factors stay exact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn parse(s: &str) -> Option<Self> {
        if let Ok(i) = s.parse::<i64>() {
            return Some(Number::Int(i));
        }
        s.parse::<f64>().ok().map(Number::Float)
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

/// Role of a signal in a multiplexed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Multiplex {
    /// Always present.
    None,
    /// Selects which multiplexed signals are present.
    Multiplexor,
    /// Present only when the multiplexor has this raw value.
    Multiplexed(u64),
}

/// How the codec treats a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
    Normal,
    Counter,
    Checksum(ChecksumKind),
}

/// One bit-field inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDef {
    pub name: String,
    pub start_bit: usize,
    pub size: usize,
    /// Bit position of the most significant bit (derived at load time).
    pub msb: usize,
    /// Bit position of the least significant bit (derived at load time).
    pub lsb: usize,
    pub is_little_endian: bool,
    pub is_signed: bool,
    pub factor: Number,
    pub offset: Number,
    /// Declared physical range; informational, never clamped.
    pub min: Number,
    pub max: Number,
    pub unit: String,
    pub receivers: Vec<String>,
    pub multiplex: Multiplex,
    pub kind: SignalType,
}

impl SignalDef {
    /// Build a plain signal, deriving `msb`/`lsb`. `None` if the geometry is
    /// impossible for a 64-byte frame.
    pub fn new(
        name: impl Into<String>,
        start_bit: usize,
        size: usize,
        is_little_endian: bool,
        is_signed: bool,
        factor: Number,
        offset: Number,
    ) -> Option<Self> {
        if size > 64 {
            return None;
        }
        let (msb, lsb) = bit_layout(start_bit, size, is_little_endian)?;
        Some(Self {
            name: name.into(),
            start_bit,
            size,
            msb,
            lsb,
            is_little_endian,
            is_signed,
            factor,
            offset,
            min: Number::Int(0),
            max: Number::Int(0),
            unit: String::new(),
            receivers: Vec::new(),
            multiplex: Multiplex::None,
            kind: SignalType::Normal,
        })
    }

    /// Whether the signal lies entirely inside a message of `size` bytes.
    pub fn fits(&self, size: usize) -> bool {
        let bits = size * 8;
        self.msb < bits && self.lsb < bits
    }

    /// Byte holding the signal's start bit (the byte checksums skip).
    pub fn start_byte(&self) -> usize {
        self.start_bit / 8
    }

    /// Sign-extend a raw field value.
    pub fn signed_raw(&self, raw: u64) -> i64 {
        if self.is_signed && self.size < 64 && (raw >> (self.size - 1)) & 1 == 1 {
            raw as i64 - (1i64 << self.size)
        } else {
            raw as i64
        }
    }

    /// Raw field value -> physical value.
    pub fn to_physical(&self, raw: u64) -> f64 {
        let value = if self.is_signed {
            i128::from(self.signed_raw(raw))
        } else {
            i128::from(raw)
        };
        match (self.factor, self.offset) {
            (Number::Int(f), Number::Int(o)) => (value * i128::from(f) + i128::from(o)) as f64,
            (f, o) => value as f64 * f.as_f64() + o.as_f64(),
        }
    }

    /// Physical value -> raw field value (two's complement, unmasked).
    pub fn to_raw(&self, value: f64) -> u64 {
        let raw = ((value - self.offset.as_f64()) / self.factor.as_f64()).round();
        if raw < 0.0 {
            raw as i64 as u64
        } else {
            raw as u64
        }
    }
}

/// One message definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDef {
    pub address: u32,
    pub name: String,
    /// Length in bytes.
    pub size: usize,
    pub sender: String,
    /// Sorted by start bit.
    pub signals: Vec<SignalDef>,
}

impl MessageDef {
    pub fn signal(&self, name: &str) -> Option<&SignalDef> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// Names a caller may pass to the packer for this message.
    pub fn signal_names(&self) -> BTreeSet<&str> {
        self.signals.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn multiplexor(&self) -> Option<&SignalDef> {
        self.signals
            .iter()
            .find(|s| s.multiplex == Multiplex::Multiplexor)
    }

    pub fn checksum_signal(&self) -> Option<&SignalDef> {
        self.signals
            .iter()
            .find(|s| matches!(s.kind, SignalType::Checksum(_)))
    }

    pub fn counter_signal(&self) -> Option<&SignalDef> {
        self.signals.iter().find(|s| s.kind == SignalType::Counter)
    }
}

/// Raw value -> symbolic label for one signal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueTable {
    pub entries: BTreeMap<i64, String>,
}

impl ValueTable {
    pub fn label(&self, raw: i64) -> Option<&str> {
        self.entries.get(&raw).map(String::as_str)
    }

    pub fn value_of(&self, label: &str) -> Option<i64> {
        self.entries
            .iter()
            .find(|(_, l)| l.as_str() == label)
            .map(|(v, _)| *v)
    }
}

/// Immutable message catalog. Safe to share between threads once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    name: String,
    messages: BTreeMap<u32, MessageDef>,
    names: HashMap<String, u32>,
    value_tables: BTreeMap<u32, BTreeMap<String, ValueTable>>,
    checksum: Option<ChecksumLayout>,
}

impl Catalog {
    pub(crate) fn new(
        name: String,
        messages: BTreeMap<u32, MessageDef>,
        value_tables: BTreeMap<u32, BTreeMap<String, ValueTable>>,
        checksum: Option<ChecksumLayout>,
    ) -> Self {
        let names = messages
            .values()
            .map(|m| (m.name.clone(), m.address))
            .collect();
        Self {
            name,
            messages,
            names,
            value_tables,
            checksum,
        }
    }

    /// Load a DBC file, resolving includes next to it. The checksum layout
    /// is chosen from the file stem.
    pub fn from_file(path: impl AsRef<Path>) -> DbcResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| DbcError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let resolver = FsIncludeResolver::new(path.parent().unwrap_or_else(|| Path::new(".")));
        let layout = ChecksumLayout::for_dbc(&name);
        crate::dbc::parse_with(&name, &text, &resolver, layout)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn checksum_layout(&self) -> Option<&ChecksumLayout> {
        self.checksum.as_ref()
    }

    pub fn message(&self, address: u32) -> Option<&MessageDef> {
        self.messages.get(&address)
    }

    pub fn message_by_name(&self, name: &str) -> Option<&MessageDef> {
        self.address_of(name).and_then(|a| self.messages.get(&a))
    }

    pub fn address_of(&self, name: &str) -> Option<u32> {
        self.names.get(name).copied()
    }

    pub fn messages(&self) -> impl Iterator<Item = &MessageDef> {
        self.messages.values()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Valid signal names for a message, for validating values at the boundary.
    pub fn signal_names(&self, address: u32) -> Option<BTreeSet<&str>> {
        self.message(address).map(MessageDef::signal_names)
    }

    pub fn value_table(&self, address: u32, signal: &str) -> Option<&ValueTable> {
        self.value_tables.get(&address).and_then(|t| t.get(signal))
    }

    /// Symbolic label for a decoded physical value, if the file defines one.
    pub fn label(&self, address: u32, signal: &str, value: f64) -> Option<&str> {
        self.value_table(address, signal)
            .and_then(|t| t.label(value.round() as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn be_table_order() {
        assert_eq!(&BE_BITS[..10], &[7, 6, 5, 4, 3, 2, 1, 0, 15, 14]);
        assert_eq!(BE_BITS[511], 504);
    }

    #[test]
    fn little_endian_layout() {
        assert_eq!(bit_layout(0, 16, true), Some((15, 0)));
        assert_eq!(bit_layout(12, 4, true), Some((15, 12)));
    }

    #[test]
    fn big_endian_layout() {
        // 16-bit Motorola signal starting at bit 7 spans bytes 0..=1
        assert_eq!(bit_layout(7, 16, false), Some((7, 8)));
        // 4-bit nibble in the low half of byte 7
        assert_eq!(bit_layout(59, 4, false), Some((59, 56)));
    }

    #[test]
    fn big_endian_last_byte_of_fd_frame() {
        // byte 63, full width
        assert_eq!(bit_layout(511, 8, false), Some((511, 504)));
        // running past byte 63 is impossible
        assert_eq!(bit_layout(511, 9, false), None);
    }

    #[test]
    fn overflowing_start_bit_has_no_layout() {
        assert_eq!(bit_layout(usize::MAX, 16, true), None);
        assert_eq!(bit_layout(usize::MAX, 1, false), None);
        assert_eq!(bit_layout(usize::MAX - 3, 8, false), None);
    }

    #[test]
    fn unsigned_raw_keeps_full_width() {
        let sig = SignalDef::new("U", 0, 64, true, false, Number::Int(1), Number::Int(0)).unwrap();
        let big = 2f64.powi(63) + 4096.0;
        assert_eq!(sig.to_raw(big), (1u64 << 63) + 4096);
        assert_eq!(sig.to_raw(-1.0), u64::MAX);
    }

    #[test]
    fn number_keeps_integers() {
        assert_eq!(Number::parse("1"), Some(Number::Int(1)));
        assert_eq!(Number::parse("-40"), Some(Number::Int(-40)));
        assert_eq!(Number::parse("0.01"), Some(Number::Float(0.01)));
        assert_eq!(Number::parse("1e-3"), Some(Number::Float(0.001)));
        assert_eq!(Number::parse("x"), None);
    }

    #[test]
    fn signed_physical() {
        let sig = SignalDef::new("S", 0, 8, true, true, Number::Int(1), Number::Int(0)).unwrap();
        assert_eq!(sig.to_physical(0xFF), -1.0);
        assert_eq!(sig.to_physical(0x7F), 127.0);
        assert_eq!(sig.to_raw(-1.0) & 0xFF, 0xFF);
    }

    #[test]
    fn full_width_signed() {
        let sig = SignalDef::new("S", 0, 64, true, true, Number::Int(1), Number::Int(0)).unwrap();
        assert_eq!(sig.signed_raw(u64::MAX), -1);
    }
}
