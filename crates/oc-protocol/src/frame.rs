//! Raw CAN frames as seen by the bus layer.

use serde::{Deserialize, Serialize};

/// Largest payload a CAN-FD frame can carry.
pub const MAX_FRAME_LEN: usize = 64;

/// First address outside the 11-bit standard range.
pub const EXTENDED_ADDRESS_MIN: u32 = 0x800;

/// A single CAN frame (classic or FD, 11- or 29-bit address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanFrame {
    /// Arbitration ID.
    pub address: u32,
    /// Payload, 0–64 bytes.
    pub data: Vec<u8>,
    /// Source bus index. Values >= 128 are TX echoes / rejected frames.
    pub src: u8,
}

impl CanFrame {
    pub fn new(address: u32, data: impl Into<Vec<u8>>, src: u8) -> Self {
        Self {
            address,
            data: data.into(),
            src,
        }
    }

    /// Whether the address only fits in a 29-bit identifier.
    pub fn is_extended(&self) -> bool {
        self.address >= EXTENDED_ADDRESS_MIN
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// All frames received together in one read from the bus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanBatch {
    /// Receive timestamp (monotonic nanoseconds).
    pub nanos: u64,
    pub frames: Vec<CanFrame>,
}

impl CanBatch {
    pub fn new(nanos: u64, frames: Vec<CanFrame>) -> Self {
        Self { nanos, frames }
    }
}

/// Render a payload as space-separated hex for log fields.
pub fn hex_bytes(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
