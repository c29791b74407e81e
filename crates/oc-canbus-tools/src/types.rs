//! Diagnostic CAN IDs and ISO-TP frame constants.

// ── OBD-II / UDS CAN IDs ────────────────────────────────────────

/// Standard 11-bit functional (broadcast) request ID.
pub const OBD_REQUEST_ID: u32 = 0x7DF;

/// 29-bit functional request ID.
pub const OBD_REQUEST_ID_29BIT: u32 = 0x18DB_33F1;

/// Functional addresses answer on each ECU's physical response ID.
pub const FUNCTIONAL_ADDRS: [u32; 2] = [OBD_REQUEST_ID, OBD_REQUEST_ID_29BIT];

/// First OBD-II physical request ID (engine).
pub const OBD_PHYSICAL_REQUEST_MIN: u32 = 0x7E0;

/// First OBD-II response CAN ID (ECU #1).
pub const OBD_RESPONSE_ID_MIN: u32 = 0x7E8;

/// Last OBD-II response CAN ID (ECU #8).
pub const OBD_RESPONSE_ID_MAX: u32 = 0x7EF;

/// Offset from an 11-bit physical request ID to its response ID.
pub const DEFAULT_RESPONSE_OFFSET: u32 = 0x8;

// ── ISO-TP frame type nibbles (upper nibble of byte 0) ────────

/// Single Frame.
pub const ISOTP_SF: u8 = 0x0;
/// First Frame.
pub const ISOTP_FF: u8 = 0x1;
/// Consecutive Frame.
pub const ISOTP_CF: u8 = 0x2;
/// Flow Control.
pub const ISOTP_FC: u8 = 0x3;

/// Flow status: continue to send.
pub const FC_CONTINUE: u8 = 0x30;
/// Flow status: wait.
pub const FC_WAIT: u8 = 0x31;
/// Flow status: overflow / abort.
pub const FC_OVERFLOW: u8 = 0x32;

/// Classic CAN frame length every ISO-TP frame is padded to.
pub const ISOTP_FRAME_LEN: usize = 8;

/// Largest message ISO-TP can describe with a 12-bit first-frame length.
pub const ISOTP_MAX_LEN: usize = 0xFFF;

/// Pad `data` to a full classic CAN frame.
pub fn pad_frame(mut data: Vec<u8>) -> Vec<u8> {
    if data.len() < ISOTP_FRAME_LEN {
        data.resize(ISOTP_FRAME_LEN, 0x00);
    }
    data
}
