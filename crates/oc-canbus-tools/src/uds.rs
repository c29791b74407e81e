//! UDS / KWP service identifiers and diagnostic addressing.

use crate::error::{CanError, CanResult};
use crate::types::FUNCTIONAL_ADDRS;

// ── Services ────────────────────────────────────────────────────

pub const DIAGNOSTIC_SESSION_CONTROL: u8 = 0x10;
pub const READ_ECU_IDENTIFICATION: u8 = 0x1A;
pub const READ_DATA_BY_LOCAL_IDENTIFIER: u8 = 0x21;
pub const READ_DATA_BY_IDENTIFIER: u8 = 0x22;
pub const TESTER_PRESENT: u8 = 0x3E;

/// OBD-II mode 09: vehicle information.
pub const OBD_VEHICLE_INFO: u8 = 0x09;

/// Added to a request service ID to form its positive response ID.
pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;

/// Service ID of every negative response.
pub const NEGATIVE_RESPONSE: u8 = 0x7F;

// ── Negative response codes ─────────────────────────────────────

pub const NRC_SERVICE_NOT_SUPPORTED: u8 = 0x11;
pub const NRC_REQUEST_OUT_OF_RANGE: u8 = 0x31;
/// The ECU accepted the request but needs more time.
pub const NRC_RESPONSE_PENDING: u8 = 0x78;

// ── Data identifiers ────────────────────────────────────────────

pub const DID_APPLICATION_SOFTWARE_IDENTIFICATION: u16 = 0xF181;
pub const DID_VEHICLE_MANUFACTURER_ECU_SOFTWARE_NUMBER: u16 = 0xF188;
pub const DID_VIN: u16 = 0xF190;

/// `ReadDataByIdentifier` request for one DID.
pub fn read_data_by_identifier(did: u16) -> Vec<u8> {
    let [hi, lo] = did.to_be_bytes();
    vec![READ_DATA_BY_IDENTIFIER, hi, lo]
}

/// Positive response prefix for a `ReadDataByIdentifier` request.
pub fn read_data_by_identifier_response(did: u16) -> Vec<u8> {
    let [hi, lo] = did.to_be_bytes();
    vec![READ_DATA_BY_IDENTIFIER + POSITIVE_RESPONSE_OFFSET, hi, lo]
}

/// Negative response code of a `0x7F <sid> <nrc>` payload.
pub fn negative_response_code(response: &[u8]) -> Option<u8> {
    match response {
        [NEGATIVE_RESPONSE, _, nrc, ..] => Some(*nrc),
        _ => None,
    }
}

/// Physical response address for a request address.
///
/// 11-bit IDs answer at `tx + offset`; normal-fixed 29-bit IDs swap the
/// target and source bytes. Functional addresses have no single response
/// address.
pub fn rx_addr_for_tx_addr(tx_addr: u32, offset: u32) -> CanResult<Option<u32>> {
    if FUNCTIONAL_ADDRS.contains(&tx_addr) {
        return Ok(None);
    }
    if tx_addr < 0xFFF8 {
        return Ok(Some(tx_addr + offset));
    }
    if tx_addr > 0x1000_0000 && tx_addr < 0xFFFF_FFFF {
        let swapped = (tx_addr & 0xFFFF_0000) | ((tx_addr << 8) & 0xFF00) | ((tx_addr >> 8) & 0xFF);
        return Ok(Some(swapped));
    }
    Err(CanError::InvalidAddress { address: tx_addr })
}

/// Inverse of [`rx_addr_for_tx_addr`]: the request address an ECU
/// answering on `rx_addr` was addressed on.
pub fn tx_addr_for_rx_addr(rx_addr: u32, offset: u32) -> Option<u32> {
    if rx_addr < 0xFFF8 {
        return rx_addr.checked_sub(offset);
    }
    if rx_addr > 0x1000_0000 && rx_addr < 0xFFFF_FFFF {
        // the byte swap is its own inverse
        return rx_addr_for_tx_addr(rx_addr, offset).ok().flatten();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_offset() {
        assert_eq!(rx_addr_for_tx_addr(0x7E0, 8).unwrap(), Some(0x7E8));
        assert_eq!(rx_addr_for_tx_addr(0x750, 0x6A).unwrap(), Some(0x7BA));
    }

    #[test]
    fn extended_swaps_last_two_bytes() {
        assert_eq!(rx_addr_for_tx_addr(0x18DA_30F1, 8).unwrap(), Some(0x18DA_F130));
        assert_eq!(rx_addr_for_tx_addr(0x18DA_F130, 8).unwrap(), Some(0x18DA_30F1));
    }

    #[test]
    fn inverse_mapping() {
        assert_eq!(tx_addr_for_rx_addr(0x7E8, 8), Some(0x7E0));
        assert_eq!(tx_addr_for_rx_addr(0x77F, 0x6A), Some(0x715));
        assert_eq!(tx_addr_for_rx_addr(0x4, 8), None);
        assert_eq!(tx_addr_for_rx_addr(0x18DA_F130, 8), Some(0x18DA_30F1));
    }

    #[test]
    fn functional_has_no_response_address() {
        assert_eq!(rx_addr_for_tx_addr(0x7DF, 8).unwrap(), None);
        assert_eq!(rx_addr_for_tx_addr(0x18DB_33F1, 8).unwrap(), None);
    }

    #[test]
    fn invalid_address() {
        assert!(matches!(
            rx_addr_for_tx_addr(0x0100_0000, 8),
            Err(CanError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn did_requests() {
        assert_eq!(read_data_by_identifier(DID_VIN), vec![0x22, 0xF1, 0x90]);
        assert_eq!(read_data_by_identifier_response(DID_VIN), vec![0x62, 0xF1, 0x90]);
        assert_eq!(negative_response_code(&[0x7F, 0x22, 0x78]), Some(NRC_RESPONSE_PENDING));
        assert_eq!(negative_response_code(&[0x62, 0xF1, 0x90]), None);
    }
}
