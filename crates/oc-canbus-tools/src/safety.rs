//! CAN bus safety guard. Identification queries are read-only.
//!
//! Allowed services:
//! - 0x01: OBD-II show current data
//! - 0x09: OBD-II request vehicle information (VIN)
//! - 0x10: UDS diagnostic session control (some ECUs only answer in an
//!   extended session)
//! - 0x1A: KWP read ECU identification
//! - 0x21: KWP read data by local identifier
//! - 0x22: UDS read data by identifier
//! - 0x3E: UDS tester present
//!
//! Writes, resets, routines and DTC clearing are blocked.

use crate::error::{CanError, CanResult};

/// Services allowed on the bus during identification.
pub const ALLOWED_SERVICES: &[u8] = &[0x01, 0x09, 0x10, 0x1A, 0x21, 0x22, 0x3E];

/// Validates that a service is allowed under the current safety policy.
pub fn is_service_allowed(service: u8) -> bool {
    ALLOWED_SERVICES.contains(&service)
}

/// Check the service byte of a request payload.
pub fn check_request(request: &[u8]) -> CanResult<()> {
    match request.first() {
        Some(&service) if is_service_allowed(service) => Ok(()),
        Some(&service) => Err(CanError::SafetyViolation { service }),
        None => Err(CanError::Protocol("empty request".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_services() {
        assert!(is_service_allowed(0x3E)); // Tester present
        assert!(is_service_allowed(0x22)); // Read data by identifier
        assert!(is_service_allowed(0x09)); // Vehicle info
        assert!(is_service_allowed(0x1A)); // KWP identification
    }

    #[test]
    fn blocked_services() {
        assert!(!is_service_allowed(0x04)); // Clear DTCs
        assert!(!is_service_allowed(0x11)); // ECU reset
        assert!(!is_service_allowed(0x14)); // Clear diagnostic information
        assert!(!is_service_allowed(0x2E)); // Write data by identifier
        assert!(!is_service_allowed(0x31)); // Routine control
        assert!(!is_service_allowed(0x34)); // Request download
    }

    #[test]
    fn check_request_payloads() {
        assert!(check_request(&[0x22, 0xF1, 0x90]).is_ok());
        assert!(matches!(
            check_request(&[0x2E, 0xF1, 0x90, 0x00]),
            Err(CanError::SafetyViolation { service: 0x2E })
        ));
        assert!(matches!(check_request(&[]), Err(CanError::Protocol(_))));
    }
}
