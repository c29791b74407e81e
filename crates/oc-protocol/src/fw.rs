//! Firmware versions collected from ECUs during identification.

use serde::{Deserialize, Serialize};

use crate::ecu::{Ecu, EcuAddr};

/// One firmware identifier returned by one ECU for one query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CarFw {
    /// Role the queried address is known to have (`Unknown` if not in any table).
    pub ecu: Ecu,
    /// Raw firmware version bytes, response prefix stripped.
    pub fw_version: Vec<u8>,
    /// Transmit (request) address.
    pub address: u32,
    /// Address the response arrived on.
    pub response_address: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_address: Option<u8>,
    /// Request bytes that produced this response (last step of the request).
    pub request: Vec<u8>,
    /// Brand whose query config issued the request.
    pub brand: String,
    /// Bus the query ran on.
    pub bus: u8,
    /// Collected for logging only; never used for identification.
    #[serde(default)]
    pub logging: bool,
    #[serde(default)]
    pub obd_multiplexing: bool,
}

impl CarFw {
    pub fn addr(&self) -> EcuAddr {
        EcuAddr::new(self.address, self.sub_address)
    }

    /// Firmware bytes as lossy text for logs.
    pub fn version_lossy(&self) -> String {
        String::from_utf8_lossy(&self.fw_version).into_owned()
    }
}
