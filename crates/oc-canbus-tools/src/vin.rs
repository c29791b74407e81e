//! VIN query over UDS, OBD-II mode 09 and a few brand-specific services.

use std::time::Duration;

use oc_protocol::{EcuAddr, Vin, hex_bytes};
use serde::Serialize;

use crate::error::CanResult;
use crate::parallel_query::{DEFAULT_TOTAL_TIMEOUT, IsoTpParallelQuery};
use crate::transport::CanTransport;
use crate::types::{FUNCTIONAL_ADDRS, OBD_REQUEST_ID};
use crate::uds::rx_addr_for_tx_addr;

/// Physical addresses that answer standard VIN queries.
pub const STANDARD_VIN_ADDRS: &[u32] = &[0x7E0, 0x7E2, 0x18DA_10F1, 0x18DA_0EF1];

struct VinRequest {
    request: &'static [u8],
    response: &'static [u8],
    buses: &'static [u8],
    addrs: &'static [u32],
    functional: bool,
    rx_offset: u32,
}

const VIN_REQUESTS: &[VinRequest] = &[
    // UDS ReadDataByIdentifier 0xF190
    VinRequest {
        request: &[0x22, 0xF1, 0x90],
        response: &[0x62, 0xF1, 0x90],
        buses: &[0, 1],
        addrs: STANDARD_VIN_ADDRS,
        functional: true,
        rx_offset: 0x8,
    },
    // OBD-II mode 09 PID 02
    VinRequest {
        request: &[0x09, 0x02],
        response: &[0x49, 0x02, 0x01],
        buses: &[0, 1],
        addrs: STANDARD_VIN_ADDRS,
        functional: true,
        rx_offset: 0x8,
    },
    // GM forward camera
    VinRequest {
        request: &[0x1A, 0x90],
        response: &[0x5A, 0x90],
        buses: &[0],
        addrs: &[0x24B],
        functional: false,
        rx_offset: 0x400,
    },
    // Nissan VCM, KWP local identifier 0x81
    VinRequest {
        request: &[0x21, 0x81],
        response: &[0x61, 0x81],
        buses: &[0],
        addrs: &[0x797],
        functional: false,
        rx_offset: 0x3,
    },
    // Volkswagen forward camera
    VinRequest {
        request: &[0x22, 0xF1, 0x90],
        response: &[0x62, 0xF1, 0x90],
        buses: &[0],
        addrs: &[0x74F],
        functional: false,
        rx_offset: 0x6A,
    },
];

/// Outcome of a VIN query. Address and bus are `None` when nothing answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VinResult {
    pub rx_address: Option<u32>,
    pub bus: Option<u8>,
    pub vin: Vin,
}

impl VinResult {
    pub fn unknown() -> Self {
        Self {
            rx_address: None,
            bus: None,
            vin: Vin::unknown(),
        }
    }
}

/// Every physical address a functional VIN broadcast may be answered on.
/// Flow control must reach any ECU that starts a segmented answer.
fn functional_tx_addrs() -> Vec<u32> {
    (0x700..0x800)
        .filter(|&a| a != OBD_REQUEST_ID)
        .chain((0..=0xFF).map(|i| 0x18DA_00F1 + (i << 8)))
        .collect()
}

/// Strip padding some ECUs add around the 17 VIN characters.
pub fn clean_vin(raw: &[u8]) -> &[u8] {
    let mut vin = raw;
    if matches!(vin.len(), 19 | 24) {
        while let [rest @ .., 0] = vin {
            vin = rest;
        }
    }
    // length-prefixed answers
    if vin.first() == Some(&0x11) && vin.len() >= 18 {
        vin = &vin[1..18];
    }
    vin
}

/// Query the VIN on each bus, `retries` rounds over all request kinds.
/// Returns the unknown VIN when no ECU answers with a valid one.
pub async fn get_vin(
    transport: &dyn CanTransport,
    buses: &[u8],
    timeout: Duration,
    retries: usize,
) -> VinResult {
    for attempt in 0..retries {
        for &bus in buses {
            for req in VIN_REQUESTS.iter().filter(|r| r.buses.contains(&bus)) {
                match query_vin(transport, bus, req, timeout).await {
                    Ok(Some(result)) => return result,
                    Ok(None) => {}
                    Err(e) => tracing::error!(bus, error = %e, "VIN query failed"),
                }
            }
        }
        tracing::warn!(attempt = attempt + 1, retries, "VIN query retry");
    }
    VinResult::unknown()
}

async fn query_vin(
    transport: &dyn CanTransport,
    bus: u8,
    req: &VinRequest,
    timeout: Duration,
) -> CanResult<Option<VinResult>> {
    let tx_addrs = if req.functional {
        functional_tx_addrs()
    } else {
        req.addrs.to_vec()
    };
    let mut query = IsoTpParallelQuery::new(
        transport,
        bus,
        tx_addrs.into_iter().map(|a| EcuAddr::new(a, None)).collect(),
        vec![req.request.to_vec()],
        vec![req.response.to_vec()],
    )?
    .with_response_offset(req.rx_offset);
    if req.functional {
        query = query.with_functional_addrs(FUNCTIONAL_ADDRS.to_vec());
    }
    let results = query.get_data(timeout, DEFAULT_TOTAL_TIMEOUT).await?;

    for &addr in req.addrs {
        let Some(raw) = results.get(&EcuAddr::new(addr, None)) else {
            continue;
        };
        let text = String::from_utf8_lossy(clean_vin(raw)).into_owned();
        match Vin::parse(&text) {
            Ok(vin) => {
                tracing::info!(
                    address = format!("0x{addr:X}"),
                    bus,
                    request = hex_bytes(req.request),
                    vin = vin.as_str(),
                    "got VIN"
                );
                return Ok(Some(VinResult {
                    rx_address: rx_addr_for_tx_addr(addr, req.rx_offset)?,
                    bus: Some(bus),
                    vin,
                }));
            }
            Err(e) => tracing::warn!(
                address = format!("0x{addr:X}"),
                raw = hex_bytes(raw),
                error = %e,
                "invalid VIN"
            ),
        }
    }
    Ok(None)
}
