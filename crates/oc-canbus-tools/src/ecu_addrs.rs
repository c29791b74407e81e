//! ECU presence discovery via TesterPresent.
//!
//! A `3E 00` request goes to every candidate address at once; whatever
//! answers with a positive (or negative TesterPresent) response before the
//! timeout is present. Only identification of who is on the bus happens
//! here, no firmware is read.

use std::collections::BTreeSet;
use std::time::Duration;

use oc_protocol::{CanFrame, EcuAddrBus, hex_bytes};
use tokio::time::Instant;

use crate::error::CanResult;
use crate::transport::CanTransport;
use crate::types::pad_frame;
use crate::uds::{NEGATIVE_RESPONSE, POSITIVE_RESPONSE_OFFSET, TESTER_PRESENT};

/// TesterPresent request frame for one address.
pub fn tester_present_msg(address: u32, bus: u8, sub_addr: Option<u8>) -> CanFrame {
    let mut data = Vec::with_capacity(8);
    data.extend(sub_addr);
    data.extend([0x02, TESTER_PRESENT, 0x00]);
    CanFrame::new(address, pad_frame(data), bus)
}

/// Whether a frame is a TesterPresent answer, positive or negative.
pub fn is_tester_present_response(frame: &CanFrame, sub_addr: Option<u8>) -> bool {
    if frame.data.len() != 8 {
        return false;
    }
    let off = usize::from(sub_addr.is_some());
    let dat = &frame.data;
    if !(1..=7).contains(&dat[off]) {
        return false;
    }
    dat[off + 1] == TESTER_PRESENT + POSITIVE_RESPONSE_OFFSET
        || (dat[off + 1] == NEGATIVE_RESPONSE && dat[off + 2] == TESTER_PRESENT)
}

/// Send TesterPresent to every query address and collect the response
/// addresses that answer within `timeout`.
///
/// `queries` are `(tx address, sub-address, bus)`; `responses` are the
/// `(rx address, sub-address, bus)` to listen for. Transport errors end the
/// scan early with whatever was found so far.
pub async fn get_ecu_addrs(
    transport: &dyn CanTransport,
    queries: &BTreeSet<EcuAddrBus>,
    responses: &BTreeSet<EcuAddrBus>,
    timeout: Duration,
) -> BTreeSet<EcuAddrBus> {
    let mut found = BTreeSet::new();
    if let Err(e) = scan(transport, queries, responses, timeout, &mut found).await {
        tracing::error!(error = %e, "ECU address scan failed");
    }
    found
}

async fn scan(
    transport: &dyn CanTransport,
    queries: &BTreeSet<EcuAddrBus>,
    responses: &BTreeSet<EcuAddrBus>,
    timeout: Duration,
    found: &mut BTreeSet<EcuAddrBus>,
) -> CanResult<()> {
    let msgs: Vec<CanFrame> = queries
        .iter()
        .map(|q| tester_present_msg(q.address, q.bus, q.sub_address))
        .collect();

    transport.drain().await?;
    transport.send(&msgs).await?;

    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        for batch in transport.recv(true).await? {
            for frame in batch.frames {
                if frame.data.is_empty() {
                    tracing::warn!(
                        address = format!("0x{:X}", frame.address),
                        "empty frame during ECU scan"
                    );
                    continue;
                }

                let sub_addr = if responses.contains(&EcuAddrBus::new(frame.address, None, frame.src)) {
                    None
                } else {
                    Some(frame.data[0])
                };
                let key = EcuAddrBus::new(frame.address, sub_addr, frame.src);
                if responses.contains(&key) && is_tester_present_response(&frame, sub_addr) {
                    tracing::debug!(
                        address = format!("0x{:X}", frame.address),
                        bus = frame.src,
                        data = hex_bytes(&frame.data),
                        "ECU present"
                    );
                    found.insert(key);
                }
            }
        }
    }
    Ok(())
}
