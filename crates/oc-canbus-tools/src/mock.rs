//! Mock CAN transport for testing.
//!
//! Simulates ECUs that speak ISO-TP: each `MockEcu` answers requests on its
//! physical (and optionally functional) address from a response table,
//! segments long answers and honours flow control. Arbitrary frames can
//! also be queued directly. All tests use this instead of real CAN hardware
//! so the suite runs in CI on any platform.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use oc_protocol::{CanBatch, CanFrame, EXTENDED_ADDRESS_MIN};

use crate::error::CanResult;
use crate::transport::CanTransport;
use crate::types::{
    FC_CONTINUE, ISOTP_CF, ISOTP_FC, ISOTP_FF, ISOTP_FRAME_LEN, ISOTP_SF,
    OBD_REQUEST_ID, OBD_REQUEST_ID_29BIT, pad_frame,
};
use crate::uds::{NEGATIVE_RESPONSE, NRC_REQUEST_OUT_OF_RANGE, NRC_RESPONSE_PENDING};

/// How long `recv(true)` waits when nothing is buffered.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A simulated ECU.
#[derive(Debug, Clone)]
pub struct MockEcu {
    /// Address the ECU listens on.
    pub tx_addr: u32,
    /// Address the ECU answers on.
    pub rx_addr: u32,
    pub bus: u8,
    pub sub_addr: Option<u8>,
    /// Also answer requests sent to the functional addresses.
    pub functional: bool,
    /// Answer `3E 00` with `7E 00`.
    pub tester_present: bool,
    /// Only reachable while OBD multiplexing is in this state.
    pub obd_multiplexing: Option<bool>,
    /// Number of `7F xx 78` frames sent before every real answer.
    pub response_pending: usize,
    responses: HashMap<Vec<u8>, Vec<u8>>,
}

impl MockEcu {
    pub fn new(tx_addr: u32, rx_addr: u32, bus: u8) -> Self {
        Self {
            tx_addr,
            rx_addr,
            bus,
            sub_addr: None,
            functional: false,
            tester_present: true,
            obd_multiplexing: None,
            response_pending: 0,
            responses: HashMap::new(),
        }
    }

    pub fn with_sub_addr(mut self, sub: u8) -> Self {
        self.sub_addr = Some(sub);
        self
    }

    pub fn functional(mut self) -> Self {
        self.functional = true;
        self
    }

    pub fn without_tester_present(mut self) -> Self {
        self.tester_present = false;
        self
    }

    pub fn with_obd_multiplexing(mut self, enabled: bool) -> Self {
        self.obd_multiplexing = Some(enabled);
        self
    }

    pub fn with_response_pending(mut self, count: usize) -> Self {
        self.response_pending = count;
        self
    }

    /// Answer `request` with `response` (full UDS payloads).
    pub fn on_request(mut self, request: &[u8], response: &[u8]) -> Self {
        self.responses.insert(request.to_vec(), response.to_vec());
        self
    }

    fn max_len(&self) -> usize {
        if self.sub_addr.is_some() {
            ISOTP_FRAME_LEN - 1
        } else {
            ISOTP_FRAME_LEN
        }
    }

    fn listens_to(&self, frame: &CanFrame, obd_multiplexing: bool) -> bool {
        // 11-bit ECUs hear 0x7DF, 29-bit ECUs hear 0x18DB33F1
        let functional_addr = if self.tx_addr < EXTENDED_ADDRESS_MIN {
            OBD_REQUEST_ID
        } else {
            OBD_REQUEST_ID_29BIT
        };
        let addressed = frame.address == self.tx_addr
            || (self.functional && frame.address == functional_addr);
        let sub_ok = match self.sub_addr {
            Some(sub) => frame.data.first() == Some(&sub),
            None => true,
        };
        let mux_ok = self.obd_multiplexing.is_none_or(|m| m == obd_multiplexing);
        addressed && frame.src == self.bus && sub_ok && mux_ok
    }

    fn answer(&self, request: &[u8]) -> Vec<u8> {
        if self.tester_present && request == [0x3E, 0x00] {
            return vec![0x7E, 0x00];
        }
        match self.responses.get(request) {
            Some(response) => response.clone(),
            None => vec![
                NEGATIVE_RESPONSE,
                request.first().copied().unwrap_or_default(),
                NRC_REQUEST_OUT_OF_RANGE,
            ],
        }
    }
}

/// ISO-TP progress of one simulated ECU.
#[derive(Debug, Default)]
struct EcuSession {
    /// Segmented request being received.
    rx_buf: Vec<u8>,
    rx_len: usize,
    /// Remainder of a segmented answer awaiting flow control.
    tx_rest: Vec<u8>,
    tx_idx: u8,
}

#[derive(Debug, Default)]
struct MockState {
    ecus: Vec<(MockEcu, EcuSession)>,
    queued: VecDeque<CanBatch>,
    sent: Vec<CanFrame>,
    multiplexing_calls: Vec<bool>,
    obd_multiplexing: bool,
    nanos: u64,
}

impl MockState {
    fn push_batch(&mut self, frames: Vec<CanFrame>) {
        if frames.is_empty() {
            return;
        }
        self.nanos += 1_000_000;
        self.queued.push_back(CanBatch::new(self.nanos, frames));
    }
}

/// Mock CAN transport with simulated ECUs and frame recording.
#[derive(Debug, Default)]
pub struct MockCanTransport {
    state: Mutex<MockState>,
}

impl MockCanTransport {
    /// Create a new mock with no ECUs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock with the given simulated ECUs.
    pub fn with_ecus(ecus: impl IntoIterator<Item = MockEcu>) -> Self {
        let mock = Self::new();
        for ecu in ecus {
            mock.add_ecu(ecu);
        }
        mock
    }

    pub fn add_ecu(&self, ecu: MockEcu) {
        self.lock().ecus.push((ecu, EcuSession::default()));
    }

    /// Queue frames to be returned by the next `recv`.
    pub fn queue_batch(&self, frames: Vec<CanFrame>) {
        self.lock().push_batch(frames);
    }

    /// Get copies of all frames that were sent.
    pub fn sent_frames(&self) -> Vec<CanFrame> {
        self.lock().sent.clone()
    }

    /// Every `set_obd_multiplexing` argument, in call order.
    pub fn multiplexing_calls(&self) -> Vec<bool> {
        self.lock().multiplexing_calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Frames an ECU puts on the bus in reaction to one received frame.
fn ecu_react(ecu: &MockEcu, session: &mut EcuSession, frame: &CanFrame) -> Vec<CanFrame> {
    let offset = usize::from(ecu.sub_addr.is_some());
    let Some(data) = frame.data.get(offset..) else {
        return Vec::new();
    };
    let Some(&pci) = data.first() else {
        return Vec::new();
    };

    match pci >> 4 {
        ISOTP_SF => {
            let len = usize::from(pci & 0x0F);
            if len == 0 || data.len() < 1 + len {
                return Vec::new();
            }
            ecu_respond(ecu, session, &data[1..1 + len])
        }
        ISOTP_FF if data.len() >= 2 => {
            session.rx_len = (usize::from(pci & 0x0F) << 8) | usize::from(data[1]);
            session.rx_buf = data[2..].to_vec();
            vec![ecu_frame(ecu, vec![FC_CONTINUE, 0x00, 0x00])]
        }
        ISOTP_CF if session.rx_len > 0 => {
            session.rx_buf.extend_from_slice(&data[1..]);
            if session.rx_buf.len() < session.rx_len {
                return Vec::new();
            }
            let mut request = std::mem::take(&mut session.rx_buf);
            request.truncate(session.rx_len);
            session.rx_len = 0;
            ecu_respond(ecu, session, &request)
        }
        ISOTP_FC if pci == FC_CONTINUE && !session.tx_rest.is_empty() => {
            let block_size = data.get(1).copied().map(usize::from).unwrap_or_default();
            let chunk = ecu.max_len() - 1;
            let mut frames = Vec::new();
            while !session.tx_rest.is_empty() && (block_size == 0 || frames.len() < block_size) {
                session.tx_idx = (session.tx_idx + 1) & 0x0F;
                let take = chunk.min(session.tx_rest.len());
                let mut payload = vec![(ISOTP_CF << 4) | session.tx_idx];
                payload.extend(session.tx_rest.drain(..take));
                frames.push(ecu_frame(ecu, payload));
            }
            frames
        }
        _ => Vec::new(),
    }
}

fn ecu_respond(ecu: &MockEcu, session: &mut EcuSession, request: &[u8]) -> Vec<CanFrame> {
    let response = ecu.answer(request);
    let mut frames = Vec::new();

    if response.first() != Some(&0x7E) {
        let sid = request.first().copied().unwrap_or_default();
        for _ in 0..ecu.response_pending {
            frames.push(ecu_frame(ecu, vec![0x03, NEGATIVE_RESPONSE, sid, NRC_RESPONSE_PENDING]));
        }
    }

    let max_len = ecu.max_len();
    if response.len() < max_len {
        let mut payload = vec![response.len() as u8];
        payload.extend_from_slice(&response);
        frames.push(ecu_frame(ecu, payload));
    } else {
        let mut payload = (0x1000u16 | response.len() as u16).to_be_bytes().to_vec();
        payload.extend_from_slice(&response[..max_len - 2]);
        frames.push(ecu_frame(ecu, payload));
        session.tx_rest = response[max_len - 2..].to_vec();
        session.tx_idx = 0;
    }
    frames
}

fn ecu_frame(ecu: &MockEcu, payload: Vec<u8>) -> CanFrame {
    let mut data = Vec::with_capacity(ISOTP_FRAME_LEN);
    data.extend(ecu.sub_addr);
    data.extend(payload);
    CanFrame::new(ecu.rx_addr, pad_frame(data), ecu.bus)
}

#[async_trait]
impl CanTransport for MockCanTransport {
    async fn send(&self, frames: &[CanFrame]) -> CanResult<()> {
        let mut state = self.lock();
        for frame in frames {
            state.sent.push(frame.clone());
            let mux = state.obd_multiplexing;
            let mut replies = Vec::new();
            for (ecu, session) in state.ecus.iter_mut() {
                if ecu.listens_to(frame, mux) {
                    replies.extend(ecu_react(ecu, session, frame));
                }
            }
            state.push_batch(replies);
        }
        Ok(())
    }

    async fn recv(&self, wait_for_one: bool) -> CanResult<Vec<CanBatch>> {
        let batches: Vec<CanBatch> = self.lock().queued.drain(..).collect();
        if !batches.is_empty() || !wait_for_one {
            return Ok(batches);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
        Ok(self.lock().queued.drain(..).collect())
    }

    async fn set_obd_multiplexing(&self, enabled: bool) -> CanResult<()> {
        let mut state = self.lock();
        state.multiplexing_calls.push(enabled);
        state.obd_multiplexing = enabled;
        Ok(())
    }
}
