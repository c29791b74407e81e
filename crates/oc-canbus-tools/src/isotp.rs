//! ISO-TP (ISO 15765-2) segmentation for one request/response exchange.
//!
//! `IsoTpMessage` is a pure state machine: `send` returns the frames to put
//! on the bus, `on_frame` consumes one received frame and returns any flow
//! control or consecutive frames the peer is now owed. The caller owns the
//! transport and the clock, which lets one task drive many exchanges.

use std::time::Duration;

use oc_protocol::CanFrame;

use crate::error::{CanError, CanResult};
use crate::types::{
    FC_CONTINUE, FC_OVERFLOW, FC_WAIT, ISOTP_CF, ISOTP_FC, ISOTP_FF, ISOTP_FRAME_LEN,
    ISOTP_MAX_LEN, ISOTP_SF, pad_frame,
};

/// Kind of frame that `on_frame` consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Single,
    First,
    Consecutive,
    FlowControl,
}

/// Result of consuming one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxStep {
    pub kind: FrameKind,
    /// Frames to transmit in response, in order.
    pub replies: Vec<CanFrame>,
    /// Gap the peer asked for between consecutive frames.
    pub separation: Duration,
}

impl RxStep {
    fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            replies: Vec::new(),
            separation: Duration::ZERO,
        }
    }
}

/// Encode a separation time for a flow control frame: whole milliseconds up
/// to 127, or 100–900 µs as 0xF1–0xF9.
pub fn encode_separation_time(st: Duration) -> u8 {
    let micros = st.as_micros();
    if micros == 0 {
        0
    } else if micros < 1000 {
        (0xF0 + (micros / 100).clamp(1, 9)) as u8
    } else {
        st.as_millis().min(0x7F) as u8
    }
}

/// Decode a flow control separation time. Reserved values mean the maximum.
pub fn decode_separation_time(st: u8) -> Duration {
    match st {
        0x00..=0x7F => Duration::from_millis(u64::from(st)),
        0xF1..=0xF9 => Duration::from_micros(u64::from(st - 0xF0) * 100),
        _ => Duration::from_millis(0x7F),
    }
}

/// One ISO-TP exchange with one ECU.
#[derive(Debug, Clone)]
pub struct IsoTpMessage {
    tx_addr: u32,
    rx_addr: u32,
    bus: u8,
    sub_addr: Option<u8>,
    max_len: usize,
    single_frame_mode: bool,
    separation_time: Duration,

    tx_dat: Vec<u8>,
    tx_idx: usize,
    tx_done: bool,

    rx_dat: Vec<u8>,
    rx_len: usize,
    rx_idx: u8,
    rx_done: bool,
    response: Option<Vec<u8>>,
}

impl IsoTpMessage {
    pub fn new(tx_addr: u32, rx_addr: u32, bus: u8, sub_addr: Option<u8>) -> Self {
        Self {
            tx_addr,
            rx_addr,
            bus,
            sub_addr,
            // the sub-address byte eats one byte of every frame
            max_len: if sub_addr.is_some() { ISOTP_FRAME_LEN - 1 } else { ISOTP_FRAME_LEN },
            single_frame_mode: false,
            separation_time: Duration::ZERO,
            tx_dat: Vec::new(),
            tx_idx: 0,
            tx_done: true,
            rx_dat: Vec::new(),
            rx_len: 0,
            rx_idx: 0,
            rx_done: false,
            response: None,
        }
    }

    /// Ask the peer to wait this long between consecutive frames.
    pub fn with_separation_time(mut self, st: Duration) -> Self {
        self.separation_time = st;
        self
    }

    /// Request one consecutive frame per flow control (block size 1).
    pub fn with_single_frame_mode(mut self, enabled: bool) -> Self {
        self.single_frame_mode = enabled;
        self
    }

    pub fn tx_addr(&self) -> u32 {
        self.tx_addr
    }

    pub fn rx_addr(&self) -> u32 {
        self.rx_addr
    }

    pub fn sub_addr(&self) -> Option<u8> {
        self.sub_addr
    }

    pub fn tx_done(&self) -> bool {
        self.tx_done
    }

    pub fn rx_done(&self) -> bool {
        self.rx_done
    }

    /// Take the completed response, if one arrived.
    pub fn take_response(&mut self) -> Option<Vec<u8>> {
        self.response.take()
    }

    /// Start a new exchange. Returns the single or first frame, or nothing
    /// with `setup_only` (the request went out on a functional address and
    /// this message only serves the physical flow control).
    pub fn send(&mut self, data: &[u8], setup_only: bool) -> CanResult<Vec<CanFrame>> {
        if data.len() > ISOTP_MAX_LEN {
            return Err(CanError::IsoTp(format!(
                "request of {} bytes exceeds ISO-TP limit",
                data.len()
            )));
        }
        self.tx_dat = data.to_vec();
        self.tx_idx = 0;
        self.rx_dat.clear();
        self.rx_len = 0;
        self.rx_idx = 0;
        self.rx_done = false;
        self.response = None;

        let payload = if data.len() < self.max_len {
            self.tx_done = true;
            let mut p = vec![data.len() as u8];
            p.extend_from_slice(data);
            p
        } else {
            self.tx_done = false;
            let mut p = (0x1000u16 | data.len() as u16).to_be_bytes().to_vec();
            p.extend_from_slice(&data[..self.max_len - 2]);
            p
        };

        if setup_only {
            return Ok(Vec::new());
        }
        Ok(vec![self.frame(payload)])
    }

    /// Whether a received frame belongs to this exchange.
    pub fn accepts(&self, frame: &CanFrame) -> bool {
        frame.address == self.rx_addr
            && frame.src == self.bus
            && match self.sub_addr {
                Some(sub) => frame.data.first() == Some(&sub),
                None => true,
            }
    }

    /// Consume one frame accepted by [`accepts`](Self::accepts).
    pub fn on_frame(&mut self, frame: &CanFrame) -> CanResult<RxStep> {
        let offset = usize::from(self.sub_addr.is_some());
        let data = frame.data.get(offset..).unwrap_or_default();
        let Some(&pci) = data.first() else {
            return Err(CanError::IsoTp("empty frame".into()));
        };

        match pci >> 4 {
            ISOTP_SF => self.rx_single(pci, data),
            ISOTP_FF => self.rx_first(pci, data),
            ISOTP_CF => self.rx_consecutive(pci, data),
            ISOTP_FC => self.rx_flow_control(pci, data),
            other => Err(CanError::IsoTp(format!("unexpected frame type 0x{other:X}"))),
        }
    }

    fn rx_single(&mut self, pci: u8, data: &[u8]) -> CanResult<RxStep> {
        let len = usize::from(pci & 0x0F);
        if len == 0 || len >= self.max_len || data.len() < 1 + len {
            return Err(CanError::IsoTp(format!("invalid SF length {len}")));
        }
        self.rx_len = len;
        self.rx_dat = data[1..1 + len].to_vec();
        self.finish_rx();
        Ok(RxStep::new(FrameKind::Single))
    }

    fn rx_first(&mut self, pci: u8, data: &[u8]) -> CanResult<RxStep> {
        if data.len() < 2 {
            return Err(CanError::IsoTp("truncated FF".into()));
        }
        let len = (usize::from(pci & 0x0F) << 8) | usize::from(data[1]);
        if len < self.max_len {
            return Err(CanError::IsoTp(format!("FF length {len} fits in a single frame")));
        }
        self.rx_len = len;
        self.rx_dat = data[2..].iter().copied().take(len).collect();
        self.rx_idx = 0;
        self.rx_done = false;

        let mut step = RxStep::new(FrameKind::First);
        step.replies.push(self.flow_control());
        Ok(step)
    }

    fn rx_consecutive(&mut self, pci: u8, data: &[u8]) -> CanResult<RxStep> {
        if self.rx_done || self.rx_len == 0 {
            return Err(CanError::IsoTp("unexpected CF".into()));
        }
        self.rx_idx = (self.rx_idx + 1) & 0x0F;
        let seq = pci & 0x0F;
        if seq != self.rx_idx {
            return Err(CanError::IsoTp(format!(
                "sequence mismatch: expected {}, got {seq}",
                self.rx_idx
            )));
        }

        let remaining = self.rx_len - self.rx_dat.len();
        let end = data.len().min(1 + remaining);
        self.rx_dat.extend_from_slice(&data[1..end]);

        let mut step = RxStep::new(FrameKind::Consecutive);
        if self.rx_dat.len() >= self.rx_len {
            self.finish_rx();
        } else if self.single_frame_mode {
            step.replies.push(self.flow_control());
        }
        Ok(step)
    }

    fn rx_flow_control(&mut self, pci: u8, data: &[u8]) -> CanResult<RxStep> {
        if self.tx_done {
            return Err(CanError::IsoTp("unexpected FC".into()));
        }
        if data.len() < 3 {
            return Err(CanError::IsoTp("truncated FC".into()));
        }

        let mut step = RxStep::new(FrameKind::FlowControl);
        match pci {
            FC_CONTINUE => {
                step.separation = decode_separation_time(data[2]);
                step.replies = self.consecutive_frames(usize::from(data[1]));
            }
            FC_WAIT => {}
            FC_OVERFLOW => return Err(CanError::IsoTp("receiver overflow".into())),
            other => return Err(CanError::IsoTp(format!("bad flow status 0x{other:02X}"))),
        }
        Ok(step)
    }

    /// Next block of consecutive frames; block size 0 means all of them.
    fn consecutive_frames(&mut self, block_size: usize) -> Vec<CanFrame> {
        let chunk = self.max_len - 1;
        let tx_len = self.tx_dat.len();
        let start = (self.max_len - 2) + self.tx_idx * chunk;
        let end = if block_size > 0 {
            (start + block_size * chunk).min(tx_len)
        } else {
            tx_len
        };

        let mut frames = Vec::new();
        let mut i = start;
        while i < end {
            self.tx_idx += 1;
            let mut payload = vec![(ISOTP_CF << 4) | (self.tx_idx & 0x0F) as u8];
            payload.extend_from_slice(&self.tx_dat[i..(i + chunk).min(tx_len)]);
            frames.push(self.frame(payload));
            i += chunk;
        }
        if end >= tx_len {
            self.tx_done = true;
        }
        frames
    }

    fn flow_control(&self) -> CanFrame {
        let block_size = u8::from(self.single_frame_mode);
        self.frame(vec![
            FC_CONTINUE,
            block_size,
            encode_separation_time(self.separation_time),
        ])
    }

    fn finish_rx(&mut self) {
        self.rx_dat.truncate(self.rx_len);
        self.rx_done = true;
        self.response = Some(self.rx_dat.clone());
    }

    fn frame(&self, payload: Vec<u8>) -> CanFrame {
        let data = match self.sub_addr {
            Some(sub) => {
                let mut d = Vec::with_capacity(ISOTP_FRAME_LEN);
                d.push(sub);
                d.extend(payload);
                d
            }
            None => payload,
        };
        CanFrame::new(self.tx_addr, pad_frame(data), self.bus)
    }
}
