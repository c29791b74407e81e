//! Concurrent multi-step ISO-TP queries against many ECUs on one bus.
//!
//! Every address runs the same request sequence; each step's response must
//! start with the expected prefix before the next request goes out. The last
//! response, prefix stripped, is the result for that address. Addresses that
//! time out, answer wrongly or break ISO-TP are dropped without failing the
//! others.

use std::collections::BTreeMap;
use std::time::Duration;

use oc_protocol::{CanFrame, EcuAddr, hex_bytes};
use tokio::time::Instant;

use crate::error::{CanError, CanResult};
use crate::isotp::{FrameKind, IsoTpMessage};
use crate::safety;
use crate::transport::CanTransport;
use crate::types::DEFAULT_RESPONSE_OFFSET;
use crate::uds::{NRC_RESPONSE_PENDING, negative_response_code, rx_addr_for_tx_addr};

/// Default extension granted by a "response pending" negative response.
pub const DEFAULT_RESPONSE_PENDING_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on a whole query.
pub const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(60);

struct QuerySession {
    msg: IsoTpMessage,
    step: usize,
    deadline: Instant,
    done: bool,
}

/// A request sequence sent to a set of ECUs in parallel.
pub struct IsoTpParallelQuery<'a> {
    transport: &'a dyn CanTransport,
    bus: u8,
    addrs: Vec<EcuAddr>,
    requests: Vec<Vec<u8>>,
    responses: Vec<Vec<u8>>,
    response_offset: u32,
    functional_addrs: Vec<u32>,
    response_pending_timeout: Duration,
    separation_time: Duration,
}

impl<'a> IsoTpParallelQuery<'a> {
    /// Every request is checked against the safety whitelist up front.
    pub fn new(
        transport: &'a dyn CanTransport,
        bus: u8,
        addrs: Vec<EcuAddr>,
        requests: Vec<Vec<u8>>,
        responses: Vec<Vec<u8>>,
    ) -> CanResult<Self> {
        if requests.is_empty() || requests.len() != responses.len() {
            return Err(CanError::Protocol(format!(
                "{} requests for {} expected responses",
                requests.len(),
                responses.len()
            )));
        }
        for request in &requests {
            safety::check_request(request)?;
        }
        Ok(Self {
            transport,
            bus,
            addrs,
            requests,
            responses,
            response_offset: DEFAULT_RESPONSE_OFFSET,
            functional_addrs: Vec::new(),
            response_pending_timeout: DEFAULT_RESPONSE_PENDING_TIMEOUT,
            separation_time: Duration::ZERO,
        })
    }

    pub fn with_response_offset(mut self, offset: u32) -> Self {
        self.response_offset = offset;
        self
    }

    /// Send the first request once to these broadcast addresses instead of
    /// to every physical address.
    pub fn with_functional_addrs(mut self, addrs: Vec<u32>) -> Self {
        self.functional_addrs = addrs;
        self
    }

    pub fn with_response_pending_timeout(mut self, timeout: Duration) -> Self {
        self.response_pending_timeout = timeout;
        self
    }

    pub fn with_separation_time(mut self, st: Duration) -> Self {
        self.separation_time = st;
        self
    }

    /// Run the query. `timeout` bounds the silence per address and restarts
    /// on every received frame; `total_timeout` bounds the whole call.
    pub async fn get_data(
        &self,
        timeout: Duration,
        total_timeout: Duration,
    ) -> CanResult<BTreeMap<EcuAddr, Vec<u8>>> {
        self.transport.drain().await?;

        let start = Instant::now();
        let functional = !self.functional_addrs.is_empty();
        let mut sessions = BTreeMap::new();
        let mut outgoing = Vec::new();

        for &addr in &self.addrs {
            let rx_addr = rx_addr_for_tx_addr(addr.address, self.response_offset)?
                .unwrap_or(addr.address);
            let mut msg = IsoTpMessage::new(addr.address, rx_addr, self.bus, addr.sub_address)
                .with_separation_time(self.separation_time);
            outgoing.extend(msg.send(&self.requests[0], functional)?);
            sessions.insert(
                addr,
                QuerySession {
                    msg,
                    step: 0,
                    deadline: start + timeout,
                    done: false,
                },
            );
        }
        for &fa in &self.functional_addrs {
            let mut msg = IsoTpMessage::new(fa, fa, self.bus, None);
            outgoing.extend(msg.send(&self.requests[0], false)?);
        }
        self.transport.send(&outgoing).await?;

        let mut results = BTreeMap::new();
        loop {
            for batch in self.transport.recv(true).await? {
                for frame in &batch.frames {
                    let Some((addr, session)) = sessions
                        .iter_mut()
                        .find(|(_, s)| !s.done && s.msg.accepts(frame))
                    else {
                        continue;
                    };
                    if let Some(dat) = self.on_frame(*addr, session, frame, timeout).await? {
                        results.insert(*addr, dat);
                    }
                }
            }

            if sessions.values().all(|s| s.done) {
                break;
            }

            let now = Instant::now();
            if now >= start + total_timeout {
                tracing::warn!(
                    bus = self.bus,
                    pending = sessions.values().filter(|s| !s.done).count(),
                    "ISO-TP query total timeout"
                );
                break;
            }
            for (addr, session) in sessions.iter_mut() {
                if !session.done && now >= session.deadline {
                    tracing::debug!(address = %addr, bus = self.bus, "no response");
                    session.done = true;
                }
            }
        }

        Ok(results)
    }

    /// Feed one frame to a session; returns the final payload when the last
    /// step completes.
    async fn on_frame(
        &self,
        addr: EcuAddr,
        session: &mut QuerySession,
        frame: &CanFrame,
        timeout: Duration,
    ) -> CanResult<Option<Vec<u8>>> {
        let step = match session.msg.on_frame(frame) {
            Ok(step) => step,
            Err(e) => {
                tracing::error!(address = %addr, bus = self.bus, error = %e, "ISO-TP failure");
                session.done = true;
                return Ok(None);
            }
        };

        if matches!(step.kind, FrameKind::First | FrameKind::Consecutive) {
            session.deadline = Instant::now() + timeout;
        }
        self.send_spaced(&step.replies, step.separation).await?;

        let Some(response) = session.msg.take_response() else {
            return Ok(None);
        };

        let expected = &self.responses[session.step];
        if response.starts_with(expected) {
            if session.step + 1 < self.requests.len() {
                session.step += 1;
                session.deadline = Instant::now() + timeout;
                let frames = session.msg.send(&self.requests[session.step], false)?;
                self.transport.send(&frames).await?;
                return Ok(None);
            }
            session.done = true;
            return Ok(Some(response[expected.len()..].to_vec()));
        }

        if negative_response_code(&response) == Some(NRC_RESPONSE_PENDING) {
            tracing::debug!(address = %addr, bus = self.bus, "response pending");
            session.deadline = Instant::now() + self.response_pending_timeout;
            return Ok(None);
        }

        tracing::error!(
            address = %addr,
            bus = self.bus,
            response = hex_bytes(&response),
            expected = hex_bytes(expected),
            "unexpected response"
        );
        session.done = true;
        Ok(None)
    }

    async fn send_spaced(&self, frames: &[CanFrame], separation: Duration) -> CanResult<()> {
        if separation.is_zero() {
            if !frames.is_empty() {
                self.transport.send(frames).await?;
            }
            return Ok(());
        }
        for (i, frame) in frames.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(separation).await;
            }
            self.transport.send(std::slice::from_ref(frame)).await?;
        }
        Ok(())
    }
}
