//! Frame transport abstraction.
//!
//! `CanTransport` is the only boundary to hardware: batches of frames go out
//! with `send`, batches come back from `recv`. Implementations own their
//! receive buffering and use interior mutability so queries can hold a
//! shared reference. `MockCanTransport` (in `mock.rs`) simulates ECUs for
//! tests on any platform.

use async_trait::async_trait;

use oc_protocol::{CanBatch, CanFrame};

use crate::error::CanResult;

/// Trait for CAN transport implementations.
#[async_trait]
pub trait CanTransport: Send + Sync {
    /// Queue frames for transmission, in order.
    async fn send(&self, frames: &[CanFrame]) -> CanResult<()>;

    /// Return every batch received since the last call. With `wait_for_one`
    /// the call blocks for a short, implementation-defined poll period when
    /// nothing is buffered yet.
    async fn recv(&self, wait_for_one: bool) -> CanResult<Vec<CanBatch>>;

    /// Route the OBD port to the diagnostic bus (`true`) or back to normal
    /// traffic (`false`).
    async fn set_obd_multiplexing(&self, enabled: bool) -> CanResult<()>;

    /// Discard everything buffered so far.
    async fn drain(&self) -> CanResult<()> {
        while !self.recv(false).await?.is_empty() {}
        Ok(())
    }
}
