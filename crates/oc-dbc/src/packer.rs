//! Stateful frame builder that owns per-message rolling counters.

use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::codec::{mask, set_value, stamp_checksum, write_values};
use crate::error::{CodecError, CodecResult};

/// Builds outgoing frames for one session. Counters advance once per packed
/// frame of a message, modulo the counter field width.
#[derive(Debug, Clone)]
pub struct CanPacker {
    catalog: Arc<Catalog>,
    counters: HashMap<u32, u64>,
}

impl CanPacker {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            counters: HashMap::new(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Counter value the next frame of `address` will carry.
    pub fn next_counter(&self, address: u32) -> u64 {
        self.counters.get(&address).copied().unwrap_or(0)
    }

    /// Encode a frame. A caller-supplied `COUNTER` value is written as given
    /// and resyncs the stored counter; otherwise the stored counter is used.
    pub fn pack(&mut self, address: u32, values: &[(&str, f64)]) -> CodecResult<Vec<u8>> {
        let msg = self
            .catalog
            .message(address)
            .ok_or(CodecError::UnknownMessage { address })?;

        let mut data = vec![0u8; msg.size];
        write_values(msg, &mut data, values)?;

        if let Some(counter) = msg.counter_signal() {
            let width = mask(counter.size);
            let current = values
                .iter()
                .find(|(name, _)| *name == counter.name)
                .map(|(_, v)| counter.to_raw(*v) & width)
                .unwrap_or_else(|| self.counters.get(&address).copied().unwrap_or(0));
            set_value(&mut data, counter, current);
            self.counters.insert(address, current.wrapping_add(1) & width);
        }

        stamp_checksum(msg, &mut data)?;
        Ok(data)
    }

    /// [`pack`](Self::pack) by message name.
    pub fn pack_by_name(&mut self, name: &str, values: &[(&str, f64)]) -> CodecResult<Vec<u8>> {
        let address = self
            .catalog
            .address_of(name)
            .ok_or_else(|| CodecError::UnknownMessageName {
                name: name.to_string(),
            })?;
        self.pack(address, values)
    }
}
