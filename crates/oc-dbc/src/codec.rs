//! Stateless bit-level encode/decode against a [`Catalog`].

use std::collections::BTreeMap;

use crate::catalog::{Catalog, MessageDef, Multiplex, SignalDef, SignalType};
use crate::checksum;
use crate::error::{CodecError, CodecResult};

/// Decoded physical values keyed by signal name.
pub type SignalValues = BTreeMap<String, f64>;

pub(crate) fn mask(bits: usize) -> u64 {
    if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
}

/// Extract the unsigned raw field `[lsb, msb]` of `sig` from `data`.
///
/// Bytes past the end of `data` read as absent, so a short slice yields a
/// truncated value instead of a panic.
pub fn get_raw_value(data: &[u8], sig: &SignalDef) -> u64 {
    let mut ret = 0u64;
    let mut bits = sig.size;
    let mut i = (sig.msb / 8) as isize;

    while i >= 0 && (i as usize) < data.len() && bits > 0 {
        let byte = i as usize;
        let lsb = if sig.lsb / 8 == byte { sig.lsb } else { byte * 8 };
        let msb = if sig.msb / 8 == byte { sig.msb } else { (byte + 1) * 8 - 1 };
        let size = msb - lsb + 1;

        let d = (u64::from(data[byte]) >> (lsb - byte * 8)) & mask(size);
        ret |= d << (bits - size);

        bits -= size;
        i += if sig.is_little_endian { -1 } else { 1 };
    }
    ret
}

/// Write the low `sig.size` bits of `ival` into the signal's bit range,
/// leaving every other bit of `data` untouched.
pub fn set_value(data: &mut [u8], sig: &SignalDef, ival: u64) {
    let mut ival = ival & mask(sig.size);
    let mut bits = sig.size;
    let mut i = (sig.lsb / 8) as isize;

    while i >= 0 && (i as usize) < data.len() && bits > 0 {
        let byte = i as usize;
        let shift = if sig.lsb / 8 == byte { sig.lsb % 8 } else { 0 };
        let size = bits.min(8 - shift);

        let field = mask(size) << shift;
        data[byte] &= !(field as u8);
        data[byte] |= ((ival & mask(size)) << shift) as u8;

        bits -= size;
        ival >>= size;
        i += if sig.is_little_endian { 1 } else { -1 };
    }
}

/// Decode every signal present in `data` for the message at `address`.
pub fn unpack(catalog: &Catalog, address: u32, data: &[u8]) -> CodecResult<SignalValues> {
    let msg = catalog
        .message(address)
        .ok_or(CodecError::UnknownMessage { address })?;
    unpack_message(msg, data)
}

/// Decode `data` against one message definition.
pub fn unpack_message(msg: &MessageDef, data: &[u8]) -> CodecResult<SignalValues> {
    if data.len() != msg.size {
        return Err(CodecError::LengthMismatch {
            address: msg.address,
            expected: msg.size,
            actual: data.len(),
        });
    }

    let mux = msg.multiplexor().map(|m| get_raw_value(data, m));
    let values = msg
        .signals
        .iter()
        .filter(|sig| match sig.multiplex {
            Multiplex::None | Multiplex::Multiplexor => true,
            Multiplex::Multiplexed(v) => mux == Some(v),
        })
        .map(|sig| (sig.name.clone(), sig.to_physical(get_raw_value(data, sig))))
        .collect();
    Ok(values)
}

/// Encode `values` into a fresh frame for `address`. Omitted signals are
/// zero; the checksum, if any, is computed last over the assembled frame.
pub fn pack(catalog: &Catalog, address: u32, values: &[(&str, f64)]) -> CodecResult<Vec<u8>> {
    let msg = catalog
        .message(address)
        .ok_or(CodecError::UnknownMessage { address })?;
    let mut data = vec![0u8; msg.size];
    write_values(msg, &mut data, values)?;
    stamp_checksum(msg, &mut data)?;
    Ok(data)
}

pub(crate) fn write_values(
    msg: &MessageDef,
    data: &mut [u8],
    values: &[(&str, f64)],
) -> CodecResult<()> {
    for (name, value) in values {
        let sig = msg.signal(name).ok_or_else(|| CodecError::UnknownSignal {
            address: msg.address,
            signal: (*name).to_string(),
        })?;
        set_value(data, sig, sig.to_raw(*value));
    }
    Ok(())
}

/// Compute the message's checksum over `data` and write it in place.
pub fn stamp_checksum(msg: &MessageDef, data: &mut [u8]) -> CodecResult<()> {
    if let Some(sig) = msg.checksum_signal()
        && let SignalType::Checksum(kind) = sig.kind
    {
        let value = checksum::calculate(kind, msg.address, sig, data)?;
        set_value(data, sig, u64::from(value));
    }
    Ok(())
}

/// Whether the checksum field of `data` matches the computed value.
/// Messages without a checksum always verify.
pub fn verify_checksum(msg: &MessageDef, data: &[u8]) -> CodecResult<bool> {
    match msg.checksum_signal() {
        Some(sig) => match sig.kind {
            SignalType::Checksum(kind) => {
                let expected = checksum::calculate(kind, msg.address, sig, data)?;
                Ok(u64::from(expected) == get_raw_value(data, sig))
            }
            _ => Ok(true),
        },
        None => Ok(true),
    }
}
