//! Per-manufacturer checksum and CRC algorithms.
//!
//! ECUs drop frames whose integrity field does not match, so every
//! algorithm here must be bit-exact. Lookup tables are generated once from
//! their polynomial with the same shift/XOR loop the bit-serial reference
//! uses, then shared read-only.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::catalog::SignalDef;
use crate::error::ChecksumError;

/// Closed set of supported algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumKind {
    /// Nibble sum over address and payload.
    Honda,
    /// Byte sum plus length, last byte excluded.
    Toyota,
    /// Byte sum, first byte excluded.
    Subaru,
    /// 4-byte address sum plus payload, negated modulo 256.
    NegatedByteSum,
    /// Two address bytes plus payload, checksum byte excluded.
    Tesla,
    /// XOR of every byte but the checksum byte.
    Xor,
    /// Bit-serial CRC, poly 0x1D, inverted.
    Chrysler,
    /// Bit-serial CRC-8 poly 0xD5, bytes processed last to first.
    Body,
    /// CRC-8 SAE J1850, seed 0x00, per-address final XOR.
    FcaGiorgio,
    /// CRC-8 SAE J1850, seed 0xFF, final XOR 0xFF.
    SaeJ1850,
    /// AUTOSAR E2E profile 2 (CRC-8H2F) with per-address data IDs.
    VolkswagenMqb,
    /// CRC-16 XMODEM over payload and address.
    HyundaiCanFd,
}

/// Geometry a DBC must use for its CHECKSUM / COUNTER signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumLayout {
    pub kind: ChecksumKind,
    pub checksum_size: Option<usize>,
    pub counter_size: Option<usize>,
    /// Required `start_bit % 8` of the checksum signal.
    pub checksum_start_bit: Option<usize>,
    /// Required `start_bit % 8` of the counter signal.
    pub counter_start_bit: Option<usize>,
    pub little_endian: bool,
}

impl ChecksumLayout {
    const fn new(
        kind: ChecksumKind,
        checksum_size: Option<usize>,
        counter_size: Option<usize>,
        checksum_start_bit: Option<usize>,
        counter_start_bit: Option<usize>,
        little_endian: bool,
    ) -> Self {
        Self {
            kind,
            checksum_size,
            counter_size,
            checksum_start_bit,
            counter_start_bit,
            little_endian,
        }
    }

    /// Layout used by a DBC, chosen from its file name.
    pub fn for_dbc(dbc_name: &str) -> Option<Self> {
        use ChecksumKind::*;
        let starts = |prefixes: &[&str]| prefixes.iter().any(|p| dbc_name.starts_with(p));

        let kind = if starts(&["honda_", "acura_"]) {
            Honda
        } else if starts(&["toyota_", "lexus_"]) {
            Toyota
        } else if starts(&["hyundai_canfd"]) {
            HyundaiCanFd
        } else if starts(&["vw_mqb", "vw_meb"]) {
            VolkswagenMqb
        } else if starts(&["vw_pq"]) {
            Xor
        } else if starts(&["subaru_global_"]) {
            Subaru
        } else if starts(&["chrysler_"]) {
            Chrysler
        } else if starts(&["fca_giorgio"]) {
            FcaGiorgio
        } else if starts(&["comma_body"]) {
            Body
        } else if starts(&["tesla_"]) {
            Tesla
        } else {
            return None;
        };
        Some(Self::for_kind(kind))
    }

    /// Signal geometry each algorithm expects.
    pub fn for_kind(kind: ChecksumKind) -> Self {
        use ChecksumKind::*;
        match kind {
            Honda => Self::new(Honda, Some(4), Some(2), Some(3), Some(5), false),
            Toyota => Self::new(Toyota, Some(8), None, Some(7), None, false),
            HyundaiCanFd => Self::new(HyundaiCanFd, Some(16), None, Some(0), None, true),
            VolkswagenMqb => Self::new(VolkswagenMqb, Some(8), Some(4), Some(0), Some(0), true),
            Xor => Self::new(Xor, Some(8), Some(4), Some(0), None, true),
            Subaru => Self::new(Subaru, Some(8), None, Some(0), None, true),
            Chrysler => Self::new(Chrysler, Some(8), None, Some(7), None, false),
            FcaGiorgio => Self::new(FcaGiorgio, Some(8), None, Some(7), None, false),
            Body => Self::new(Body, Some(8), Some(4), Some(7), Some(3), false),
            Tesla => Self::new(Tesla, Some(8), Some(4), Some(0), Some(0), true),
            NegatedByteSum => Self::new(NegatedByteSum, Some(8), None, Some(7), None, false),
            SaeJ1850 => Self::new(SaeJ1850, Some(8), None, Some(7), None, false),
        }
    }
}

impl ChecksumKind {
    /// Parse the snake_case name a DBC uses to declare its algorithm.
    pub fn from_name(name: &str) -> Option<Self> {
        use ChecksumKind::*;
        let kind = match name {
            "honda" => Honda,
            "toyota" => Toyota,
            "subaru" => Subaru,
            "negated_byte_sum" => NegatedByteSum,
            "tesla" => Tesla,
            "xor" => Xor,
            "chrysler" => Chrysler,
            "body" => Body,
            "fca_giorgio" => FcaGiorgio,
            "sae_j1850" => SaeJ1850,
            "volkswagen_mqb" => VolkswagenMqb,
            "hyundai_can_fd" => HyundaiCanFd,
            _ => return None,
        };
        Some(kind)
    }
}

// ── CRC tables ──────────────────────────────────────────────────

/// CRC-8 polynomial 0x2F (8H2F / AUTOSAR).
pub const POLY_8H2F: u8 = 0x2F;
/// CRC-8 polynomial 0x1D (SAE J1850).
pub const POLY_J1850: u8 = 0x1D;
/// CRC-16 polynomial 0x1021 (XMODEM).
pub const POLY_XMODEM: u16 = 0x1021;

pub static CRC8_8H2F: LazyLock<[u8; 256]> = LazyLock::new(|| crc8_table(POLY_8H2F));
pub static CRC8_J1850: LazyLock<[u8; 256]> = LazyLock::new(|| crc8_table(POLY_J1850));
pub static CRC16_XMODEM: LazyLock<[u16; 256]> = LazyLock::new(|| crc16_table(POLY_XMODEM));

/// Build a 256-entry CRC-8 table (MSB first).
pub fn crc8_table(poly: u8) -> [u8; 256] {
    let mut table = [0u8; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let mut crc = i as u8;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ poly
            } else {
                crc << 1
            };
        }
        *entry = crc;
    }
    table
}

/// Build a 256-entry CRC-16 table indexed by the top byte.
pub fn crc16_table(poly: u16) -> [u16; 256] {
    let mut table = [0u16; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let mut crc = (i as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ poly
            } else {
                crc << 1
            };
        }
        *entry = crc;
    }
    table
}

/// Bit-serial CRC-8 reference (MSB first, no final XOR).
pub fn crc8_bitwise(poly: u8, init: u8, data: &[u8]) -> u8 {
    let mut crc = init;
    for &b in data {
        crc ^= b;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ poly
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Table-driven CRC-8 (no final XOR).
pub fn crc8_lut(table: &[u8; 256], init: u8, data: &[u8]) -> u8 {
    data.iter().fold(init, |crc, &b| table[(crc ^ b) as usize])
}

/// Table-driven CRC-16 (no final XOR).
pub fn crc16_lut(table: &[u16; 256], init: u16, data: &[u8]) -> u16 {
    data.iter().fold(init, |crc, &b| {
        (crc << 8) ^ table[(((crc >> 8) as u8) ^ b) as usize]
    })
}

// ── Volkswagen MQB data IDs ─────────────────────────────────────

/// AUTOSAR E2E data ID per message, indexed by the 4-bit counter.
fn mqb_data_ids(address: u32) -> Option<[u8; 16]> {
    let ids = match address {
        0x40 => [0x40; 16], // Airbag_01
        0x86 => [0x86; 16], // LWI_01
        0x9F => [0xF5; 16], // LH_EPS_03
        0xAD => [
            0x3F, 0x69, 0x39, 0xDC, 0x94, 0xF9, 0x14, 0x64, 0xD8, 0x6A, 0x34, 0xCE, 0xA2, 0x55,
            0xB5, 0x2C,
        ], // Getriebe_11
        0xFC => [
            0x77, 0x5C, 0xA0, 0x89, 0x4B, 0x7C, 0xBB, 0xD6, 0x1F, 0x6C, 0x4F, 0xF6, 0x20, 0x2B,
            0x43, 0xDD,
        ], // ESP_51
        0xFD => [
            0xB4, 0xEF, 0xF8, 0x49, 0x1E, 0xE5, 0xC2, 0xC0, 0x97, 0x19, 0x3C, 0xC9, 0xF1, 0x98,
            0xD6, 0x61,
        ], // ESP_21
        0x101 => [0xAA; 16], // ESP_02
        0x106 => [0x07; 16], // ESP_05
        0x116 => [0xAC; 16], // ESP_10
        0x117 => [0x16; 16], // ACC_10
        0x120 => [
            0xC4, 0xE2, 0x4F, 0xE4, 0xF8, 0x2F, 0x56, 0x81, 0x9F, 0xE5, 0x83, 0x44, 0x05, 0x3F,
            0x97, 0xDF,
        ], // TSK_06
        0x121 => [
            0xE9, 0x65, 0xAE, 0x6B, 0x7B, 0x35, 0xE5, 0x5F, 0x4E, 0xC7, 0x86, 0xA2, 0xBB, 0xDD,
            0xEB, 0xB4,
        ], // Motor_20
        0x122 => [
            0x37, 0x7D, 0xF3, 0xA9, 0x18, 0x46, 0x6D, 0x4D, 0x3D, 0x71, 0x92, 0x9C, 0xE5, 0x32,
            0x10, 0xB9,
        ], // ACC_06
        0x126 => [0xDA; 16], // HCA_01
        0x12B => [0x6A; 16], // GRA_ACC_01
        0x12E => [
            0xF8, 0xE5, 0x97, 0xC9, 0xD6, 0x07, 0x47, 0x21, 0x66, 0xDD, 0xCF, 0x6F, 0xA1, 0x94,
            0x74, 0x63,
        ], // ACC_07
        0x187 => [
            0x7F, 0xED, 0x17, 0xC2, 0x7C, 0xEB, 0x44, 0x21, 0x01, 0xFA, 0xDB, 0x15, 0x4A, 0x6B,
            0x23, 0x05,
        ], // Motor_EV_01
        0x30C => [0x0F; 16], // ACC_02
        0x30F => [0x0C; 16], // SWA_01
        0x324 => [0x27; 16], // ACC_04
        0x3BE => [0x1F; 16], // Motor_14
        0x3C0 => [0xC3; 16], // Klemmen_Status_01
        0x65D => [
            0xAC, 0xB3, 0xAB, 0xEB, 0x7A, 0xE1, 0x3B, 0xF7, 0x73, 0xBA, 0x7C, 0x9E, 0x06, 0x5F,
            0x02, 0xD9,
        ], // ESP_20
        _ => return None,
    };
    Some(ids)
}

/// Final XOR applied by the FCA Giorgio CRC, per message.
fn giorgio_final_xor(address: u32) -> u8 {
    match address {
        0xDE => 0x10,
        0x106 => 0xF6,
        0x122 => 0xF1,
        _ => 0x0A,
    }
}

// ── Dispatch ────────────────────────────────────────────────────

/// Compute the integrity value for `data` as received/assembled for
/// `address`. `sig` is the message's checksum signal.
pub fn calculate(
    kind: ChecksumKind,
    address: u32,
    sig: &SignalDef,
    data: &[u8],
) -> Result<u32, ChecksumError> {
    let need = match kind {
        ChecksumKind::HyundaiCanFd | ChecksumKind::VolkswagenMqb => 2,
        ChecksumKind::Xor | ChecksumKind::Tesla | ChecksumKind::NegatedByteSum => {
            sig.start_byte() + 1
        }
        _ => 1,
    };
    if data.len() < need {
        return Err(ChecksumError::PayloadTooShort {
            address,
            len: data.len(),
            need,
        });
    }

    let value = match kind {
        ChecksumKind::Honda => honda(address, data),
        ChecksumKind::Toyota => toyota(address, data),
        ChecksumKind::Subaru => subaru(address, data),
        ChecksumKind::NegatedByteSum => negated_byte_sum(address, sig, data),
        ChecksumKind::Tesla => tesla(address, sig, data),
        ChecksumKind::Xor => xor(sig, data),
        ChecksumKind::Chrysler => chrysler(data),
        ChecksumKind::Body => body(data),
        ChecksumKind::FcaGiorgio => fca_giorgio(address, data),
        ChecksumKind::SaeJ1850 => sae_j1850(data),
        ChecksumKind::VolkswagenMqb => volkswagen_mqb(address, data)?,
        ChecksumKind::HyundaiCanFd => hyundai_canfd(address, data),
    };
    Ok(value)
}

fn address_bytes_sum(address: u32) -> u32 {
    (address & 0xFF) + ((address >> 8) & 0xFF) + ((address >> 16) & 0xFF) + ((address >> 24) & 0xFF)
}

fn honda(address: u32, data: &[u8]) -> u32 {
    let extended = address > 0x7FF;
    let mut s: i32 = 0;
    let mut addr = address;
    while addr != 0 {
        s += (addr & 0xF) as i32;
        addr >>= 4;
    }
    let last = data.len() - 1;
    for (i, &b) in data.iter().enumerate() {
        // the checksum nibble lives in the low half of the last byte
        let x = if i == last { b >> 4 } else { b };
        s += i32::from(x & 0xF) + i32::from(x >> 4);
    }
    s = 8 - s;
    if extended {
        s += 3;
    }
    (s & 0xF) as u32
}

fn toyota(address: u32, data: &[u8]) -> u32 {
    let mut s = data.len() as u32 + address_bytes_sum(address);
    s += data[..data.len() - 1].iter().map(|&b| u32::from(b)).sum::<u32>();
    s & 0xFF
}

fn subaru(address: u32, data: &[u8]) -> u32 {
    let s = address_bytes_sum(address) + data[1..].iter().map(|&b| u32::from(b)).sum::<u32>();
    s & 0xFF
}

fn sum_except(data: &[u8], skip: usize) -> u32 {
    data.iter()
        .enumerate()
        .filter(|(i, _)| *i != skip)
        .map(|(_, &b)| u32::from(b))
        .sum()
}

fn negated_byte_sum(address: u32, sig: &SignalDef, data: &[u8]) -> u32 {
    let sum = address_bytes_sum(address) + sum_except(data, sig.start_byte());
    (256 - (sum % 256)) % 256
}

fn tesla(address: u32, sig: &SignalDef, data: &[u8]) -> u32 {
    let s = (address & 0xFF) + ((address >> 8) & 0xFF) + sum_except(data, sig.start_byte());
    s & 0xFF
}

fn xor(sig: &SignalDef, data: &[u8]) -> u32 {
    let skip = sig.start_byte();
    let x = data
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != skip)
        .fold(0u8, |acc, (_, &b)| acc ^ b);
    u32::from(x)
}

fn chrysler(data: &[u8]) -> u32 {
    let mut checksum: u8 = 0xFF;
    for &curr in &data[..data.len() - 1] {
        let mut shift: u8 = 0x80;
        for _ in 0..8 {
            let mut bit_sum = curr & shift;
            let mut temp_chk = checksum & 0x80;
            if bit_sum != 0 {
                bit_sum = if temp_chk != 0 { 1 } else { 0x1C };
                checksum <<= 1;
                temp_chk = checksum | 1;
                bit_sum ^= temp_chk;
            } else {
                if temp_chk != 0 {
                    bit_sum = 0x1D;
                }
                checksum <<= 1;
                bit_sum ^= checksum;
            }
            checksum = bit_sum;
            shift >>= 1;
        }
    }
    u32::from(!checksum)
}

fn body(data: &[u8]) -> u32 {
    let mut crc: u8 = 0xFF;
    let poly: u8 = 0xD5;
    for &b in data[..data.len() - 1].iter().rev() {
        crc ^= b;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ poly
            } else {
                crc << 1
            };
        }
    }
    u32::from(crc)
}

fn fca_giorgio(address: u32, data: &[u8]) -> u32 {
    let crc = crc8_lut(&CRC8_J1850, 0x00, &data[..data.len() - 1]);
    u32::from(crc ^ giorgio_final_xor(address))
}

fn sae_j1850(data: &[u8]) -> u32 {
    let crc = crc8_lut(&CRC8_J1850, 0xFF, &data[..data.len() - 1]);
    u32::from(crc ^ 0xFF)
}

fn volkswagen_mqb(address: u32, data: &[u8]) -> Result<u32, ChecksumError> {
    let ids = mqb_data_ids(address).ok_or(ChecksumError::MissingSeed { address })?;
    // CRC covers everything after the checksum byte, then the data ID
    let mut crc = crc8_lut(&CRC8_8H2F, 0xFF, &data[1..]);
    let counter = (data[1] & 0x0F) as usize;
    crc ^= ids[counter];
    crc = CRC8_8H2F[crc as usize];
    Ok(u32::from(crc ^ 0xFF))
}

fn hyundai_canfd(address: u32, data: &[u8]) -> u32 {
    let table = &*CRC16_XMODEM;
    let mut crc = crc16_lut(table, 0, &data[2..]);
    crc = crc16_lut(table, crc, &[(address & 0xFF) as u8, ((address >> 8) & 0xFF) as u8]);
    crc ^= match data.len() {
        8 => 0x5F29,
        16 => 0x041D,
        24 => 0x819D,
        32 => 0x9F5B,
        _ => 0,
    };
    u32::from(crc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Number;

    const CHECK: &[u8] = b"123456789";

    fn sig(start_bit: usize, size: usize, le: bool) -> SignalDef {
        SignalDef::new("CHECKSUM", start_bit, size, le, false, Number::Int(1), Number::Int(0))
            .unwrap()
    }

    #[test]
    fn tables_match_bitwise_reference() {
        for poly in [POLY_8H2F, POLY_J1850] {
            let table = crc8_table(poly);
            for i in 0..=255u8 {
                assert_eq!(table[i as usize], crc8_bitwise(poly, 0, &[i]), "poly {poly:#x} byte {i}");
            }
        }
        let table = &*CRC8_8H2F;
        assert_eq!(crc8_lut(table, 0xFF, CHECK), crc8_bitwise(POLY_8H2F, 0xFF, CHECK));
    }

    #[test]
    fn catalog_check_values() {
        // CRC-8/SAE-J1850
        assert_eq!(crc8_lut(&CRC8_J1850, 0xFF, CHECK) ^ 0xFF, 0x4B);
        // CRC-8/AUTOSAR
        assert_eq!(crc8_lut(&CRC8_8H2F, 0xFF, CHECK) ^ 0xFF, 0xDF);
        // CRC-16/XMODEM
        assert_eq!(crc16_lut(&CRC16_XMODEM, 0, CHECK), 0x31C3);
    }

    #[test]
    fn crc16_table_matches_shift_loop() {
        let table = crc16_table(POLY_XMODEM);
        assert_eq!(table[0], 0);
        assert_eq!(table[1], 0x1021);
        assert_eq!(table[0xFF], 0x1EF0);
    }

    #[test]
    fn negated_sum_balances_to_zero() {
        let s = sig(56, 8, true);
        let mut data = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x00];
        let address = 0x1_2345;
        let c = calculate(ChecksumKind::NegatedByteSum, address, &s, &data).unwrap();
        data[7] = c as u8;
        let total: u32 = data.iter().map(|&b| u32::from(b)).sum::<u32>() + address_bytes_sum(address);
        assert_eq!(total % 256, 0);
    }

    #[test]
    fn toyota_sum() {
        // 0x2E4 STEERING_LKA: len 5 + 0x02 + 0xE4 + payload[..4]
        let s = sig(39, 8, false);
        let data = [0x80, 0x01, 0x00, 0x00, 0x00];
        let expected = (5 + 0x02 + 0xE4 + 0x80 + 0x01) & 0xFF;
        assert_eq!(calculate(ChecksumKind::Toyota, 0x2E4, &s, &data).unwrap(), expected);
    }

    #[test]
    fn subaru_skips_first_byte() {
        let s = sig(0, 8, true);
        let a = calculate(ChecksumKind::Subaru, 0x122, &s, &[0x00, 1, 2, 3]).unwrap();
        let b = calculate(ChecksumKind::Subaru, 0x122, &s, &[0xAB, 1, 2, 3]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, (0x01 + 0x22 + 6) & 0xFF);
    }

    #[test]
    fn xor_skips_checksum_byte() {
        let s = sig(8, 8, true);
        let data = [0x0F, 0xEE, 0xF0, 0x01];
        assert_eq!(calculate(ChecksumKind::Xor, 0x100, &s, &data).unwrap(), 0x0F ^ 0xF0 ^ 0x01);
    }

    #[test]
    fn honda_nibble_sum() {
        // 0xE4 STEERING_CONTROL, 5 bytes, checksum in low nibble of last byte
        let s = sig(35, 4, false);
        let data = [0x00, 0x00, 0x80, 0x00, 0x30];
        // addr nibbles 0xE + 0x4 = 18, payload nibbles 8 + 3 = 11
        let expected = ((8 - (18 + 11)) & 0xF) as u32;
        assert_eq!(calculate(ChecksumKind::Honda, 0xE4, &s, &data).unwrap(), expected);
    }

    #[test]
    fn honda_extended_adds_three() {
        let s = sig(35, 4, false);
        let data = [0u8; 8];
        let addr = 0x18DAB0F1u32;
        let nibbles: i32 = [0x1, 0x8, 0xD, 0xA, 0xB, 0x0, 0xF, 0x1].iter().sum();
        let expected = ((8 - nibbles + 3) & 0xF) as u32;
        assert_eq!(calculate(ChecksumKind::Honda, addr, &s, &data).unwrap(), expected);
    }

    #[test]
    fn sae_j1850_excludes_last_byte() {
        let s = sig(63, 8, false);
        let mut data = CHECK.to_vec();
        data.push(0x00);
        assert_eq!(calculate(ChecksumKind::SaeJ1850, 0x100, &s, &data).unwrap(), 0x4B);
        data[9] = 0xAA;
        assert_eq!(calculate(ChecksumKind::SaeJ1850, 0x100, &s, &data).unwrap(), 0x4B);
    }

    #[test]
    fn giorgio_per_address_xor() {
        let s = sig(63, 8, false);
        let data = [1, 2, 3, 4, 5, 6, 7, 0];
        let base = u32::from(crc8_lut(&CRC8_J1850, 0, &data[..7]));
        assert_eq!(calculate(ChecksumKind::FcaGiorgio, 0xDE, &s, &data).unwrap(), base ^ 0x10);
        assert_eq!(calculate(ChecksumKind::FcaGiorgio, 0x999, &s, &data).unwrap(), base ^ 0x0A);
    }

    #[test]
    fn body_processes_in_reverse() {
        let s = sig(63, 8, false);
        let data = [1, 2, 3, 0];
        let expected = crc8_bitwise(0xD5, 0xFF, &[3, 2, 1]);
        assert_eq!(calculate(ChecksumKind::Body, 0x250, &s, &data).unwrap(), u32::from(expected));
    }

    #[test]
    fn mqb_requires_seed() {
        let s = sig(0, 8, true);
        let data = [0u8; 8];
        assert_eq!(
            calculate(ChecksumKind::VolkswagenMqb, 0x7FF, &s, &data),
            Err(ChecksumError::MissingSeed { address: 0x7FF })
        );
        assert!(calculate(ChecksumKind::VolkswagenMqb, 0x126, &s, &data).is_ok());
    }

    #[test]
    fn mqb_appends_counter_data_id() {
        let s = sig(0, 8, true);
        let data = [0x00, 0x01, 0x10, 0x20, 0x30, 0x40, 0x50, 0x60];
        // ACC_06, counter 1 -> data ID 0x7D
        let mut covered = data[1..].to_vec();
        covered.push(0x7D);
        let expected = crc8_bitwise(POLY_8H2F, 0xFF, &covered) ^ 0xFF;
        assert_eq!(
            calculate(ChecksumKind::VolkswagenMqb, 0x122, &s, &data).unwrap(),
            u32::from(expected)
        );
    }

    #[test]
    fn mqb_per_counter_ids_cover_every_counter() {
        let s = sig(0, 8, true);
        let tsk_06: [u8; 16] = [
            0xC4, 0xE2, 0x4F, 0xE4, 0xF8, 0x2F, 0x56, 0x81, 0x9F, 0xE5, 0x83, 0x44, 0x05, 0x3F,
            0x97, 0xDF,
        ];
        let motor_20: [u8; 16] = [
            0xE9, 0x65, 0xAE, 0x6B, 0x7B, 0x35, 0xE5, 0x5F, 0x4E, 0xC7, 0x86, 0xA2, 0xBB, 0xDD,
            0xEB, 0xB4,
        ];
        for (address, ids) in [(0x120u32, tsk_06), (0x121, motor_20)] {
            for counter in 0..16u8 {
                let data = [0x00, 0x30 | counter, 0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC];
                let mut covered = data[1..].to_vec();
                covered.push(ids[counter as usize]);
                let expected = crc8_bitwise(POLY_8H2F, 0xFF, &covered) ^ 0xFF;
                assert_eq!(
                    calculate(ChecksumKind::VolkswagenMqb, address, &s, &data).unwrap(),
                    u32::from(expected),
                    "address {address:#x} counter {counter}"
                );
            }
        }
    }

    #[test]
    fn mqb_airbag_and_esp_51_have_seeds() {
        let s = sig(0, 8, true);
        let data = [0x00, 0x05, 0, 0, 0, 0, 0, 0];
        for address in [0x40, 0xFC] {
            assert!(calculate(ChecksumKind::VolkswagenMqb, address, &s, &data).is_ok());
        }
        // Airbag_01 repeats its own address as the data ID
        let mut covered = data[1..].to_vec();
        covered.push(0x40);
        let expected = crc8_bitwise(POLY_8H2F, 0xFF, &covered) ^ 0xFF;
        assert_eq!(
            calculate(ChecksumKind::VolkswagenMqb, 0x40, &s, &data).unwrap(),
            u32::from(expected)
        );
    }

    #[test]
    fn hyundai_canfd_is_16_bit() {
        let s = sig(0, 16, true);
        let data = [0u8; 32];
        let c = calculate(ChecksumKind::HyundaiCanFd, 0x50, &s, &data).unwrap();
        assert!(c <= 0xFFFF);
        let mut other = data;
        other[5] = 1;
        assert_ne!(c, calculate(ChecksumKind::HyundaiCanFd, 0x50, &s, &other).unwrap());
    }

    #[test]
    fn short_payloads_are_rejected_not_panicking() {
        let s = sig(56, 8, true);
        for kind in [
            ChecksumKind::Honda,
            ChecksumKind::Toyota,
            ChecksumKind::Xor,
            ChecksumKind::NegatedByteSum,
            ChecksumKind::VolkswagenMqb,
            ChecksumKind::HyundaiCanFd,
        ] {
            assert!(matches!(
                calculate(kind, 0x100, &s, &[]),
                Err(ChecksumError::PayloadTooShort { .. })
            ));
        }
    }

    #[test]
    fn deterministic_and_bit_sensitive() {
        let s = sig(63, 8, false);
        let base = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0x00];
        let reference = calculate(ChecksumKind::SaeJ1850, 0x200, &s, &base).unwrap();
        assert_eq!(reference, calculate(ChecksumKind::SaeJ1850, 0x200, &s, &base).unwrap());

        // every single-bit flip outside the checksum byte changes a CRC-8
        let mut changed = 0;
        let positions = 7 * 8;
        for bit in 0..positions {
            let mut data = base;
            data[bit / 8] ^= 1 << (bit % 8);
            if calculate(ChecksumKind::SaeJ1850, 0x200, &s, &data).unwrap() != reference {
                changed += 1;
            }
        }
        assert_eq!(changed, positions);
    }

    #[test]
    fn dbc_prefix_selection() {
        assert_eq!(ChecksumLayout::for_dbc("toyota_nodsu_pt_generated").unwrap().kind, ChecksumKind::Toyota);
        assert_eq!(ChecksumLayout::for_dbc("acura_ilx_2016_can_generated").unwrap().kind, ChecksumKind::Honda);
        assert_eq!(ChecksumLayout::for_dbc("vw_mqb").unwrap().kind, ChecksumKind::VolkswagenMqb);
        assert!(ChecksumLayout::for_dbc("ford_lincoln_base_pt").is_none());
    }

    #[test]
    fn declared_names_cover_every_kind() {
        for name in [
            "honda",
            "toyota",
            "subaru",
            "negated_byte_sum",
            "tesla",
            "xor",
            "chrysler",
            "body",
            "fca_giorgio",
            "sae_j1850",
            "volkswagen_mqb",
            "hyundai_can_fd",
        ] {
            let kind = ChecksumKind::from_name(name).unwrap();
            assert_eq!(ChecksumLayout::for_kind(kind).kind, kind);
        }
        assert_eq!(ChecksumKind::from_name("crc32"), None);
        // prefix and declared layouts agree
        assert_eq!(
            ChecksumLayout::for_dbc("honda_civic_ex_2022_can_generated"),
            Some(ChecksumLayout::for_kind(ChecksumKind::Honda))
        );
    }
}
