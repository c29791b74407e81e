//! Line-oriented DBC grammar.
//!
//! Only `BO_`, `SG_`, `VAL_` and the network attribute
//! `BA_ "ChecksumKind" "<name>";` are interpreted. Every other section
//! (comments, other attributes, node lists, value tables) is skipped, but a
//! line that starts with an interpreted keyword and fails its full pattern is
//! rejected with its line number.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::catalog::{Catalog, MessageDef, Multiplex, Number, SignalDef, SignalType, ValueTable};
use crate::checksum::{ChecksumKind, ChecksumLayout};
use crate::error::{DbcError, DbcResult};
use crate::include::{IncludeResolver, NoIncludes, expand_includes};

static BO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^BO_ (\d+|0[xX][0-9A-Fa-f]+) (\w+)\s*:\s*(\d+)\s+(\w+)\s*$").unwrap()
});

static SG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^SG_ (\w+)(?:\s+(M|m\d+M?))?\s*:\s*(\d+)\|(\d+)@([01])([+-])\s*\(([0-9.+\-eE]+),([0-9.+\-eE]+)\)\s*\[([0-9.+\-eE]+)\|([0-9.+\-eE]+)\]\s*"(.*)"\s*(.*)$"#,
    )
    .unwrap()
});

static VAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^VAL_ (\d+|0[xX][0-9A-Fa-f]+) (\w+)((?:\s+-?\d+\s+"[^"]*")*)\s*;?\s*$"#).unwrap()
});

static CHECKSUM_KIND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^BA_ "ChecksumKind" "(\w+)"\s*;?\s*$"#).unwrap());

static VAL_PAIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(-?\d+)\s+"([^"]*)""#).unwrap());

/// Bit 31 of a DBC address marks a 29-bit identifier.
const EXTENDED_FLAG: u64 = 0x8000_0000;
const EXTENDED_MASK: u64 = 0x1FFF_FFFF;

/// Parse DBC text with no includes and no checksum layout.
pub fn parse(text: &str) -> DbcResult<Catalog> {
    parse_with("", text, &NoIncludes, None)
}

/// Parse DBC text named `name`, splicing includes through `resolver` and
/// typing CHECKSUM / COUNTER signals against `layout`. A `ChecksumKind`
/// attribute in the text takes precedence over `layout`.
pub fn parse_with(
    name: &str,
    text: &str,
    resolver: &dyn IncludeResolver,
    layout: Option<ChecksumLayout>,
) -> DbcResult<Catalog> {
    let text = expand_includes(text, resolver)?;
    let layout = declared_layout(&text)?.or(layout);

    let mut messages: BTreeMap<u32, MessageDef> = BTreeMap::new();
    let mut value_tables: BTreeMap<u32, BTreeMap<String, ValueTable>> = BTreeMap::new();
    let mut current: Option<u32> = None;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();

        if line.starts_with("BO_ ") {
            let msg = parse_message(line, line_no)?;
            if messages.contains_key(&msg.address) {
                return Err(DbcError::DuplicateAddress {
                    address: msg.address,
                    line: line_no,
                });
            }
            current = Some(msg.address);
            messages.insert(msg.address, msg);
        } else if line.starts_with("SG_ ") {
            let Some(msg) = current.and_then(|a| messages.get_mut(&a)) else {
                return Err(malformed(line_no, line));
            };
            let sig = parse_signal(line, line_no, msg, layout.as_ref())?;
            msg.signals.push(sig);
        } else if line.starts_with("VAL_ ") {
            let (address, signal, table) = parse_values(line, line_no)?;
            if !messages.contains_key(&address) {
                tracing::warn!(
                    address = format!("0x{:X}", address),
                    signal = %signal,
                    line = line_no,
                    "value table for unknown message ignored"
                );
                continue;
            }
            value_tables.entry(address).or_default().insert(signal, table);
        }
    }

    for msg in messages.values_mut() {
        msg.signals.sort_by_key(|s| s.start_bit);
    }

    tracing::debug!(
        dbc = %name,
        messages = messages.len(),
        checksum = ?layout.map(|l| l.kind),
        "parsed DBC"
    );
    Ok(Catalog::new(name.to_string(), messages, value_tables, layout))
}

/// Attributes usually trail the signals they describe, so this scans ahead
/// of the main pass.
fn declared_layout(text: &str) -> DbcResult<Option<ChecksumLayout>> {
    let mut declared = None;
    for (idx, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if !line.starts_with("BA_ \"ChecksumKind\"") {
            continue;
        }
        let kind = CHECKSUM_KIND_RE
            .captures(line)
            .and_then(|caps| ChecksumKind::from_name(&caps[1]))
            .ok_or_else(|| malformed(idx + 1, line))?;
        declared = Some(ChecksumLayout::for_kind(kind));
    }
    Ok(declared)
}

fn malformed(line: usize, text: &str) -> DbcError {
    DbcError::MalformedDefinition {
        line,
        text: text.to_string(),
    }
}

fn parse_address(s: &str, line: usize, text: &str) -> DbcResult<u32> {
    let raw = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    }
    .map_err(|_| malformed(line, text))?;

    let address = if raw & EXTENDED_FLAG != 0 {
        raw & EXTENDED_MASK
    } else {
        raw
    };
    u32::try_from(address).map_err(|_| malformed(line, text))
}

fn parse_message(line: &str, line_no: usize) -> DbcResult<MessageDef> {
    let caps = BO_RE.captures(line).ok_or_else(|| malformed(line_no, line))?;
    let address = parse_address(&caps[1], line_no, line)?;
    let size: usize = caps[3].parse().map_err(|_| malformed(line_no, line))?;
    if size > crate::catalog::MAX_MESSAGE_SIZE {
        return Err(malformed(line_no, line));
    }
    Ok(MessageDef {
        address,
        name: caps[2].to_string(),
        size,
        sender: caps[4].to_string(),
        signals: Vec::new(),
    })
}

fn parse_signal(
    line: &str,
    line_no: usize,
    msg: &MessageDef,
    layout: Option<&ChecksumLayout>,
) -> DbcResult<SignalDef> {
    let caps = SG_RE.captures(line).ok_or_else(|| malformed(line_no, line))?;
    let number = |i: usize| Number::parse(&caps[i]).ok_or_else(|| malformed(line_no, line));

    let name = caps[1].to_string();
    let start_bit: usize = caps[3].parse().map_err(|_| malformed(line_no, line))?;
    let size: usize = caps[4].parse().map_err(|_| malformed(line_no, line))?;
    let little_endian = &caps[5] == "1";
    let signed = &caps[6] == "-";

    let out_of_bounds = || DbcError::SignalOutOfBounds {
        address: msg.address,
        signal: name.clone(),
        size: msg.size,
    };
    let mut sig = SignalDef::new(
        name.clone(),
        start_bit,
        size,
        little_endian,
        signed,
        number(7)?,
        number(8)?,
    )
    .ok_or_else(out_of_bounds)?;
    if !sig.fits(msg.size) {
        return Err(out_of_bounds());
    }

    sig.min = number(9)?;
    sig.max = number(10)?;
    sig.unit = caps[11].to_string();
    sig.receivers = caps[12]
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect();
    sig.multiplex = match caps.get(2).map(|m| m.as_str()) {
        None => Multiplex::None,
        Some("M") => Multiplex::Multiplexor,
        // `m3M` (nested multiplexor) is decoded as plain `m3`
        Some(m) => {
            let digits: String = m[1..].chars().take_while(char::is_ascii_digit).collect();
            Multiplex::Multiplexed(digits.parse().map_err(|_| malformed(line_no, line))?)
        }
    };

    sig.kind = match (sig.name.as_str(), layout) {
        ("CHECKSUM", Some(layout)) => {
            check_geometry(
                &sig,
                line_no,
                layout.checksum_size,
                layout.checksum_start_bit,
                layout.little_endian,
            )?;
            SignalType::Checksum(layout.kind)
        }
        ("COUNTER", Some(layout)) => {
            check_geometry(
                &sig,
                line_no,
                layout.counter_size,
                layout.counter_start_bit,
                layout.little_endian,
            )?;
            SignalType::Counter
        }
        ("COUNTER", None) => SignalType::Counter,
        _ => SignalType::Normal,
    };
    Ok(sig)
}

fn check_geometry(
    sig: &SignalDef,
    line: usize,
    size: Option<usize>,
    start_bit: Option<usize>,
    little_endian: bool,
) -> DbcResult<()> {
    let violation = |reason: String| Err(DbcError::ChecksumLayout { line, reason });
    if let Some(size) = size
        && sig.size != size
    {
        return violation(format!("{} must be {size} bits, got {}", sig.name, sig.size));
    }
    if let Some(start) = start_bit
        && sig.start_bit % 8 != start
    {
        return violation(format!(
            "{} must start at bit {start} of a byte, got {}",
            sig.name,
            sig.start_bit % 8
        ));
    }
    if sig.is_little_endian != little_endian {
        return violation(format!("{} has the wrong byte order", sig.name));
    }
    Ok(())
}

fn parse_values(line: &str, line_no: usize) -> DbcResult<(u32, String, ValueTable)> {
    let caps = VAL_RE.captures(line).ok_or_else(|| malformed(line_no, line))?;
    let address = parse_address(&caps[1], line_no, line)?;
    let mut table = ValueTable::default();
    for pair in VAL_PAIR_RE.captures_iter(&caps[3]) {
        let value: i64 = pair[1].parse().map_err(|_| malformed(line_no, line))?;
        table.entries.insert(value, normalize_label(&pair[2]));
    }
    Ok((address, caps[2].to_string(), table))
}

/// `"lane change?"` -> `LANE_CHANGE\?`.
pub fn normalize_label(label: &str) -> String {
    label
        .trim()
        .replace('?', "\\?")
        .to_uppercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}
