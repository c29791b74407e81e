//! DBC catalog, signal codec and checksum engine.
//!
//! ```text
//! DBC text ──parse──▶ Catalog ──┬──▶ codec::unpack / CanParser   (frames → values)
//!                               └──▶ codec::pack / CanPacker     (values → frames)
//!                                        │
//!                                        ▼
//!                                 checksum::calculate
//! ```

pub mod catalog;
pub mod checksum;
pub mod codec;
pub mod dbc;
pub mod error;
pub mod include;
pub mod packer;
pub mod parser;

pub use catalog::{Catalog, MessageDef, Multiplex, Number, SignalDef, SignalType, ValueTable};
pub use checksum::{ChecksumKind, ChecksumLayout};
pub use codec::{SignalValues, pack, unpack};
pub use dbc::{parse, parse_with};
pub use error::{ChecksumError, CodecError, CodecResult, DbcError, DbcResult};
pub use include::{FsIncludeResolver, IncludeResolver, NoIncludes};
pub use packer::CanPacker;
pub use parser::{CanParser, Subscription};
