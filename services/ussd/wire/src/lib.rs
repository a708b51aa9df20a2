//! Reply envelopes, packet parsing, integrity checks and reassembly for the USSD tunnel.
//!
//! This crate turns the text replies captured during a USSD session back into the
//! document the remote server packetized. Everything here is pure: no I/O, no clocks,
//! no shared state. The session crate feeds it and decides when a transfer is finished.
//!
//! ## Features
//!
//! - **Envelope Extraction**: pull the payload-bearing token out of a bracketed reply
//! - **Packet Parsing**: outer Base64, then a deliberately flat JSON object
//! - **Integrity**: per-fragment CRC32, compared before concatenation
//! - **Reassembly**: id ordering, contiguity checks, gzip inflate, text decoding
//! - **Packetizing**: the server-side inverse, for tests and tooling
//!
//! ## Wire Format
//!
//! ```text
//! raw reply      [<token>, <ignored...>]
//!                   |
//! token          base64( {"id":N,"prev":..,"next":..,"checksum":"<crc32 hex>","payload":"<b64>"} )
//!                                                                            |
//! fragment       N-th slice of one gzip stream  <---------------------------+
//!
//! document       gunzip( fragment_1 || fragment_2 || ... || fragment_N )
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checksum;
pub mod encoding;
pub mod envelope;
pub mod error;
pub mod packet;
pub mod packetizer;
pub mod reassembly;

#[cfg(test)]
mod proptests;

// Re-export main types
pub use checksum::{crc32_hex, verify_fragment};
pub use encoding::TextEncoding;
pub use envelope::{extract_token, wrap_envelope};
pub use error::{PacketError, ReassemblyError};
pub use packet::{parse_flat_object, FlatValue, Packet};
pub use packetizer::{Packetizer, DEFAULT_FRAGMENT_SIZE};
pub use reassembly::{Document, ReassemblyOptions, Reassembler};
