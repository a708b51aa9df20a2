//! Session configuration.

use crate::keywords::{KeywordTable, ProtocolKeywords};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use ussd_wire::{ReassemblyOptions, TextEncoding};

/// Configuration for one USSD session, passed to the driver at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Code dialed to open the session, e.g. `*384*1#`
    pub dial_code: String,
    /// Address sent when the server prompts for a domain
    pub target_address: String,
    /// Seconds to wait for each reply
    pub turn_timeout_secs: u64,
    /// Times a turn's input is re-sent after a timeout
    pub max_turn_retries: u32,
    /// Verify per-fragment checksums during reassembly
    pub verify_checksum: bool,
    /// Encoding of the reassembled document
    pub encoding: TextEncoding,
    /// Fail the session on a chunk reply that carries no token
    pub strict_envelope: bool,
    /// Server phrases that drive the session
    pub keywords: ProtocolKeywords,
    /// Platform prompt phrases, for the host UI
    pub keyword_table: KeywordTable,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dial_code: String::new(),
            target_address: String::new(),
            turn_timeout_secs: 30,
            max_turn_retries: 2,
            verify_checksum: true,
            encoding: TextEncoding::Utf8,
            strict_envelope: false,
            keywords: ProtocolKeywords::default(),
            keyword_table: KeywordTable::default(),
        }
    }
}

impl SessionConfig {
    /// Per-turn reply timeout
    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }

    /// Options for reassembling this session's transfer
    pub fn reassembly_options(&self) -> ReassemblyOptions {
        ReassemblyOptions {
            verify_checksum: self.verify_checksum,
            encoding: self.encoding,
        }
    }
}
