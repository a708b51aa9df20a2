//! Packet and reassembly error types.

use thiserror::Error;

/// Errors decoding a single captured token into a packet
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Outer transport encoding is not valid standard Base64
    #[error("outer decode failed: {0}")]
    OuterDecode(String),

    /// Decoded text is not a single flat JSON object, or a field has the wrong shape
    #[error("schema error: {0}")]
    Schema(String),

    /// A required field is absent (or null)
    #[error("missing field `{0}`")]
    MissingField(&'static str),
}

/// Reassembly errors. Every variant is fatal for the transfer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyError {
    /// No tokens were captured
    #[error("empty transfer")]
    EmptyTransfer,

    /// A token failed to parse
    #[error("packet at position {position}: {source}")]
    Packet {
        /// 0-based position of the token in arrival order
        position: usize,
        /// Underlying parse failure
        #[source]
        source: PacketError,
    },

    /// Sorted ids are not the contiguous range 1..N
    #[error("packet id sequence broken: expected {expected}, got {got}")]
    SequenceGap {
        /// Id that should occupy this slot
        expected: u32,
        /// Id that actually does
        got: u32,
    },

    /// A packet's payload is not valid standard Base64
    #[error("packet #{id} payload decode failed: {reason}")]
    PayloadDecode {
        /// Packet id
        id: u32,
        /// Decoder message
        reason: String,
    },

    /// Fragment CRC32 does not match the packet's checksum
    #[error("checksum mismatch on packet #{id}: expected {expected}, computed {computed}")]
    ChecksumMismatch {
        /// Packet id
        id: u32,
        /// Checksum carried by the packet
        expected: String,
        /// Checksum computed over the decoded fragment
        computed: String,
    },

    /// Concatenated fragments are not a valid gzip stream
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// Inflated bytes are not valid in the requested text encoding
    #[error("text decode failed ({encoding}): {reason}")]
    TextDecode {
        /// Encoding label
        encoding: &'static str,
        /// Decoder message
        reason: String,
    },
}

impl ReassemblyError {
    /// Id of the packet this error names, if any
    pub fn packet_id(&self) -> Option<u32> {
        match self {
            ReassemblyError::PayloadDecode { id, .. }
            | ReassemblyError::ChecksumMismatch { id, .. } => Some(*id),
            ReassemblyError::SequenceGap { got, .. } => Some(*got),
            _ => None,
        }
    }
}
