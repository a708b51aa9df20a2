//! Server-side packetizing.
//!
//! The inverse of [`crate::reassembly`]: compress a document once, slice the gzip stream
//! into fragments small enough for a USSD reply, and wrap each fragment as a token.

use crate::checksum::crc32_hex;
use crate::packet::Packet;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use tracing::debug;

/// Default fragment size in bytes (Base64 and JSON overhead still has to fit a reply)
pub const DEFAULT_FRAGMENT_SIZE: usize = 120;

/// Splits documents into transport tokens
#[derive(Debug, Clone)]
pub struct Packetizer {
    fragment_size: usize,
}

impl Packetizer {
    /// Create a packetizer; a fragment size of 0 selects [`DEFAULT_FRAGMENT_SIZE`]
    pub fn new(fragment_size: usize) -> Self {
        let fragment_size = if fragment_size == 0 {
            DEFAULT_FRAGMENT_SIZE
        } else {
            fragment_size
        };
        Self { fragment_size }
    }

    /// Configured fragment size
    pub fn fragment_size(&self) -> usize {
        self.fragment_size
    }

    /// Compress `document` and split it into packets, ids 1..=N
    pub fn packets(&self, document: &[u8]) -> std::io::Result<Vec<Packet>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(document)?;
        let compressed = encoder.finish()?;

        let packets: Vec<Packet> = compressed
            .chunks(self.fragment_size)
            .enumerate()
            .map(|(i, fragment)| {
                Packet::new(
                    i as u32 + 1,
                    crc32_hex(fragment),
                    BASE64_STANDARD.encode(fragment),
                )
            })
            .collect();

        debug!(
            "Packetized {} bytes into {} packets ({} compressed bytes)",
            document.len(),
            packets.len(),
            compressed.len()
        );
        Ok(packets)
    }

    /// Compress `document` and return one token per packet, in id order
    pub fn packetize(&self, document: &[u8]) -> std::io::Result<Vec<String>> {
        let packets = self.packets(document)?;
        let last = packets.len() as u32;
        Ok(packets
            .iter()
            .map(|p| {
                let prev = (p.id() > 1).then(|| p.id() - 1);
                let next = (p.id() < last).then(|| p.id() + 1);
                p.to_token(prev, next)
            })
            .collect())
    }
}

impl Default for Packetizer {
    fn default() -> Self {
        Self::new(DEFAULT_FRAGMENT_SIZE)
    }
}
