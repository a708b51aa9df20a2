//! Transfer reassembly.
//!
//! Given every token captured for one finished transfer, in arrival order, rebuild the
//! original document:
//!
//! 1. reject an empty set
//! 2. parse every token (first failure aborts, tagged with its position)
//! 3. sort by id and require the contiguous range `1..=N`
//! 4. decode each payload, verify its CRC32 if enabled, append it
//! 5. gunzip the concatenation
//! 6. decode the text
//!
//! Checksums cover each fragment before concatenation, not the inflated document.
//! Reassembly is a pure function of the token set: arrival order and timing do not matter,
//! and the same input always yields the same document or the same error.

use crate::checksum::verify_fragment;
use crate::encoding::TextEncoding;
use crate::error::ReassemblyError;
use crate::packet::Packet;
use bytes::{Bytes, BytesMut};
use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use std::io::Read;
use tracing::{debug, trace, warn};

/// Reassembly options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReassemblyOptions {
    /// Verify each fragment's CRC32 against its packet checksum
    pub verify_checksum: bool,
    /// Encoding of the inflated document
    pub encoding: TextEncoding,
}

impl Default for ReassemblyOptions {
    fn default() -> Self {
        Self {
            verify_checksum: true,
            encoding: TextEncoding::Utf8,
        }
    }
}

/// A reconstructed document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Inflated bytes
    pub bytes: Bytes,
    /// `bytes` decoded with the requested encoding
    pub text: String,
    /// Number of packets the document was rebuilt from
    pub packet_count: usize,
}

/// Rebuilds documents from captured tokens
#[derive(Debug, Clone, Default)]
pub struct Reassembler {
    options: ReassemblyOptions,
}

impl Reassembler {
    /// Create a reassembler with the given options
    pub fn new(options: ReassemblyOptions) -> Self {
        Self { options }
    }

    /// Options in effect
    pub fn options(&self) -> &ReassemblyOptions {
        &self.options
    }

    /// Reassemble and decode the document text
    pub fn reassemble<S: AsRef<str>>(&self, tokens: &[S]) -> Result<Document, ReassemblyError> {
        let (bytes, packet_count) = self.inflate(tokens)?;
        let text = self.options.encoding.decode(&bytes).map_err(|e| {
            warn!("Reassembled {} bytes but text decode failed: {}", bytes.len(), e);
            e
        })?;

        debug!(
            "Reassembled document: {} packets, {} bytes",
            packet_count,
            bytes.len()
        );
        Ok(Document {
            bytes,
            text,
            packet_count,
        })
    }

    /// Reassemble up to the inflated bytes, without text decoding
    pub fn reassemble_bytes<S: AsRef<str>>(&self, tokens: &[S]) -> Result<Bytes, ReassemblyError> {
        self.inflate(tokens).map(|(bytes, _)| bytes)
    }

    fn inflate<S: AsRef<str>>(&self, tokens: &[S]) -> Result<(Bytes, usize), ReassemblyError> {
        let packets = order_packets(tokens)?;
        let compressed = self.concat_fragments(&packets)?;
        let inflated = gunzip(&compressed)?;
        Ok((inflated, packets.len()))
    }

    fn concat_fragments(&self, packets: &[Packet]) -> Result<Bytes, ReassemblyError> {
        let mut buf = BytesMut::new();
        for packet in packets {
            let fragment =
                packet
                    .decode_payload()
                    .map_err(|e| ReassemblyError::PayloadDecode {
                        id: packet.id(),
                        reason: e.to_string(),
                    })?;

            if self.options.verify_checksum {
                if let Err(computed) = verify_fragment(&fragment, packet.checksum()) {
                    warn!(
                        "Checksum mismatch on packet #{}: expected {}, computed {}",
                        packet.id(),
                        packet.checksum(),
                        computed
                    );
                    return Err(ReassemblyError::ChecksumMismatch {
                        id: packet.id(),
                        expected: packet.checksum().to_string(),
                        computed,
                    });
                }
            }

            trace!("Appending packet #{} ({} bytes)", packet.id(), fragment.len());
            buf.extend_from_slice(&fragment);
        }
        Ok(buf.freeze())
    }
}

/// Parse every token and return the packets sorted by id, checked for contiguity
pub fn order_packets<S: AsRef<str>>(tokens: &[S]) -> Result<Vec<Packet>, ReassemblyError> {
    if tokens.is_empty() {
        return Err(ReassemblyError::EmptyTransfer);
    }

    let mut packets = tokens
        .iter()
        .enumerate()
        .map(|(position, token)| {
            Packet::from_token(token.as_ref())
                .map_err(|source| ReassemblyError::Packet { position, source })
        })
        .collect::<Result<Vec<_>, _>>()?;

    packets.sort_by_key(Packet::id);

    for (index, packet) in packets.iter().enumerate() {
        let expected = index as u32 + 1;
        if packet.id() != expected {
            return Err(ReassemblyError::SequenceGap {
                expected,
                got: packet.id(),
            });
        }
    }

    Ok(packets)
}

fn gunzip(compressed: &[u8]) -> Result<Bytes, ReassemblyError> {
    if compressed.is_empty() {
        return Err(ReassemblyError::Decompression(
            "empty compressed stream".to_string(),
        ));
    }

    let mut out = Vec::new();
    MultiGzDecoder::new(compressed)
        .read_to_end(&mut out)
        .map_err(|e| ReassemblyError::Decompression(e.to_string()))?;
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::crc32_hex;
    use crate::error::PacketError;
    use crate::packetizer::Packetizer;
    use base64::prelude::BASE64_STANDARD;
    use base64::Engine;

    const DOC: &str = "<html><body><h1>Hello over USSD</h1><p>Chunked, checked, inflated.</p></body></html>";

    fn packets_for(doc: &[u8], fragment_size: usize) -> Vec<Packet> {
        Packetizer::new(fragment_size).packets(doc).unwrap()
    }

    fn tokens_of(packets: &[Packet]) -> Vec<String> {
        packets.iter().map(|p| p.to_token(None, None)).collect()
    }

    /// Replace a packet's payload with a one-byte-flipped copy, keeping its checksum.
    fn corrupt(packet: &Packet) -> Packet {
        let last = packet.decode_payload().unwrap().len() - 1;
        corrupt_at(packet, last)
    }

    fn corrupt_at(packet: &Packet, offset: usize) -> Packet {
        let mut fragment = packet.decode_payload().unwrap();
        fragment[offset] ^= 0xff;
        Packet::new(
            packet.id(),
            packet.checksum(),
            BASE64_STANDARD.encode(&fragment),
        )
    }

    #[test]
    fn test_roundtrip_in_order() {
        let tokens = Packetizer::new(16).packetize(DOC.as_bytes()).unwrap();
        let doc = Reassembler::default().reassemble(&tokens).unwrap();
        assert_eq!(doc.text, DOC);
        assert_eq!(doc.packet_count, tokens.len());
    }

    #[test]
    fn test_arrival_order_irrelevant() {
        let mut tokens = Packetizer::new(16).packetize(DOC.as_bytes()).unwrap();
        tokens.reverse();
        tokens.swap(0, 1);
        let doc = Reassembler::default().reassemble(&tokens).unwrap();
        assert_eq!(doc.text, DOC);
    }

    #[test]
    fn test_empty_transfer() {
        let tokens: Vec<String> = Vec::new();
        assert_eq!(
            Reassembler::default().reassemble(&tokens),
            Err(ReassemblyError::EmptyTransfer)
        );
    }

    #[test]
    fn test_parse_failure_reports_position() {
        let mut tokens = Packetizer::new(16).packetize(DOC.as_bytes()).unwrap();
        tokens.insert(2, "%%%".to_string());
        match Reassembler::default().reassemble(&tokens) {
            Err(ReassemblyError::Packet {
                position: 2,
                source: PacketError::OuterDecode(_),
            }) => {}
            other => panic!("expected outer decode failure at 2, got {:?}", other),
        }
    }

    #[test]
    fn test_sequence_gap() {
        let packets = packets_for(DOC.as_bytes(), 16);
        assert!(packets.len() >= 4);
        let subset = vec![packets[0].clone(), packets[1].clone(), packets[3].clone()];
        assert_eq!(
            Reassembler::default().reassemble(&tokens_of(&subset)),
            Err(ReassemblyError::SequenceGap {
                expected: 3,
                got: 4
            })
        );
    }

    #[test]
    fn test_gap_reported_even_with_bad_checksums() {
        let packets = [
            Packet::new(1, "00000000", "AAAA"),
            Packet::new(2, "00000000", "AAAA"),
            Packet::new(4, "00000000", "AAAA"),
        ];
        assert_eq!(
            Reassembler::default().reassemble(&tokens_of(&packets)),
            Err(ReassemblyError::SequenceGap {
                expected: 3,
                got: 4
            })
        );
    }

    #[test]
    fn test_duplicate_id_is_a_gap() {
        let packets = packets_for(DOC.as_bytes(), 16);
        let mut dup = packets.clone();
        dup.insert(1, packets[0].clone());
        assert_eq!(
            Reassembler::default().reassemble(&tokens_of(&dup)),
            Err(ReassemblyError::SequenceGap {
                expected: 2,
                got: 1
            })
        );
    }

    #[test]
    fn test_sequence_must_start_at_one() {
        let packets = [Packet::new(2, "00000000", "AAAA")];
        assert_eq!(
            Reassembler::default().reassemble(&tokens_of(&packets)),
            Err(ReassemblyError::SequenceGap {
                expected: 1,
                got: 2
            })
        );
    }

    #[test]
    fn test_payload_decode_error() {
        let packets = [Packet::new(1, "00000000", "not*base64")];
        assert!(matches!(
            Reassembler::default().reassemble(&tokens_of(&packets)),
            Err(ReassemblyError::PayloadDecode { id: 1, .. })
        ));
    }

    #[test]
    fn test_checksum_mismatch_names_packet() {
        let mut packets = packets_for(DOC.as_bytes(), 16);
        packets[2] = corrupt(&packets[2]);
        let expected = packets[2].checksum().to_string();
        let computed = crc32_hex(&packets[2].decode_payload().unwrap());

        assert_eq!(
            Reassembler::default().reassemble(&tokens_of(&packets)),
            Err(ReassemblyError::ChecksumMismatch {
                id: 3,
                expected,
                computed
            })
        );
    }

    #[test]
    fn test_unverified_corruption_is_reproducible() {
        let mut packets = packets_for(DOC.as_bytes(), 16);
        packets[2] = corrupt(&packets[2]);
        let tokens = tokens_of(&packets);

        let reassembler = Reassembler::new(ReassemblyOptions {
            verify_checksum: false,
            encoding: TextEncoding::Latin1,
        });
        let first = reassembler.reassemble(&tokens);
        let second = reassembler.reassemble(&tokens);

        // Either deflate rejects the stream or the gzip trailer does; never the checksum.
        assert!(!matches!(
            first,
            Err(ReassemblyError::ChecksumMismatch { .. })
        ));
        assert_eq!(first, second);
    }

    #[test]
    fn test_unverified_corruption_can_succeed() {
        // Byte 5 of the stream sits in the gzip header's MTIME, which inflation ignores.
        let mut packets = packets_for(DOC.as_bytes(), 16);
        packets[0] = corrupt_at(&packets[0], 5);
        let tokens = tokens_of(&packets);

        assert!(matches!(
            Reassembler::default().reassemble(&tokens),
            Err(ReassemblyError::ChecksumMismatch { id: 1, .. })
        ));

        let reassembler = Reassembler::new(ReassemblyOptions {
            verify_checksum: false,
            ..Default::default()
        });
        let first = reassembler.reassemble(&tokens).unwrap();
        let second = reassembler.reassemble(&tokens).unwrap();
        assert_eq!(first.text, DOC);
        assert_eq!(first, second);
    }

    #[test]
    fn test_truncated_stream_is_decompression_error() {
        let packets = packets_for(DOC.as_bytes(), 16);
        let head = &packets[..packets.len() - 1];
        assert!(matches!(
            Reassembler::default().reassemble(&tokens_of(head)),
            Err(ReassemblyError::Decompression(_))
        ));
    }

    #[test]
    fn test_not_gzip_is_decompression_error() {
        let fragment = b"plain bytes, not gzip";
        let packets = [Packet::new(
            1,
            crc32_hex(fragment),
            BASE64_STANDARD.encode(fragment),
        )];
        assert!(matches!(
            Reassembler::default().reassemble(&tokens_of(&packets)),
            Err(ReassemblyError::Decompression(_))
        ));
    }

    #[test]
    fn test_text_decode_error() {
        let tokens = Packetizer::new(16).packetize(&[0xff, 0xfe, 0xfd]).unwrap();
        assert!(matches!(
            Reassembler::default().reassemble(&tokens),
            Err(ReassemblyError::TextDecode { .. })
        ));
        assert_eq!(
            Reassembler::default()
                .reassemble_bytes(&tokens)
                .unwrap()
                .as_ref(),
            &[0xff, 0xfe, 0xfd]
        );
    }
}
