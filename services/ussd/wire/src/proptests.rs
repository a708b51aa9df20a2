//! Property-based tests for the wire pipeline.
//!
//! - Packetize then reassemble returns the original bytes, for any arrival order
//! - Reassembly is deterministic
//! - Envelope extraction never panics and always returns a trimmed, comma-free token
//! - The flat parser never panics on arbitrary text

use proptest::prelude::*;

use crate::envelope::{extract_token, wrap_envelope};
use crate::packet::parse_flat_object;
use crate::packetizer::Packetizer;
use crate::reassembly::Reassembler;

/// A document, and its tokens in an arbitrary arrival order.
fn shuffled_transfer() -> impl Strategy<Value = (Vec<u8>, Vec<String>)> {
    (prop::collection::vec(any::<u8>(), 0..2048), 1usize..200).prop_flat_map(|(doc, size)| {
        let tokens = Packetizer::new(size).packetize(&doc).unwrap();
        (Just(doc), Just(tokens).prop_shuffle())
    })
}

proptest! {
    /// Any arrival order of a complete token set rebuilds the document.
    #[test]
    fn roundtrip_any_order((doc, tokens) in shuffled_transfer()) {
        let bytes = Reassembler::default().reassemble_bytes(&tokens).unwrap();
        prop_assert_eq!(bytes.as_ref(), doc.as_slice());
    }

    /// Text documents come back as the same text.
    #[test]
    fn text_roundtrip(text in ".{0,500}", size in 1usize..64) {
        let tokens = Packetizer::new(size).packetize(text.as_bytes()).unwrap();
        let doc = Reassembler::default().reassemble(&tokens).unwrap();
        prop_assert_eq!(doc.text, text);
        prop_assert_eq!(doc.packet_count, tokens.len());
    }

    /// Two runs over the same tokens agree, success or failure.
    #[test]
    fn reassembly_is_deterministic(
        (_, mut tokens) in shuffled_transfer(),
        drop_at in any::<prop::sample::Index>(),
    ) {
        if tokens.len() > 1 {
            tokens.remove(drop_at.index(tokens.len()));
        }
        let reassembler = Reassembler::default();
        prop_assert_eq!(reassembler.reassemble_bytes(&tokens), reassembler.reassemble_bytes(&tokens));
    }

    /// Extraction is total and its output is trimmed and comma-free.
    #[test]
    fn extract_token_is_total(reply in ".{0,200}") {
        if let Some(token) = extract_token(&reply) {
            prop_assert!(!token.is_empty());
            prop_assert!(!token.contains(','));
            prop_assert_eq!(token, token.trim());
        }
    }

    /// Wrapped Base64-alphabet tokens extract unchanged.
    #[test]
    fn wrapped_token_extracts(token in "[A-Za-z0-9+/]{1,80}={0,2}", seq in 0usize..1000) {
        let reply = wrap_envelope(&token, seq);
        prop_assert_eq!(extract_token(&reply), Some(token.as_str()));
    }

    /// The flat parser returns, never panics.
    #[test]
    fn flat_parser_is_total(text in ".{0,200}") {
        let _ = parse_flat_object(&text);
    }
}
