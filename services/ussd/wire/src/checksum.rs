//! Per-fragment CRC32 helpers.

/// CRC32 (IEEE) of `bytes` as 8 lowercase hex digits, zero-padded.
pub fn crc32_hex(bytes: &[u8]) -> String {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    format!("{:08x}", hasher.finalize())
}

/// Compare a fragment against an expected checksum.
///
/// Returns the computed checksum on mismatch so callers can report both sides.
pub fn verify_fragment(fragment: &[u8], expected: &str) -> Result<(), String> {
    let computed = crc32_hex(fragment);
    if computed.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(computed)
    }
}
