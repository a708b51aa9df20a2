//! Envelope extraction for raw USSD replies.
//!
//! A reply that carries a packet looks like `[<token>, <ignored...>]`. Only the first
//! comma-separated element is payload. The split is positional: there is no nesting or
//! escaping awareness, so a token containing a literal `,` or `]` is cut short. Tokens are
//! Base64 in practice, which never contains either character.

/// Extract the payload-bearing token from one raw reply.
///
/// Returns `None` when the reply is not bracketed, or when the first element is empty.
/// That is not an error; the caller decides whether an empty reply matters.
pub fn extract_token(reply: &str) -> Option<&str> {
    let trimmed = reply.trim();
    let inner = trimmed.strip_prefix('[')?;
    let inner = inner.strip_suffix(']').unwrap_or(inner);

    let token = inner.split(',').next().unwrap_or_default().trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Render a token as the server would put it in a reply, `[<token>, <seq>]`.
pub fn wrap_envelope(token: &str, seq: usize) -> String {
    format!("[{}, {}]", token, seq)
}
