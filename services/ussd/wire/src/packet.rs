//! Packet parsing.
//!
//! Each captured token is standard Base64 wrapping one flat JSON object:
//!
//! ```text
//! { "id": <int >= 1>, "prev": <int|null>, "next": <int|null>,
//!   "checksum": "<8 lowercase hex>", "payload": "<standard Base64 of a gzip fragment>" }
//! ```
//!
//! The schema is flat on purpose, so the object is scanned directly rather than handed to a
//! general JSON parser. Nested objects and arrays are rejected. Member splitting is
//! quote-aware: commas, colons and braces inside string values are data.

use crate::error::PacketError;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use std::collections::BTreeMap;

/// Standard alphabet; trailing `=` padding is optional when decoding
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A value in a flat JSON object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlatValue {
    /// Quoted string, unescaped
    Str(String),
    /// Bare token such as a number or boolean, as written
    Bare(String),
    /// `null`
    Null,
}

impl FlatValue {
    /// Text of a string or bare value; `None` for null
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FlatValue::Str(s) | FlatValue::Bare(s) => Some(s),
            FlatValue::Null => None,
        }
    }
}

/// One parsed, schema-validated packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    id: u32,
    checksum: String,
    payload: String,
}

impl Packet {
    /// Create a packet; the checksum is lower-cased
    pub fn new(id: u32, checksum: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id,
            checksum: checksum.into().to_ascii_lowercase(),
            payload: payload.into(),
        }
    }

    /// 1-based sequence id
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Lowercase hex CRC32 of the decoded payload
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Base64 payload as carried on the wire
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Decode a captured token: outer Base64, then the flat JSON object
    pub fn from_token(token: &str) -> Result<Self, PacketError> {
        let raw = LENIENT_BASE64
            .decode(token.trim())
            .map_err(|e| PacketError::OuterDecode(e.to_string()))?;
        let json = String::from_utf8(raw)
            .map_err(|_| PacketError::Schema("decoded packet is not utf-8 text".to_string()))?;
        Self::from_json(&json)
    }

    /// Parse the packet object itself
    pub fn from_json(json: &str) -> Result<Self, PacketError> {
        let fields = parse_flat_object(json)?;

        let id_text = required(&fields, "id")?;
        let id = id_text
            .trim()
            .parse::<u32>()
            .map_err(|_| PacketError::Schema(format!("id is not an integer: {}", id_text)))?;
        let checksum = required(&fields, "checksum")?;
        let payload = required(&fields, "payload")?;

        Ok(Self::new(id, checksum, payload))
    }

    /// Decode the Base64 payload into the raw fragment bytes
    pub fn decode_payload(&self) -> Result<Vec<u8>, base64::DecodeError> {
        LENIENT_BASE64.decode(self.payload.as_bytes())
    }

    /// Encode as a transport token, linking to its neighbours
    pub fn to_token(&self, prev: Option<u32>, next: Option<u32>) -> String {
        let json = serde_json::json!({
            "id": self.id,
            "prev": prev,
            "next": next,
            "checksum": self.checksum,
            "payload": self.payload,
        });
        BASE64_STANDARD.encode(json.to_string())
    }
}

fn required<'a>(
    fields: &'a BTreeMap<String, FlatValue>,
    name: &'static str,
) -> Result<&'a str, PacketError> {
    fields
        .get(name)
        .and_then(FlatValue::as_text)
        .ok_or(PacketError::MissingField(name))
}

/// Parse a single flat JSON object into its members.
///
/// Duplicate keys keep the last value.
pub fn parse_flat_object(text: &str) -> Result<BTreeMap<String, FlatValue>, PacketError> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .ok_or_else(|| schema("not a JSON object"))?;

    let mut fields = BTreeMap::new();
    if body.trim().is_empty() {
        return Ok(fields);
    }

    for member in split_members(body)? {
        let (key_raw, value_raw) = member.split_once_colon()?;
        let key = parse_key(key_raw)?;
        let value = parse_value(value_raw)?;
        fields.insert(key, value);
    }

    Ok(fields)
}

/// One `key: value` slice of the object body, with the colon offset if present
struct Member<'a> {
    text: &'a str,
    colon: Option<usize>,
}

impl<'a> Member<'a> {
    fn split_once_colon(&self) -> Result<(&'a str, &'a str), PacketError> {
        if self.text.trim().is_empty() {
            return Err(schema("empty member"));
        }
        let colon = self
            .colon
            .ok_or_else(|| schema(format!("member without `:`: {}", self.text.trim())))?;
        Ok((&self.text[..colon], &self.text[colon + 1..]))
    }
}

/// Split the body on commas outside string literals
fn split_members(body: &str) -> Result<Vec<Member<'_>>, PacketError> {
    let mut members = Vec::new();
    let mut start = 0;
    let mut colon = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in body.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            ':' if colon.is_none() => colon = Some(i - start),
            ',' => {
                members.push(Member {
                    text: &body[start..i],
                    colon: colon.take(),
                });
                start = i + 1;
            }
            '{' | '}' => return Err(schema("nested objects are not supported")),
            '[' | ']' => return Err(schema("arrays are not supported")),
            _ => {}
        }
    }

    if in_string {
        return Err(schema("unterminated string"));
    }
    members.push(Member {
        text: &body[start..],
        colon,
    });
    Ok(members)
}

fn parse_key(raw: &str) -> Result<String, PacketError> {
    let raw = raw.trim();
    let key = if raw.starts_with('"') {
        unquote(raw)?
    } else {
        raw.to_string()
    };
    if key.is_empty() {
        return Err(schema("empty key"));
    }
    Ok(key)
}

fn parse_value(raw: &str) -> Result<FlatValue, PacketError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(schema("empty value"));
    }
    if raw.starts_with('"') {
        return unquote(raw).map(FlatValue::Str);
    }
    if raw.eq_ignore_ascii_case("null") {
        return Ok(FlatValue::Null);
    }
    if raw.chars().any(|c| c.is_whitespace() || c == '"' || c == ':') {
        return Err(schema(format!("malformed bare value: {}", raw)));
    }
    Ok(FlatValue::Bare(raw.to_string()))
}

/// Strip the surrounding quotes of a string literal and resolve its escapes.
///
/// The closing quote must be the final character.
fn unquote(raw: &str) -> Result<String, PacketError> {
    let inner = raw
        .strip_prefix('"')
        .ok_or_else(|| schema("expected a string"))?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                if i + 1 != inner.len() {
                    return Err(schema(format!("trailing characters after string: {}", raw)));
                }
                return Ok(out);
            }
            '\\' => {
                let (_, esc) = chars.next().ok_or_else(|| schema("dangling escape"))?;
                match esc {
                    '"' => out.push('"'),
                    '\\' => out.push('\\'),
                    '/' => out.push('/'),
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    't' => out.push('\t'),
                    'b' => out.push('\u{8}'),
                    'f' => out.push('\u{c}'),
                    'u' => {
                        let hex: String = chars.by_ref().take(4).map(|(_, h)| h).collect();
                        let ch = u32::from_str_radix(&hex, 16)
                            .ok()
                            .filter(|_| hex.len() == 4)
                            .and_then(char::from_u32)
                            .ok_or_else(|| schema(format!("invalid unicode escape: \\u{}", hex)))?;
                        out.push(ch);
                    }
                    other => return Err(schema(format!("invalid escape: \\{}", other))),
                }
            }
            _ => out.push(c),
        }
    }

    Err(schema("unterminated string"))
}

fn schema(reason: impl Into<String>) -> PacketError {
    PacketError::Schema(reason.into())
}
