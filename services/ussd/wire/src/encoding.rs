//! Text encodings for the reconstructed document.

use crate::error::ReassemblyError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Encoding used to interpret the inflated bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextEncoding {
    /// UTF-8, strict
    #[default]
    #[serde(rename = "utf-8", alias = "utf8", alias = "UTF-8")]
    Utf8,
    /// ISO-8859-1; every byte maps to the code point of the same value
    #[serde(rename = "latin1", alias = "iso-8859-1")]
    Latin1,
    /// US-ASCII, strict
    #[serde(rename = "ascii", alias = "us-ascii")]
    Ascii,
}

impl TextEncoding {
    /// Canonical label
    pub fn label(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Latin1 => "latin1",
            TextEncoding::Ascii => "ascii",
        }
    }

    /// Decode `bytes` into a string
    pub fn decode(&self, bytes: &[u8]) -> Result<String, ReassemblyError> {
        match self {
            TextEncoding::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|e| self.error(e.to_string())),
            TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
            TextEncoding::Ascii => match bytes.iter().position(|b| !b.is_ascii()) {
                Some(at) => Err(self.error(format!("non-ascii byte at offset {}", at))),
                None => Ok(bytes.iter().map(|&b| b as char).collect()),
            },
        }
    }

    fn error(&self, reason: String) -> ReassemblyError {
        ReassemblyError::TextDecode {
            encoding: self.label(),
            reason,
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TextEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            "latin1" | "latin-1" | "iso-8859-1" => Ok(TextEncoding::Latin1),
            "ascii" | "us-ascii" => Ok(TextEncoding::Ascii),
            other => Err(format!("unsupported encoding: {}", other)),
        }
    }
}
