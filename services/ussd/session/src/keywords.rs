//! Keyword phrases.
//!
//! Two tables live here. [`ProtocolKeywords`] are the phrases the server puts in its replies
//! to move the session forward. [`KeywordTable`] classifies platform prompts shown before a
//! session starts (loading spinners, carrier errors); the driver never consults it.
//!
//! All matching is a case-insensitive substring search.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Case-insensitive substring test
fn contains_phrase(text: &str, phrase: &str) -> bool {
    !phrase.is_empty() && text.to_lowercase().contains(&phrase.to_lowercase())
}

/// A keyword that drives a session transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolKeyword {
    /// Server sent the last packet
    AllPacketsSent,
    /// Server has packets ready to send
    PacketsReady,
    /// Server accepted the target address
    DomainSet,
    /// Server asks for the target address
    DomainPrompt,
}

/// Server phrases for each [`ProtocolKeyword`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolKeywords {
    /// Prompt for the target address
    pub domain_prompt: String,
    /// Target address accepted
    pub domain_set: String,
    /// Packets ready to send
    pub packets_ready: String,
    /// Last packet sent
    pub all_packets_sent: String,
}

impl Default for ProtocolKeywords {
    fn default() -> Self {
        Self {
            domain_prompt: "Enter App domain".to_string(),
            domain_set: "DOMAIN SET".to_string(),
            packets_ready: "PACKETS READY".to_string(),
            all_packets_sent: "ALL PACKETS SENT".to_string(),
        }
    }
}

impl ProtocolKeywords {
    /// Phrase for a keyword
    pub fn phrase(&self, keyword: ProtocolKeyword) -> &str {
        match keyword {
            ProtocolKeyword::AllPacketsSent => &self.all_packets_sent,
            ProtocolKeyword::PacketsReady => &self.packets_ready,
            ProtocolKeyword::DomainSet => &self.domain_set,
            ProtocolKeyword::DomainPrompt => &self.domain_prompt,
        }
    }

    /// Highest-priority keyword contained in `reply`.
    ///
    /// Priority runs from the end of the transfer backwards, so a reply that mentions both
    /// "PACKETS READY" and "ALL PACKETS SENT" counts as the latter.
    pub fn classify(&self, reply: &str) -> Option<ProtocolKeyword> {
        [
            ProtocolKeyword::AllPacketsSent,
            ProtocolKeyword::PacketsReady,
            ProtocolKeyword::DomainSet,
            ProtocolKeyword::DomainPrompt,
        ]
        .into_iter()
        .find(|&k| contains_phrase(reply, self.phrase(k)))
    }
}

/// Category of a platform prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeywordCategory {
    /// Platform is still working
    Loading,
    /// Platform reported a failure
    Error,
}

impl fmt::Display for KeywordCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeywordCategory::Loading => write!(f, "LOADING"),
            KeywordCategory::Error => write!(f, "ERROR"),
        }
    }
}

/// Localizable phrases per prompt category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeywordTable {
    phrases: BTreeMap<KeywordCategory, Vec<String>>,
}

impl Default for KeywordTable {
    fn default() -> Self {
        let mut phrases = BTreeMap::new();
        phrases.insert(
            KeywordCategory::Loading,
            ["espere", "waiting", "loading", "esperando", "espere por favor"]
                .map(String::from)
                .to_vec(),
        );
        phrases.insert(
            KeywordCategory::Error,
            ["problema", "problem", "error", "null", "invalid", "failed"]
                .map(String::from)
                .to_vec(),
        );
        Self { phrases }
    }
}

impl KeywordTable {
    /// Empty table
    pub fn empty() -> Self {
        Self {
            phrases: BTreeMap::new(),
        }
    }

    /// Add a phrase to a category
    pub fn insert(&mut self, category: KeywordCategory, phrase: impl Into<String>) {
        self.phrases.entry(category).or_default().push(phrase.into());
    }

    /// Phrases of a category
    pub fn phrases(&self, category: KeywordCategory) -> &[String] {
        self.phrases.get(&category).map(Vec::as_slice).unwrap_or_default()
    }

    /// Whether `text` contains any phrase of `category`
    pub fn matches(&self, category: KeywordCategory, text: &str) -> bool {
        self.phrases(category)
            .iter()
            .any(|phrase| contains_phrase(text, phrase))
    }

    /// Category of `text`; errors win over loading prompts
    pub fn classify(&self, text: &str) -> Option<KeywordCategory> {
        [KeywordCategory::Error, KeywordCategory::Loading]
            .into_iter()
            .find(|&c| self.matches(c, text))
    }
}
