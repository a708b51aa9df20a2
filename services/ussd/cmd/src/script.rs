//! Replay scripts.
//!
//! A script is a YAML list; each entry sets exactly one of `reply`, `ended` or `silence`:
//!
//! ```yaml
//! - reply: "Enter App domain"
//! - silence: true
//! - reply: "[eyJpZCI6MX0=, 1]"
//! - ended: "Goodbye"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use ussd_session::ScriptStep;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScriptEntry {
    reply: Option<String>,
    ended: Option<String>,
    #[serde(default)]
    silence: bool,
}

impl ScriptEntry {
    fn into_step(self, index: usize) -> Result<ScriptStep> {
        match (self.reply, self.ended, self.silence) {
            (Some(text), None, false) => Ok(ScriptStep::Reply(text)),
            (None, Some(text), false) => Ok(ScriptStep::Ended(text)),
            (None, None, true) => Ok(ScriptStep::Silence),
            _ => bail!(
                "script entry {} must set exactly one of reply, ended, silence",
                index
            ),
        }
    }
}

/// Parse a script from YAML text
pub fn parse_script(yaml: &str) -> Result<Vec<ScriptStep>> {
    let entries: Vec<ScriptEntry> =
        serde_yaml::from_str(yaml).context("script is not a list of entries")?;
    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| entry.into_step(i))
        .collect()
}

/// Read and parse a script file
pub fn load_script(path: &Path) -> Result<Vec<ScriptStep>> {
    let yaml = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))?;
    parse_script(&yaml).with_context(|| format!("invalid script {}", path.display()))
}
