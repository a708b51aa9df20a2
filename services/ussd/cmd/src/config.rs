//! Configuration handling for the tunnel binary.
//!
//! Reads the YAML config file, then applies `USSD_*` environment overrides. Loading runs
//! before logging is installed, so what happened is recorded on the config and logged by
//! the caller afterwards.

use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use ussd_session::SessionConfig;
use ussd_wire::TextEncoding;

/// Where the configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Parsed from this file
    File(PathBuf),
    /// Defaults; the file was missing or unparseable
    Defaults {
        /// Why the file was not used
        reason: String,
    },
}

/// Tunnel configuration
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Log level from the file, used when `--log-level` and `RUST_LOG` are absent
    pub log_level: Option<String>,
    /// Session settings
    pub session: SessionConfig,
    /// Where the file part came from
    pub source: ConfigSource,
    /// Environment variables that overrode a value
    pub overrides: Vec<&'static str>,
}

/// Root of the YAML file
#[derive(Debug, Default, Deserialize)]
struct RootConfig {
    log_level: Option<String>,
    #[serde(default)]
    session: SessionConfig,
}

impl TunnelConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Self {
        let mut config = Self::from_file(config_path.as_ref());
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    fn from_file(path: &Path) -> Self {
        let (root, source) = match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root) => (root, ConfigSource::File(path.to_path_buf())),
                Err(e) => (
                    RootConfig::default(),
                    ConfigSource::Defaults {
                        reason: format!("failed to parse {}: {}", path.display(), e),
                    },
                ),
            },
            Err(e) => (
                RootConfig::default(),
                ConfigSource::Defaults {
                    reason: format!("cannot read {}: {}", path.display(), e),
                },
            ),
        };

        Self {
            log_level: root.log_level,
            session: root.session,
            source,
            overrides: Vec::new(),
        }
    }

    /// Apply `USSD_*` overrides read through `lookup`
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(code) = lookup("USSD_DIAL_CODE") {
            self.session.dial_code = code;
            self.overrides.push("USSD_DIAL_CODE");
        }

        if let Some(target) = lookup("USSD_TARGET_ADDRESS") {
            self.session.target_address = target;
            self.overrides.push("USSD_TARGET_ADDRESS");
        }

        if let Some(secs) = lookup("USSD_TURN_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok()) {
            self.session.turn_timeout_secs = secs;
            self.overrides.push("USSD_TURN_TIMEOUT_SECS");
        }

        if let Some(verify) = lookup("USSD_VERIFY_CHECKSUM") {
            self.session.verify_checksum = verify.to_lowercase() == "true";
            self.overrides.push("USSD_VERIFY_CHECKSUM");
        }

        if let Some(encoding) =
            lookup("USSD_ENCODING").and_then(|v| v.parse::<TextEncoding>().ok())
        {
            self.session.encoding = encoding;
            self.overrides.push("USSD_ENCODING");
        }
    }

    /// Reject settings no session can run with
    pub fn validate(&self) -> Result<()> {
        if self.session.turn_timeout_secs == 0 {
            anyhow::bail!("session.turn_timeout_secs must be greater than zero");
        }
        Ok(())
    }
}
