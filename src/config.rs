//! Guard configuration
//!
//! Every threshold and the allowlist are fixed once a `GuardConfig` is
//! built; guards hold it behind an `Arc` and never mutate it. Defaults match
//! the shipped build; a TOML file may override them for staging builds.

use crate::error::{GuardError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Domains the protected property is allowed to reach
pub const DEFAULT_ALLOWED_DOMAINS: &[&str] = &[
    "netflix.com",
    "nflxext.com",
    "nflximg.net",
    "nflxvideo.net",
    "nflxso.net",
];

/// Substrings a legitimate first-party cookie write contains
pub const DEFAULT_TRUSTED_COOKIE_TOKENS: &[&str] = &["netflix.com", "nflx"];

/// Markers the patched bundled resource is expected to carry
pub const DEFAULT_RESOURCE_MARKERS: &[&str] = &["FlixPlus", "videoElementNetflixPlus"];

/// When the ledger persists a `SecurityWarning` after the threshold
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationMode {
    /// Persist once, on the increment that first exceeds the threshold
    #[default]
    Edge,
    /// Persist on every increment past the threshold
    Level,
}

/// Build-time configuration for the guard layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Registrable domain the guards are allowed to install on
    pub protected_site: String,

    /// Allowlisted destination domain suffixes
    pub allowed_domains: Vec<String>,

    /// Scheme of the extension's own bundled resources, always allowed
    pub extension_scheme: String,

    /// Suspicious-activity count that must be exceeded to escalate
    pub escalation_threshold: u64,
    pub escalation_mode: EscalationMode,

    /// Writes per key tolerated before each further write is suspicious
    pub storage_write_limit: u64,

    /// Value length (UTF-16 code units) above which a write is reported as large
    pub large_write_threshold: usize,

    pub trusted_cookie_tokens: Vec<String>,
    pub cookie_excerpt_chars: usize,
    pub eval_excerpt_chars: usize,

    /// Function bodies longer than this are reported
    pub function_body_limit: usize,

    /// Upper bound on any target kept in the ledger log
    pub max_target_chars: usize,

    /// Number of recent activity records retained per page
    pub recent_activity_capacity: usize,

    pub heartbeat_interval_secs: u64,
    pub alert_duration_secs: u64,

    /// Path of the monitored resource inside the extension bundle
    pub monitored_resource: String,
    pub resource_markers: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            protected_site: "netflix.com".to_string(),
            allowed_domains: to_strings(DEFAULT_ALLOWED_DOMAINS),
            extension_scheme: "chrome-extension".to_string(),
            escalation_threshold: 10,
            escalation_mode: EscalationMode::Edge,
            storage_write_limit: 100,
            large_write_threshold: 50_000,
            trusted_cookie_tokens: to_strings(DEFAULT_TRUSTED_COOKIE_TOKENS),
            cookie_excerpt_chars: 50,
            eval_excerpt_chars: 100,
            function_body_limit: 1_000,
            max_target_chars: 200,
            recent_activity_capacity: 256,
            heartbeat_interval_secs: 60,
            alert_duration_secs: 10,
            monitored_resource: "scripts/cadmium-playercore.js".to_string(),
            resource_markers: to_strings(DEFAULT_RESOURCE_MARKERS),
        }
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl GuardConfig {
    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: GuardConfig = toml::from_str(input)
            .map_err(|e| GuardError::Config(format!("Failed to parse guard config: {}", e)))?;
        config.validated()
    }

    /// Load a TOML config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GuardError::Config(format!(
                "Failed to read guard config {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Normalize domain entries and reject unusable values
    pub fn validated(mut self) -> Result<Self> {
        self.protected_site = normalize_domain(&self.protected_site);
        if self.protected_site.is_empty() {
            return Err(GuardError::Config("protected_site must not be empty".into()));
        }

        self.allowed_domains = self
            .allowed_domains
            .iter()
            .map(|d| normalize_domain(d))
            .filter(|d| !d.is_empty())
            .collect();
        if self.allowed_domains.is_empty() {
            return Err(GuardError::Config(
                "allowed_domains must contain at least one domain".into(),
            ));
        }

        self.extension_scheme = self.extension_scheme.trim().to_ascii_lowercase();
        if self.extension_scheme.is_empty() {
            return Err(GuardError::Config("extension_scheme must not be empty".into()));
        }

        if self.heartbeat_interval_secs == 0 {
            return Err(GuardError::Config(
                "heartbeat_interval_secs must be greater than zero".into(),
            ));
        }

        Ok(self)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn alert_duration(&self) -> Duration {
        Duration::from_secs(self.alert_duration_secs)
    }
}

/// Lowercase, trim, and drop leading/trailing dots from a domain entry
pub(crate) fn normalize_domain(domain: &str) -> String {
    domain
        .trim()
        .trim_start_matches('.')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}
