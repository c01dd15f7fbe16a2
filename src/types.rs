//! Core record types for the a3s-guard system
//!
//! Everything persisted through the `PersistenceBridge` uses camelCase JSON
//! so the popup and diagnostics collaborators can read it directly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of intercepted operation an activity record refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityCategory {
    Network,
    Storage,
    Cookie,
    Eval,
    Iframe,
}

impl ActivityCategory {
    /// All categories, in ledger slot order
    pub const ALL: [ActivityCategory; 5] = [
        Self::Network,
        Self::Storage,
        Self::Cookie,
        Self::Eval,
        Self::Iframe,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Cookie => "cookie",
            Self::Eval => "eval",
            Self::Iframe => "iframe",
        }
    }

    pub(crate) fn slot(self) -> usize {
        match self {
            Self::Network => 0,
            Self::Storage => 1,
            Self::Cookie => 2,
            Self::Eval => 3,
            Self::Iframe => 4,
        }
    }
}

impl fmt::Display for ActivityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single suspicious event seen by a guard
///
/// Kept in memory only; the durable store sees aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub category: ActivityCategory,

    /// Offending address, key, or excerpt (already truncated)
    pub target: String,

    /// Unix timestamp in milliseconds
    pub timestamp: u64,
}

/// Aggregate monitoring state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusLevel {
    #[default]
    Monitoring,
    Warning,
}

/// Periodic status snapshot published by the heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStatus {
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
    pub suspicious_activities: u64,
    pub status: StatusLevel,
}

/// Escalation record written when the suspicious-activity threshold is crossed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityWarning {
    pub timestamp: u64,
    pub count: u64,
    pub message: String,
}

/// Answer to `getSecurityStatus` for the popup and diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStatusReport {
    pub monitoring: bool,
    pub suspicious_activities: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_warning: Option<SecurityWarning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<SecurityStatus>,
}

/// Trust anchor for the monitored resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityBaseline {
    pub digest_hex: String,
    pub established_at: u64,
}

/// Why an integrity check came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityReason {
    FirstLoad,
    HashMatch,
    HashMismatch,
    HashCalculationFailed,
}

impl IntegrityReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FirstLoad => "first_load",
            Self::HashMatch => "hash_match",
            Self::HashMismatch => "hash_mismatch",
            Self::HashCalculationFailed => "hash_calculation_failed",
        }
    }
}

impl fmt::Display for IntegrityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one integrity check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityCheckResult {
    pub verified: bool,
    pub reason: IntegrityReason,

    /// Digest of the bytes observed in this check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest_hex: Option<String>,

    /// Baseline digest, only reported on mismatch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_digest_hex: Option<String>,
}

impl IntegrityCheckResult {
    pub fn first_load(digest_hex: String) -> Self {
        Self {
            verified: true,
            reason: IntegrityReason::FirstLoad,
            digest_hex: Some(digest_hex),
            expected_digest_hex: None,
        }
    }

    pub fn hash_match(digest_hex: String) -> Self {
        Self {
            verified: true,
            reason: IntegrityReason::HashMatch,
            digest_hex: Some(digest_hex),
            expected_digest_hex: None,
        }
    }

    pub fn hash_mismatch(expected: String, actual: String) -> Self {
        Self {
            verified: false,
            reason: IntegrityReason::HashMismatch,
            digest_hex: Some(actual),
            expected_digest_hex: Some(expected),
        }
    }

    pub fn calculation_failed() -> Self {
        Self {
            verified: false,
            reason: IntegrityReason::HashCalculationFailed,
            digest_hex: None,
            expected_digest_hex: None,
        }
    }
}

/// Persisted evidence of a baseline mismatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityWarningRecord {
    pub timestamp: u64,
    pub expected_digest_hex: String,
    pub actual_digest_hex: String,
    pub message: String,
}

/// Debug facts about the monitored resource
///
/// Never consulted by the verified decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityMetadata {
    /// Length in UTF-16 code units of the decoded text
    pub size: u64,
    pub line_count: u64,
    pub contains_expected_marker: bool,
    pub last_modified: String,
}

/// Descriptive record written alongside a freshly established baseline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirstLoadMetadata {
    /// RFC 3339 date of the first observed load
    pub first_load_date: String,

    /// Reported size in bytes
    pub size: u64,
}

/// Result of the load-time check, as persisted under `lastIntegrityCheck`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityCheckRecord {
    pub timestamp: u64,
    pub result: IntegrityCheckResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<IntegrityMetadata>,
}

/// Current Unix time in milliseconds
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Truncate to at most `max` characters without splitting a character
pub fn truncate_chars(input: &str, max: usize) -> String {
    match input.char_indices().nth(max) {
        Some((index, _)) => input[..index].to_string(),
        None => input.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_serializes_lowercase() {
        let json = serde_json::to_string(&ActivityCategory::Iframe).unwrap();
        assert_eq!(json, "\"iframe\"");
        assert_eq!(ActivityCategory::Eval.to_string(), "eval");
    }

    #[test]
    fn test_status_report_camel_case() {
        let report = SecurityStatusReport {
            monitoring: true,
            suspicious_activities: 3,
            last_warning: None,
            last_status: Some(SecurityStatus {
                timestamp: 1,
                suspicious_activities: 3,
                status: StatusLevel::Monitoring,
            }),
        };

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["suspiciousActivities"], 3);
        assert_eq!(value["lastStatus"]["status"], "monitoring");
        assert!(value.get("lastWarning").is_none());
    }

    #[test]
    fn test_integrity_reason_wire_names() {
        let result = IntegrityCheckResult::hash_mismatch("aa".into(), "bb".into());
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["reason"], "hash_mismatch");
        assert_eq!(value["expectedDigestHex"], "aa");
        assert_eq!(value["digestHex"], "bb");

        let failed = serde_json::to_value(IntegrityCheckResult::calculation_failed()).unwrap();
        assert_eq!(failed["reason"], "hash_calculation_failed");
        assert!(failed.get("digestHex").is_none());
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("ab", 3), "ab");
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("", 5), "");
    }
}
