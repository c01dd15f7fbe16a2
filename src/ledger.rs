//! Activity ledger — per-page counters of suspicious events
//!
//! One ledger exists per page-load context and is shared by every guard of
//! that page. Counts only grow; there is deliberately no reset, a new page
//! load gets a new ledger. Once the total exceeds the escalation threshold a
//! `SecurityWarning` is persisted through the `PersistenceBridge`.

use crate::config::{EscalationMode, GuardConfig};
use crate::persistence::PersistenceBridge;
use crate::types::{
    now_millis, truncate_chars, ActivityCategory, ActivityRecord, SecurityStatus,
    SecurityWarning, StatusLevel,
};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct LedgerState {
    total: u64,
    per_category: [u64; 5],
    escalations: u64,
    recent: VecDeque<ActivityRecord>,
}

/// Suspicious-activity counters for one page lifetime
pub struct ActivityLedger {
    page_id: String,
    threshold: u64,
    mode: EscalationMode,
    max_target_chars: usize,
    capacity: usize,
    bridge: Option<PersistenceBridge>,
    state: Mutex<LedgerState>,
}

impl ActivityLedger {
    /// Create a ledger that persists escalations through `bridge`
    pub fn new(config: &GuardConfig, bridge: PersistenceBridge) -> Self {
        Self::build(config, Some(bridge))
    }

    /// Create a ledger that only logs escalations
    pub fn in_memory(config: &GuardConfig) -> Self {
        Self::build(config, None)
    }

    fn build(config: &GuardConfig, bridge: Option<PersistenceBridge>) -> Self {
        Self {
            page_id: format!("page-{}", uuid::Uuid::new_v4()),
            threshold: config.escalation_threshold,
            mode: config.escalation_mode,
            max_target_chars: config.max_target_chars,
            capacity: config.recent_activity_capacity,
            bridge,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Identifier of the page-load context this ledger belongs to
    pub fn page_id(&self) -> &str {
        &self.page_id
    }

    /// Record one suspicious event, returning the new total
    pub fn record(&self, category: ActivityCategory, target: &str) -> u64 {
        let target = truncate_chars(target, self.max_target_chars);
        tracing::warn!(
            page = %self.page_id,
            category = %category,
            target = %target,
            "Suspicious activity"
        );

        let (total, escalate) = {
            let mut state = self.lock();
            state.total += 1;
            state.per_category[category.slot()] += 1;

            if self.capacity > 0 {
                state.recent.push_back(ActivityRecord {
                    category,
                    target,
                    timestamp: now_millis(),
                });
                if state.recent.len() > self.capacity {
                    state.recent.pop_front();
                }
            }

            let escalate = match self.mode {
                EscalationMode::Edge => state.total == self.threshold + 1,
                EscalationMode::Level => state.total > self.threshold,
            };
            if escalate {
                state.escalations += 1;
            }
            (state.total, escalate)
        };

        if escalate {
            self.escalate(total);
        }
        total
    }

    fn escalate(&self, count: u64) {
        tracing::error!(
            page = %self.page_id,
            count,
            threshold = self.threshold,
            "Too many suspicious activities detected"
        );

        let Some(bridge) = &self.bridge else {
            return;
        };
        let warning = SecurityWarning {
            timestamp: now_millis(),
            count,
            message: "Suspicious activity threshold exceeded".to_string(),
        };
        if let Err(e) = bridge.persist_security_warning(&warning) {
            tracing::warn!(page = %self.page_id, error = %e, "Failed to queue security warning");
        }
    }

    /// Total suspicious events this page lifetime
    pub fn count(&self) -> u64 {
        self.lock().total
    }

    pub fn count_for(&self, category: ActivityCategory) -> u64 {
        self.lock().per_category[category.slot()]
    }

    /// Number of times a `SecurityWarning` was emitted
    pub fn escalations(&self) -> u64 {
        self.lock().escalations
    }

    /// `Warning` once the threshold has been exceeded; never demoted
    pub fn status(&self) -> StatusLevel {
        status_for(self.count(), self.threshold)
    }

    /// Current aggregate as a persistable record
    pub fn snapshot(&self) -> SecurityStatus {
        let total = self.count();
        SecurityStatus {
            timestamp: now_millis(),
            suspicious_activities: total,
            status: status_for(total, self.threshold),
        }
    }

    /// Most recent records, newest first
    pub fn recent(&self, limit: usize) -> Vec<ActivityRecord> {
        self.lock().recent.iter().rev().take(limit).cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn status_for(total: u64, threshold: u64) -> StatusLevel {
    if total > threshold {
        StatusLevel::Warning
    } else {
        StatusLevel::Monitoring
    }
}
