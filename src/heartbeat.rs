//! Heartbeat — periodic status republish and guard self check

use crate::guards::{GuardKind, GuardRegistry};
use crate::ledger::ActivityLedger;
use crate::persistence::PersistenceBridge;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

/// What one heartbeat tick observed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BeatReport {
    /// Guards torn down without uninstalling since the previous tick
    pub missing_guards: Vec<GuardKind>,

    /// Whether a `SecurityStatus` snapshot was queued
    pub status_persisted: bool,
}

/// Run one tick against the page's ledger and registry
pub fn beat(
    ledger: &ActivityLedger,
    registry: &GuardRegistry,
    bridge: &PersistenceBridge,
) -> BeatReport {
    let missing_guards = registry.missing();
    for kind in &missing_guards {
        tracing::error!(
            page = %ledger.page_id(),
            guard = %kind,
            "Guard no longer installed, possible tampering"
        );
    }

    let snapshot = ledger.snapshot();
    let mut status_persisted = false;
    if snapshot.suspicious_activities > 0 {
        match bridge.persist_security_status(&snapshot) {
            Ok(()) => status_persisted = true,
            Err(e) => tracing::warn!(error = %e, "Failed to queue security status"),
        }
    }

    BeatReport {
        missing_guards,
        status_persisted,
    }
}

/// Handle to a running heartbeat task; dropping it stops the task
pub struct Heartbeat {
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Spawn the recurring task; the first tick fires one `period` from now
    pub fn start(
        period: Duration,
        ledger: Arc<ActivityLedger>,
        registry: Arc<GuardRegistry>,
        bridge: PersistenceBridge,
    ) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            tracing::debug!(page = %ledger.page_id(), period = ?period, "Heartbeat started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        beat(&ledger, &registry, &bridge);
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::debug!(page = %ledger.page_id(), "Heartbeat stopped");
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signal the task to stop and wait for it to finish
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Heartbeat task ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuardConfig;
    use crate::guards::test_support::drop_while_panicking;
    use crate::persistence::MemoryDurableStore;
    use crate::types::{ActivityCategory, StatusLevel};

    fn fixture() -> (Arc<ActivityLedger>, Arc<GuardRegistry>, PersistenceBridge) {
        let bridge = PersistenceBridge::spawn(Arc::new(MemoryDurableStore::default()));
        let ledger = Arc::new(ActivityLedger::new(&GuardConfig::default(), bridge.clone()));
        (ledger, Arc::new(GuardRegistry::default()), bridge)
    }

    #[tokio::test]
    async fn test_quiet_page_persists_nothing() {
        let (ledger, registry, bridge) = fixture();
        let report = beat(&ledger, &registry, &bridge);
        assert_eq!(report, BeatReport::default());
        assert!(bridge.security_status().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_beat_reports_abnormal_teardown_once() {
        let (ledger, registry, bridge) = fixture();
        let _request = registry.register(GuardKind::Request);
        drop_while_panicking(registry.register(GuardKind::Cookie));

        let report = beat(&ledger, &registry, &bridge);
        assert_eq!(report.missing_guards, vec![GuardKind::Cookie]);
        assert!(beat(&ledger, &registry, &bridge).missing_guards.is_empty());
    }

    #[tokio::test]
    async fn test_beat_ignores_dropped_transient_guards() {
        let (ledger, registry, bridge) = fixture();
        for _ in 0..1000 {
            drop(registry.register(GuardKind::Dom));
        }

        assert!(beat(&ledger, &registry, &bridge).missing_guards.is_empty());
        assert!(beat(&ledger, &registry, &bridge).missing_guards.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_status_snapshot() {
        let (ledger, registry, bridge) = fixture();
        let heartbeat = Heartbeat::start(
            Duration::from_secs(60),
            ledger.clone(),
            registry,
            bridge.clone(),
        );

        ledger.record(ActivityCategory::Network, "https://evil.example/");
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(bridge.security_status().await.unwrap().is_none());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let status = bridge.security_status().await.unwrap().unwrap();
        assert_eq!(status.suspicious_activities, 1);
        assert_eq!(status.status, StatusLevel::Monitoring);

        assert!(heartbeat.is_running());
        heartbeat.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_task() {
        let (ledger, registry, bridge) = fixture();
        let heartbeat = Heartbeat::start(
            Duration::from_secs(60),
            ledger.clone(),
            registry,
            bridge.clone(),
        );
        heartbeat.stop().await;

        ledger.record(ActivityCategory::Cookie, "x=1");
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(bridge.security_status().await.unwrap().is_none());
    }
}
