//! Guards — decorators around page platform capabilities
//!
//! Each guard wraps one capability behind the same trait the capability
//! implements, applies policy before or around delegating, and reports
//! violations to the page's `ActivityLedger`. Guards are built once when the
//! page is set up and handed to call sites, instead of patching shared
//! global bindings.
//!
//! Enforcing guards (egress, DOM) fail or remove; observing guards (storage,
//! cookie, dynamic code) only log and always delegate.

pub mod cookie;
pub mod dom;
pub mod dynamic_code;
pub mod egress;
pub mod storage;

use crate::config::GuardConfig;
use crate::ledger::ActivityLedger;
use crate::policy::{AllowListPolicy, PageOrigin, Verdict};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

pub use cookie::{CookieJar, GuardedCookieJar};
pub use dom::{AddedNode, DocumentTree, DomGuard, MutationBatch, NodeId};
pub use dynamic_code::{
    CodeEvaluator, FunctionConstructor, GuardedEvaluator, GuardedFunctionConstructor,
};
pub use egress::{
    ConnectionOpener, GuardedConnectionOpener, GuardedRequestIssuer, GuardedSocketConnector,
    OutboundRequest, RequestIssuer, SocketConnector,
};
pub use storage::{GuardedStorage, PageStorage};

/// Which capability a guard wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardKind {
    Request,
    Connection,
    Socket,
    Storage,
    Cookie,
    Eval,
    Function,
    Dom,
}

impl GuardKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Connection => "connection",
            Self::Socket => "socket",
            Self::Storage => "storage",
            Self::Cookie => "cookie",
            Self::Eval => "eval",
            Self::Function => "function",
            Self::Dom => "dom",
        }
    }
}

impl fmt::Display for GuardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Entries = Mutex<BTreeMap<u64, (GuardKind, Weak<()>)>>;

/// Held by a live guard; dropping the guard uninstalls it
///
/// A normal drop deregisters the guard. A marker torn down while its thread
/// is unwinding stays registered with a dead token and is reported by
/// [`GuardRegistry::missing`].
#[derive(Debug)]
pub struct InstallMarker {
    kind: GuardKind,
    id: u64,
    _token: Arc<()>,
    entries: Weak<Entries>,
}

impl InstallMarker {
    pub fn kind(&self) -> GuardKind {
        self.kind
    }
}

impl Drop for InstallMarker {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        if let Some(entries) = self.entries.upgrade() {
            entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
            tracing::debug!(guard = %self.kind, "Guard uninstalled");
        }
    }
}

/// Tracks which guards are still installed, for the heartbeat self check
#[derive(Default)]
pub struct GuardRegistry {
    entries: Arc<Entries>,
    next_id: AtomicU64,
}

impl GuardRegistry {
    pub fn register(&self, kind: GuardKind) -> InstallMarker {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = Arc::new(());
        self.lock().insert(id, (kind, Arc::downgrade(&token)));
        InstallMarker {
            kind,
            id,
            _token: token,
            entries: Arc::downgrade(&self.entries),
        }
    }

    /// Guards that vanished without uninstalling since the last call
    ///
    /// Each one is reported once and then forgotten.
    pub fn missing(&self) -> Vec<GuardKind> {
        let mut entries = self.lock();
        let dead: Vec<u64> = entries
            .iter()
            .filter(|(_, (_, token))| token.strong_count() == 0)
            .map(|(id, _)| *id)
            .collect();
        dead.iter()
            .filter_map(|id| entries.remove(id))
            .map(|(kind, _)| kind)
            .collect()
    }

    pub fn installed(&self) -> Vec<GuardKind> {
        self.lock()
            .values()
            .filter(|(_, token)| token.strong_count() > 0)
            .map(|(kind, _)| *kind)
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, (GuardKind, Weak<()>)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared state every guard of one page needs
#[derive(Clone)]
pub struct GuardContext {
    config: Arc<GuardConfig>,
    policy: Arc<AllowListPolicy>,
    page: PageOrigin,
    ledger: Arc<ActivityLedger>,
    registry: Arc<GuardRegistry>,
}

impl GuardContext {
    pub fn new(
        config: Arc<GuardConfig>,
        page: PageOrigin,
        ledger: Arc<ActivityLedger>,
        registry: Arc<GuardRegistry>,
    ) -> Self {
        let policy = Arc::new(AllowListPolicy::new(&config));
        Self {
            config,
            policy,
            page,
            ledger,
            registry,
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn policy(&self) -> &AllowListPolicy {
        &self.policy
    }

    pub fn page(&self) -> &PageOrigin {
        &self.page
    }

    pub fn ledger(&self) -> &Arc<ActivityLedger> {
        &self.ledger
    }

    pub fn registry(&self) -> &Arc<GuardRegistry> {
        &self.registry
    }

    /// Policy decision against this page's origin
    pub fn decide(&self, target: &str) -> Verdict {
        self.policy.decide(target, &self.page)
    }

    pub(crate) fn install(&self, kind: GuardKind) -> InstallMarker {
        tracing::debug!(page = %self.ledger.page_id(), guard = %kind, "Guard installed");
        self.registry.register(kind)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::drop_while_panicking;
    use super::*;

    #[test]
    fn test_normal_drop_uninstalls() {
        let registry = GuardRegistry::default();
        let request = registry.register(GuardKind::Request);
        let storage = registry.register(GuardKind::Storage);
        assert!(registry.missing().is_empty());
        assert_eq!(registry.installed().len(), 2);

        drop(storage);
        assert!(registry.missing().is_empty());
        assert_eq!(registry.installed(), vec![GuardKind::Request]);
        assert_eq!(request.kind(), GuardKind::Request);
    }

    #[test]
    fn test_transient_guards_never_reported() {
        let registry = GuardRegistry::default();
        for _ in 0..1000 {
            drop(registry.register(GuardKind::Dom));
        }
        assert!(registry.missing().is_empty());
        assert!(registry.missing().is_empty());
        assert!(registry.lock().is_empty());
    }

    #[test]
    fn test_abnormal_teardown_reported_once() {
        let registry = GuardRegistry::default();
        let _eval = registry.register(GuardKind::Eval);
        drop_while_panicking(registry.register(GuardKind::Cookie));

        assert_eq!(registry.missing(), vec![GuardKind::Cookie]);
        assert!(registry.missing().is_empty());
        assert_eq!(registry.installed(), vec![GuardKind::Eval]);
    }
}
