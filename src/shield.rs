//! Page shield — installs the protection layer into one page-load context
//!
//! A `PageShield` owns the per-page ledger, registry, and persistence bridge.
//! Capability adapters are passed through the `guard_*` builders once at
//! setup; the returned decorators are what page code calls from then on.

use crate::config::GuardConfig;
use crate::error::{GuardError, Result};
use crate::guards::{
    CodeEvaluator, ConnectionOpener, CookieJar, DomGuard, FunctionConstructor, GuardContext,
    GuardRegistry, GuardedConnectionOpener, GuardedCookieJar, GuardedEvaluator,
    GuardedFunctionConstructor, GuardedRequestIssuer, GuardedSocketConnector, GuardedStorage,
    PageStorage, RequestIssuer, SocketConnector,
};
use crate::heartbeat::Heartbeat;
use crate::integrity::{AlertSurface, IntegrityVerifier, ResourceFetcher};
use crate::ledger::ActivityLedger;
use crate::persistence::{DurableStore, PersistenceBridge};
use crate::policy::PageOrigin;
use crate::types::{IntegrityCheckRecord, IntegrityCheckResult, IntegrityMetadata, SecurityStatusReport};
use std::sync::Arc;

/// Protection layer for one page-load context
pub struct PageShield {
    ctx: GuardContext,
    bridge: PersistenceBridge,
    integrity: Option<IntegrityVerifier>,
}

impl PageShield {
    /// Set up the layer for `page_url`
    ///
    /// Pages outside the protected site are refused. The persistence writer
    /// task is spawned here, so a Tokio runtime must be running.
    pub fn install(
        config: GuardConfig,
        page_url: &str,
        store: Arc<dyn DurableStore>,
    ) -> Result<Self> {
        let config = config.validated()?;
        let page = PageOrigin::parse(page_url)?;

        let site = config.protected_site.as_str();
        let host = page.host();
        let on_site = host == site
            || host
                .strip_suffix(site)
                .is_some_and(|prefix| prefix.ends_with('.'));
        if !on_site {
            return Err(GuardError::UnsupportedPage(page_url.to_string()));
        }

        let bridge = PersistenceBridge::try_spawn(store)?;
        let ledger = Arc::new(ActivityLedger::new(&config, bridge.clone()));
        let ctx = GuardContext::new(
            Arc::new(config),
            page,
            ledger,
            Arc::new(GuardRegistry::default()),
        );

        tracing::info!(
            page = %ctx.ledger().page_id(),
            origin = %ctx.page().origin(),
            domains = ctx.policy().domains().len(),
            "Page shield installed"
        );

        Ok(Self {
            ctx,
            bridge,
            integrity: None,
        })
    }

    /// Full injection sequence: install, run the integrity load check once,
    /// then start the heartbeat
    ///
    /// The returned heartbeat runs until it is stopped or dropped.
    pub async fn inject(
        config: GuardConfig,
        page_url: &str,
        store: Arc<dyn DurableStore>,
        extension_id: &str,
        fetcher: Arc<dyn ResourceFetcher>,
        alert: Option<Arc<dyn AlertSurface>>,
    ) -> Result<(Self, Heartbeat, IntegrityCheckRecord)> {
        let mut shield = Self::install(config, page_url, store)?;
        shield.attach_integrity(extension_id, fetcher, alert);
        let load_check = shield.run_integrity_load_check().await?;
        let heartbeat = shield.start_heartbeat();
        Ok((shield, heartbeat, load_check))
    }

    pub fn context(&self) -> &GuardContext {
        &self.ctx
    }

    pub fn config(&self) -> &GuardConfig {
        self.ctx.config()
    }

    pub fn ledger(&self) -> &Arc<ActivityLedger> {
        self.ctx.ledger()
    }

    pub fn bridge(&self) -> &PersistenceBridge {
        &self.bridge
    }

    pub fn guard_requests<R: RequestIssuer>(&self, inner: R) -> GuardedRequestIssuer<R> {
        GuardedRequestIssuer::new(inner, self.ctx.clone())
    }

    pub fn guard_connections<C: ConnectionOpener>(&self, inner: C) -> GuardedConnectionOpener<C> {
        GuardedConnectionOpener::new(inner, self.ctx.clone())
    }

    pub fn guard_sockets<S: SocketConnector>(&self, inner: S) -> GuardedSocketConnector<S> {
        GuardedSocketConnector::new(inner, self.ctx.clone())
    }

    pub fn guard_storage<S: PageStorage>(&self, inner: S) -> GuardedStorage<S> {
        GuardedStorage::new(inner, self.ctx.clone())
    }

    pub fn guard_cookies<J: CookieJar>(&self, inner: J) -> GuardedCookieJar<J> {
        GuardedCookieJar::new(inner, self.ctx.clone())
    }

    pub fn guard_eval<E: CodeEvaluator>(&self, inner: E) -> GuardedEvaluator<E> {
        GuardedEvaluator::new(inner, self.ctx.clone())
    }

    pub fn guard_functions<F: FunctionConstructor>(
        &self,
        inner: F,
    ) -> GuardedFunctionConstructor<F> {
        GuardedFunctionConstructor::new(inner, self.ctx.clone())
    }

    pub fn dom_guard(&self) -> DomGuard {
        DomGuard::new(self.ctx.clone())
    }

    /// Start the periodic status republish for this page
    pub fn start_heartbeat(&self) -> Heartbeat {
        Heartbeat::start(
            self.ctx.config().heartbeat_interval(),
            self.ctx.ledger().clone(),
            self.ctx.registry().clone(),
            self.bridge.clone(),
        )
    }

    /// Internal address of the monitored resource inside extension `extension_id`
    pub fn resource_address(&self, extension_id: &str) -> String {
        let config = self.ctx.config();
        format!(
            "{}://{}/{}",
            config.extension_scheme,
            extension_id,
            config.monitored_resource.trim_start_matches('/')
        )
    }

    /// Attach an integrity verifier for the monitored resource
    pub fn attach_integrity(
        &mut self,
        extension_id: &str,
        fetcher: Arc<dyn ResourceFetcher>,
        alert: Option<Arc<dyn AlertSurface>>,
    ) -> &IntegrityVerifier {
        let mut verifier = IntegrityVerifier::new(
            self.ctx.config(),
            self.resource_address(extension_id),
            fetcher,
            self.bridge.clone(),
        );
        if let Some(surface) = alert {
            verifier = verifier.with_alert_surface(surface);
        }
        self.integrity.insert(verifier)
    }

    pub fn integrity(&self) -> Option<&IntegrityVerifier> {
        self.integrity.as_ref()
    }

    fn verifier(&self) -> Result<&IntegrityVerifier> {
        self.integrity
            .as_ref()
            .ok_or_else(|| GuardError::Config("no integrity verifier attached".into()))
    }

    /// Status answer for the popup
    pub async fn security_status(&self) -> Result<SecurityStatusReport> {
        Ok(SecurityStatusReport {
            monitoring: true,
            suspicious_activities: self.ctx.ledger().count(),
            last_warning: self.bridge.security_warning().await?,
            last_status: self.bridge.security_status().await?,
        })
    }

    pub fn suspicious_activity_count(&self) -> u64 {
        self.ctx.ledger().count()
    }

    pub fn allowed_domains(&self) -> Vec<String> {
        self.ctx.policy().domains().to_vec()
    }

    pub async fn verify_integrity(&self) -> Result<IntegrityCheckResult> {
        self.verifier()?.verify().await
    }

    pub async fn run_integrity_load_check(&self) -> Result<IntegrityCheckRecord> {
        self.verifier()?.run_load_check().await
    }

    pub async fn integrity_metadata(&self) -> Result<IntegrityMetadata> {
        self.verifier()?.metadata().await
    }

    pub fn reset_integrity_baseline(&self) -> Result<()> {
        self.verifier()?.reset_baseline()
    }
}
