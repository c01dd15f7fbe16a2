//! # a3s-guard
//!
//! Runtime protection layer for a streaming-site page-load context.
//!
//! ## Overview
//!
//! `a3s-guard` wraps the page's outbound capabilities (HTTP requests,
//! connections, sockets, storage, cookies, dynamic code, frame insertion)
//! in policy-enforcing decorators, counts suspicious activity per page, and
//! verifies a bundled resource against a trust-on-first-use SHA-256 baseline.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use a3s_guard::{GuardConfig, MemoryDurableStore, PageShield};
//!
//! # async fn example() -> a3s_guard::Result<()> {
//! let shield = PageShield::install(
//!     GuardConfig::default(),
//!     "https://www.netflix.com/browse",
//!     Arc::new(MemoryDurableStore::default()),
//! )?;
//!
//! assert!(shield.context().decide("https://assets.nflxext.com/app.js").is_allowed());
//! assert!(!shield.context().decide("https://tracker.example.com/p").is_allowed());
//!
//! // `PageShield::inject` also runs the integrity load check
//! let _heartbeat = shield.start_heartbeat();
//! let report = shield.security_status().await?;
//! println!("suspicious: {}", report.suspicious_activities);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **AllowListPolicy** — pure allow/deny decision for a target address
//! - **ActivityLedger** — per-page suspicious-activity counters and escalation
//! - **guards** — decorators implementing the capability they wrap
//! - **IntegrityVerifier** — SHA-256 baseline check of the monitored resource
//! - **PersistenceBridge** — single ordered writer over a `DurableStore`
//! - **Heartbeat** — periodic status republish and guard self check
//! - **PageShield** — per-page installer and collaborator-facing API

pub mod config;
pub mod error;
pub mod guards;
pub mod heartbeat;
pub mod integrity;
pub mod ledger;
pub mod persistence;
pub mod policy;
pub mod shield;
pub mod types;

// Re-export core types
pub use config::{EscalationMode, GuardConfig};
pub use error::{GuardError, Result};
pub use guards::{GuardContext, GuardKind, GuardRegistry};
pub use heartbeat::{BeatReport, Heartbeat};
pub use integrity::{
    sha256_hex, AlertSurface, FetchedResource, FileResourceFetcher, IntegrityVerifier,
    ResourceFetcher,
};
pub use ledger::ActivityLedger;
pub use persistence::{DurableStore, FileDurableStore, MemoryDurableStore, PersistenceBridge};
pub use policy::{AllowListPolicy, AllowReason, DenyReason, PageOrigin, Verdict};
pub use shield::PageShield;
pub use types::{
    ActivityCategory, ActivityRecord, IntegrityBaseline, IntegrityCheckRecord,
    IntegrityCheckResult, IntegrityMetadata, IntegrityReason, IntegrityWarningRecord,
    SecurityStatus, SecurityStatusReport, SecurityWarning, StatusLevel,
};
