//! Integrity verifier — trust-on-first-use SHA-256 baseline for a bundled resource
//!
//! The first observed digest of the monitored resource becomes the baseline.
//! Later checks compare against it; a mismatch persists an
//! `IntegrityWarningRecord` and raises a transient alert on the page. The
//! baseline is only replaced after an explicit [`IntegrityVerifier::reset_baseline`].

use crate::config::GuardConfig;
use crate::error::{GuardError, Result};
use crate::persistence::PersistenceBridge;
use crate::types::{
    now_millis, FirstLoadMetadata, IntegrityBaseline, IntegrityCheckRecord,
    IntegrityCheckResult, IntegrityMetadata, IntegrityReason, IntegrityWarningRecord,
};
use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const MISMATCH_ALERT: &str = "Bundled resource integrity check failed! Check console for details.";

/// Bytes of the monitored resource plus the response facts we report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    pub bytes: Bytes,
    pub last_modified: Option<String>,
    pub content_length: Option<u64>,
}

impl FetchedResource {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            last_modified: None,
            content_length: None,
        }
    }

    /// Reported size, preferring the declared length
    pub fn size(&self) -> u64 {
        self.content_length.unwrap_or(self.bytes.len() as u64)
    }
}

/// Fetches the monitored resource by its internal address
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, address: &str) -> Result<FetchedResource>;
}

/// Identifier of an alert shown on the page
pub type AlertId = u64;

/// A renderable surface on the page for transient alerts
pub trait AlertSurface: Send + Sync {
    fn show(&self, message: &str) -> AlertId;
    fn dismiss(&self, id: AlertId);
}

/// Reads bundled resources from the unpacked extension directory
///
/// Addresses look like `<scheme>://<extension-id>/<path>`; a bare relative
/// path is accepted too. Paths escaping the bundle root are rejected.
pub struct FileResourceFetcher {
    root: PathBuf,
    prefix: String,
}

impl FileResourceFetcher {
    pub fn new(root: impl Into<PathBuf>, config: &GuardConfig) -> Self {
        Self {
            root: root.into(),
            prefix: format!("{}://", config.extension_scheme),
        }
    }

    /// Map an address onto a file under the bundle root
    pub fn resolve(&self, address: &str) -> Result<PathBuf> {
        let relative = match address.strip_prefix(&self.prefix) {
            Some(rest) => rest.split_once('/').map(|(_, path)| path).unwrap_or(""),
            None => address,
        };
        let relative = relative.split(['?', '#']).next().unwrap_or_default();

        let path = Path::new(relative);
        let escapes = path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if relative.is_empty() || escapes {
            return Err(GuardError::Fetch {
                address: address.to_string(),
                reason: "address does not name a file inside the bundle".to_string(),
            });
        }

        Ok(self.root.join(path))
    }
}

#[async_trait]
impl ResourceFetcher for FileResourceFetcher {
    async fn fetch(&self, address: &str) -> Result<FetchedResource> {
        let path = self.resolve(address)?;
        let fetch_err = |e: std::io::Error| GuardError::Fetch {
            address: address.to_string(),
            reason: format!("{}: {}", path.display(), e),
        };

        let bytes = tokio::fs::read(&path).await.map_err(fetch_err)?;
        let metadata = tokio::fs::metadata(&path).await.map_err(fetch_err)?;
        let last_modified = metadata
            .modified()
            .ok()
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc2822());

        Ok(FetchedResource {
            content_length: Some(bytes.len() as u64),
            bytes: Bytes::from(bytes),
            last_modified,
        })
    }
}

/// Lowercase hex SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// TOFU verifier for one monitored resource
pub struct IntegrityVerifier {
    address: String,
    fetcher: Arc<dyn ResourceFetcher>,
    bridge: PersistenceBridge,
    alert: Option<Arc<dyn AlertSurface>>,
    alert_duration: Duration,
    markers: Vec<String>,
}

impl IntegrityVerifier {
    pub fn new(
        config: &GuardConfig,
        address: impl Into<String>,
        fetcher: Arc<dyn ResourceFetcher>,
        bridge: PersistenceBridge,
    ) -> Self {
        Self {
            address: address.into(),
            fetcher,
            bridge,
            alert: None,
            alert_duration: config.alert_duration(),
            markers: config.resource_markers.clone(),
        }
    }

    /// Attach the page surface mismatch alerts are shown on
    pub fn with_alert_surface(mut self, surface: Arc<dyn AlertSurface>) -> Self {
        self.alert = Some(surface);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Run the check state machine once
    ///
    /// A fetch failure is an outcome (`hash_calculation_failed`), not an
    /// error. `Err` is only returned when the durable store cannot be read
    /// or written, so an unreadable baseline is never mistaken for a
    /// missing one.
    pub async fn verify(&self) -> Result<IntegrityCheckResult> {
        tracing::debug!(address = %self.address, "Calculating resource digest");
        let resource = match self.fetcher.fetch(&self.address).await {
            Ok(resource) => resource,
            Err(e) => {
                tracing::error!(address = %self.address, error = %e, "Failed to calculate digest");
                return Ok(IntegrityCheckResult::calculation_failed());
            }
        };
        let digest = sha256_hex(&resource.bytes);

        match self.bridge.baseline().await? {
            None => {
                tracing::info!(
                    address = %self.address,
                    digest = %digest,
                    "First load, storing baseline digest"
                );
                self.bridge.persist_baseline(&IntegrityBaseline {
                    digest_hex: digest.clone(),
                    established_at: now_millis(),
                })?;
                self.bridge.persist_first_load(&FirstLoadMetadata {
                    first_load_date: chrono::Utc::now().to_rfc3339(),
                    size: resource.size(),
                })?;
                Ok(IntegrityCheckResult::first_load(digest))
            }
            Some(baseline) if baseline.digest_hex == digest => {
                tracing::info!(address = %self.address, "Resource integrity verified");
                Ok(IntegrityCheckResult::hash_match(digest))
            }
            Some(baseline) => {
                tracing::error!(
                    address = %self.address,
                    expected = %baseline.digest_hex,
                    actual = %digest,
                    "Resource integrity check failed"
                );
                self.bridge.persist_integrity_warning(&IntegrityWarningRecord {
                    timestamp: now_millis(),
                    expected_digest_hex: baseline.digest_hex.clone(),
                    actual_digest_hex: digest.clone(),
                    message: "Monitored resource has been modified".to_string(),
                })?;
                self.raise_alert();
                Ok(IntegrityCheckResult::hash_mismatch(baseline.digest_hex, digest))
            }
        }
    }

    fn raise_alert(&self) {
        let Some(surface) = self.alert.clone() else {
            return;
        };
        let id = surface.show(MISMATCH_ALERT);
        let duration = self.alert_duration;
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            surface.dismiss(id);
        });
    }

    /// Debug facts about the resource; independent of verification
    pub async fn metadata(&self) -> Result<IntegrityMetadata> {
        let resource = self.fetcher.fetch(&self.address).await?;
        let text = String::from_utf8_lossy(&resource.bytes);

        Ok(IntegrityMetadata {
            size: text.encode_utf16().count() as u64,
            line_count: text.split('\n').count() as u64,
            contains_expected_marker: self.markers.iter().any(|m| text.contains(m.as_str())),
            last_modified: resource
                .last_modified
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    pub async fn stored_baseline(&self) -> Result<Option<IntegrityBaseline>> {
        self.bridge.baseline().await
    }

    /// Forget the baseline; the next check establishes a new one
    pub fn reset_baseline(&self) -> Result<()> {
        self.bridge.clear_baseline()?;
        tracing::info!(address = %self.address, "Baseline reset, will be recalculated on next check");
        Ok(())
    }

    /// Load-time check: verify, gather metadata, persist `lastIntegrityCheck`
    pub async fn run_load_check(&self) -> Result<IntegrityCheckRecord> {
        let result = self.verify().await?;
        let metadata = match self.metadata().await {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read resource metadata");
                None
            }
        };

        let record = IntegrityCheckRecord {
            timestamp: now_millis(),
            result,
            metadata,
        };
        self.bridge.persist_last_check(&record)?;

        if record.result.reason == IntegrityReason::HashMismatch {
            tracing::error!(
                address = %self.address,
                "SECURITY WARNING: the monitored resource has been modified. \
                 This could indicate tampering or corruption; reinstall from a trusted source."
            );
        }

        tracing::info!(
            reason = %record.result.reason,
            verified = record.result.verified,
            "Integrity load check complete"
        );
        Ok(record)
    }
}
