//! Allowlist policy — the pure ALLOW/DENY decision every guard consults
//!
//! The policy holds only immutable configuration and is `Send + Sync`, so a
//! single instance is shared by every guard of a page.

use crate::config::{normalize_domain, GuardConfig};
use crate::error::{GuardError, Result};
use std::fmt;
use url::Url;

/// The current page, used to resolve relative targets and for same-origin checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOrigin {
    /// `scheme://host[:port]/`, the base relative targets resolve against
    base: Url,
    host: String,
}

impl PageOrigin {
    /// Parse the page address; it must be absolute and carry a host
    pub fn parse(page_url: &str) -> Result<Self> {
        let parsed = Url::parse(page_url).map_err(|e| GuardError::InvalidTarget {
            target: page_url.to_string(),
            reason: e.to_string(),
        })?;

        let host = parsed
            .host_str()
            .map(normalize_host)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| GuardError::InvalidTarget {
                target: page_url.to_string(),
                reason: "page address has no host".to_string(),
            })?;

        let base = Url::parse(&format!("{}/", parsed.origin().ascii_serialization())).map_err(
            |e| GuardError::InvalidTarget {
                target: page_url.to_string(),
                reason: e.to_string(),
            },
        )?;

        Ok(Self { base, host })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Serialized origin, e.g. `https://www.netflix.com`
    pub fn origin(&self) -> String {
        self.base.origin().ascii_serialization()
    }

    /// Resolve an absolute or page-relative target
    pub fn resolve(&self, target: &str) -> std::result::Result<Url, url::ParseError> {
        self.base.join(target)
    }
}

/// Why a target was allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowReason {
    ExtensionResource,
    SameOrigin,
    Allowlisted,
}

/// Why a target was denied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// Target could not be parsed or resolved to a host
    InvalidTarget(String),
    NotAllowlisted { host: String },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTarget(reason) => write!(f, "invalid target: {}", reason),
            Self::NotAllowlisted { host } => write!(f, "host '{}' is not allowlisted", host),
        }
    }
}

/// Policy decision for one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow(AllowReason),
    Deny(DenyReason),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }

    /// True when the denial came from unparseable input
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::Deny(DenyReason::InvalidTarget(_)))
    }
}

/// Fixed allowlist of destination domains
#[derive(Debug, Clone)]
pub struct AllowListPolicy {
    domains: Vec<String>,
    extension_prefix: String,
}

impl AllowListPolicy {
    pub fn new(config: &GuardConfig) -> Self {
        Self {
            domains: config
                .allowed_domains
                .iter()
                .map(|d| normalize_domain(d))
                .filter(|d| !d.is_empty())
                .collect(),
            extension_prefix: format!("{}://", config.extension_scheme.to_ascii_lowercase()),
        }
    }

    /// Allowlisted domains in configuration order
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// Decide whether `target` may be reached from `page`
    pub fn decide(&self, target: &str, page: &PageOrigin) -> Verdict {
        let trimmed = target.trim();

        if self.is_extension_resource(trimmed) {
            return Verdict::Allow(AllowReason::ExtensionResource);
        }

        let resolved = match page.resolve(trimmed) {
            Ok(url) => url,
            Err(e) => return Verdict::Deny(DenyReason::InvalidTarget(e.to_string())),
        };

        let host = match resolved.host_str() {
            Some(host) if !host.is_empty() => normalize_host(host),
            _ => {
                return Verdict::Deny(DenyReason::InvalidTarget(format!(
                    "'{}' has no host",
                    resolved
                )))
            }
        };

        if host == page.host() {
            return Verdict::Allow(AllowReason::SameOrigin);
        }

        if self.host_is_allowlisted(&host) {
            Verdict::Allow(AllowReason::Allowlisted)
        } else {
            Verdict::Deny(DenyReason::NotAllowlisted { host })
        }
    }

    /// Boolean form of [`decide`](Self::decide)
    pub fn is_allowed(&self, target: &str, page: &PageOrigin) -> bool {
        self.decide(target, page).is_allowed()
    }

    /// Exact match or dot-delimited subdomain of an allowlisted entry
    pub fn host_is_allowlisted(&self, host: &str) -> bool {
        let host = normalize_host(host);
        self.domains.iter().any(|domain| {
            host == *domain
                || (host.len() > domain.len()
                    && host.ends_with(domain.as_str())
                    && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
        })
    }

    fn is_extension_resource(&self, target: &str) -> bool {
        target
            .get(..self.extension_prefix.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(&self.extension_prefix))
    }
}

fn normalize_host(host: &str) -> String {
    host.trim_end_matches('.').to_ascii_lowercase()
}
