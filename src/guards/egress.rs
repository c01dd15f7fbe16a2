//! Egress guard — enforcing decorators over outbound network capabilities
//!
//! Three capability classes are wrapped: one-shot request issuance (async),
//! a stateful connection-open primitive taking method + address, and a
//! persistent full-duplex socket constructor. A denied target is recorded as
//! `network` activity and the call fails before the inner capability is
//! touched. Allowed calls are delegated unchanged.

use super::{GuardContext, GuardKind, InstallMarker};
use crate::error::{GuardError, Result};
use crate::policy::Verdict;
use crate::types::{truncate_chars, ActivityCategory};
use async_trait::async_trait;
use bytes::Bytes;

/// A request handed to the request-issuance capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// Absolute or page-relative target address
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl OutboundRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            url: url.into(),
            method: "POST".to_string(),
            headers: Vec::new(),
            body: Some(body.into()),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// One-shot request issuance
#[async_trait]
pub trait RequestIssuer: Send + Sync {
    type Response: Send;

    async fn issue(&self, request: OutboundRequest) -> Result<Self::Response>;
}

/// Stateful connection open with a method + address signature
pub trait ConnectionOpener: Send + Sync {
    type Connection;

    fn open(&self, method: &str, url: &str) -> Result<Self::Connection>;
}

/// Persistent full-duplex socket construction
pub trait SocketConnector: Send + Sync {
    type Socket;

    fn connect(&self, url: &str, protocols: &[String]) -> Result<Self::Socket>;
}

/// Consult the allowlist; on denial record the attempt and fail
fn enforce(ctx: &GuardContext, channel: &'static str, target: &str) -> Result<()> {
    match ctx.decide(target) {
        Verdict::Allow(_) => Ok(()),
        Verdict::Deny(reason) => {
            let excerpt = truncate_chars(target, ctx.config().max_target_chars);
            ctx.ledger().record(ActivityCategory::Network, &excerpt);
            tracing::warn!(
                channel,
                target = %excerpt,
                reason = %reason,
                "Blocked outbound connection"
            );
            Err(GuardError::PolicyViolation {
                category: ActivityCategory::Network,
                target: excerpt,
            })
        }
    }
}

/// Enforcing decorator over a [`RequestIssuer`]
pub struct GuardedRequestIssuer<R> {
    inner: R,
    ctx: GuardContext,
    _marker: InstallMarker,
}

impl<R: RequestIssuer> GuardedRequestIssuer<R> {
    pub fn new(inner: R, ctx: GuardContext) -> Self {
        let marker = ctx.install(GuardKind::Request);
        Self {
            inner,
            ctx,
            _marker: marker,
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<R: RequestIssuer> RequestIssuer for GuardedRequestIssuer<R> {
    type Response = R::Response;

    async fn issue(&self, request: OutboundRequest) -> Result<R::Response> {
        enforce(&self.ctx, "request", &request.url)?;
        self.inner.issue(request).await
    }
}

/// Enforcing decorator over a [`ConnectionOpener`]
pub struct GuardedConnectionOpener<C> {
    inner: C,
    ctx: GuardContext,
    _marker: InstallMarker,
}

impl<C: ConnectionOpener> GuardedConnectionOpener<C> {
    pub fn new(inner: C, ctx: GuardContext) -> Self {
        let marker = ctx.install(GuardKind::Connection);
        Self {
            inner,
            ctx,
            _marker: marker,
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: ConnectionOpener> ConnectionOpener for GuardedConnectionOpener<C> {
    type Connection = C::Connection;

    fn open(&self, method: &str, url: &str) -> Result<C::Connection> {
        enforce(&self.ctx, "connection", url)?;
        self.inner.open(method, url)
    }
}

/// Enforcing decorator over a [`SocketConnector`]
pub struct GuardedSocketConnector<S> {
    inner: S,
    ctx: GuardContext,
    _marker: InstallMarker,
}

impl<S: SocketConnector> GuardedSocketConnector<S> {
    pub fn new(inner: S, ctx: GuardContext) -> Self {
        let marker = ctx.install(GuardKind::Socket);
        Self {
            inner,
            ctx,
            _marker: marker,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: SocketConnector> SocketConnector for GuardedSocketConnector<S> {
    type Socket = S::Socket;

    fn connect(&self, url: &str, protocols: &[String]) -> Result<S::Socket> {
        enforce(&self.ctx, "socket", url)?;
        self.inner.connect(url, protocols)
    }
}
