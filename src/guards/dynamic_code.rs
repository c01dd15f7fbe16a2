//! Dynamic code guard — detection-only decorators over eval and function construction
//!
//! Submitted code is scanned for references to network, socket, cookie, and
//! storage APIs. A hit is recorded as `eval` activity; evaluation always
//! proceeds.

use super::{GuardContext, GuardKind, InstallMarker};
use crate::error::Result;
use crate::types::{truncate_chars, ActivityCategory};
use regex::RegexSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

const SUSPICIOUS_PATTERNS: &[&str] = &[
    r"fetch\s*\(",
    r"XMLHttpRequest",
    r"WebSocket",
    r"document\.cookie",
    r"localStorage",
    r"sessionStorage",
    r"indexedDB",
];

fn suspicious_patterns() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new(SUSPICIOUS_PATTERNS).unwrap_or_else(|_| RegexSet::empty())
    })
}

/// Whether `code` references any API an injected script could exfiltrate through
pub fn is_suspicious_code(code: &str) -> bool {
    suspicious_patterns().is_match(code)
}

/// Patterns that matched, for diagnostics
pub fn matched_patterns(code: &str) -> Vec<&'static str> {
    suspicious_patterns()
        .matches(code)
        .into_iter()
        .map(|index| SUSPICIOUS_PATTERNS[index])
        .collect()
}

/// Dynamic code evaluation entry point
pub trait CodeEvaluator {
    type Value;

    fn eval(&mut self, code: &str) -> Result<Self::Value>;
}

/// Dynamic function construction; the last argument is the body
pub trait FunctionConstructor {
    type Function;

    fn construct(&mut self, args: &[String]) -> Result<Self::Function>;
}

/// Detection-only decorator over a [`CodeEvaluator`]
pub struct GuardedEvaluator<E> {
    inner: E,
    ctx: GuardContext,
    _marker: InstallMarker,
}

impl<E: CodeEvaluator> GuardedEvaluator<E> {
    pub fn new(inner: E, ctx: GuardContext) -> Self {
        let marker = ctx.install(GuardKind::Eval);
        Self {
            inner,
            ctx,
            _marker: marker,
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

impl<E: CodeEvaluator> CodeEvaluator for GuardedEvaluator<E> {
    type Value = E::Value;

    fn eval(&mut self, code: &str) -> Result<E::Value> {
        tracing::debug!(length = code.len(), "Dynamic evaluation");

        let matched = matched_patterns(code);
        if !matched.is_empty() {
            let excerpt = truncate_chars(code, self.ctx.config().eval_excerpt_chars);
            tracing::warn!(patterns = ?matched, "Suspicious dynamic evaluation");
            self.ctx.ledger().record(ActivityCategory::Eval, &excerpt);
        }

        self.inner.eval(code)
    }
}

/// Size-reporting decorator over a [`FunctionConstructor`]
pub struct GuardedFunctionConstructor<F> {
    inner: F,
    ctx: GuardContext,
    large_bodies: AtomicU64,
    _marker: InstallMarker,
}

impl<F: FunctionConstructor> GuardedFunctionConstructor<F> {
    pub fn new(inner: F, ctx: GuardContext) -> Self {
        let marker = ctx.install(GuardKind::Function);
        Self {
            inner,
            ctx,
            large_bodies: AtomicU64::new(0),
            _marker: marker,
        }
    }

    /// Oversized bodies seen so far
    pub fn large_body_count(&self) -> u64 {
        self.large_bodies.load(Ordering::Relaxed)
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }
}

impl<F: FunctionConstructor> FunctionConstructor for GuardedFunctionConstructor<F> {
    type Function = F::Function;

    fn construct(&mut self, args: &[String]) -> Result<F::Function> {
        if let Some(body) = args.last() {
            let length = body.encode_utf16().count();
            let limit = self.ctx.config().function_body_limit;
            if length > limit {
                self.large_bodies.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(length, limit, "Large function constructor call");
            }
        }
        self.inner.construct(args)
    }
}
