//! Cookie guard — observe-only decorator over the credential-cookie property

use super::{GuardContext, GuardKind, InstallMarker};
use crate::error::Result;
use crate::types::{truncate_chars, ActivityCategory};

/// The page's cookie property (read returns the serialized jar)
pub trait CookieJar {
    fn cookie(&self) -> Result<String>;
    fn set_cookie(&mut self, value: &str) -> Result<()>;
}

/// Observing decorator over a [`CookieJar`]
///
/// Writes that mention none of the trusted tokens are recorded as `cookie`
/// activity. The write always proceeds.
pub struct GuardedCookieJar<J> {
    inner: J,
    ctx: GuardContext,
    _marker: InstallMarker,
}

impl<J: CookieJar> GuardedCookieJar<J> {
    pub fn new(inner: J, ctx: GuardContext) -> Self {
        let marker = ctx.install(GuardKind::Cookie);
        Self {
            inner,
            ctx,
            _marker: marker,
        }
    }

    pub fn inner(&self) -> &J {
        &self.inner
    }

    fn is_trusted(&self, value: &str) -> bool {
        self.ctx
            .config()
            .trusted_cookie_tokens
            .iter()
            .any(|token| value.contains(token.as_str()))
    }
}

impl<J: CookieJar> CookieJar for GuardedCookieJar<J> {
    fn cookie(&self) -> Result<String> {
        self.inner.cookie()
    }

    fn set_cookie(&mut self, value: &str) -> Result<()> {
        if !self.is_trusted(value) {
            let excerpt = truncate_chars(value, self.ctx.config().cookie_excerpt_chars);
            tracing::warn!(value = %excerpt, "Suspicious cookie modification");
            self.ctx.ledger().record(ActivityCategory::Cookie, &excerpt);
        }
        self.inner.set_cookie(value)
    }
}
