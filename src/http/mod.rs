//! HTTP layer.
//!
//! The router in [`handler`] sends `/healthz` and `/readiness` to the health
//! hook and everything else through the configured gate ([`basic`] or
//! [`html`]).  A gate that authorizes a request hands it to
//! [`forward::ForwardHandler`].

pub mod basic;
pub mod forward;
pub mod handler;
pub mod html;

#[cfg(test)]
mod testing;

use anyhow::Result;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::auth::credential::{Credential, Username};
use crate::auth::Verifier;
use crate::metrics::{MetricsRegistry, VerifyResult};

/// Header carrying the authenticated principal to the upstream.
pub const FORWARDED_USER: HeaderName = HeaderName::from_static("x-forwarded-user");

/// Run `verifier` and record the outcome.
pub(crate) async fn verify(
    verifier: &dyn Verifier,
    credential: &Credential,
    metrics: &MetricsRegistry,
) -> Result<bool> {
    let username = &credential.username;
    let result = verifier.verify(credential).await;
    match &result {
        Ok(true) => {
            metrics.metrics.record_verify(VerifyResult::Allowed);
            debug!(%username, "credential accepted");
        }
        Ok(false) => {
            metrics.metrics.record_verify(VerifyResult::Denied);
            debug!(%username, password_len = credential.password.len(), "credential denied");
        }
        Err(e) => {
            metrics.metrics.record_verify(VerifyResult::Error);
            warn!(%username, error = %format!("{e:#}"), "verifier unavailable");
        }
    }
    result
}

/// Replace any client-supplied principal header with `username`.
pub(crate) fn set_forwarded_user(headers: &mut HeaderMap, username: &Username) -> Result<()> {
    let value = HeaderValue::from_bytes(username.as_str().as_bytes())?;
    headers.insert(FORWARDED_USER, value);
    Ok(())
}
