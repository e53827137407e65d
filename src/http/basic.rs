//! `Authorization: Basic` gate.
//!
//! Any failure to authorize, including a backend error, answers with the
//! Basic challenge.  The upstream only ever sees authorized requests.

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use tracing::debug;

use crate::auth::credential::Credential;
use crate::auth::Verifier;
use crate::metrics::MetricsRegistry;

use super::forward::ForwardHandler;
use super::handler::AppError;

pub struct BasicGate {
    verifier: Arc<dyn Verifier>,
    forward: ForwardHandler,
    realm: String,
    metrics: MetricsRegistry,
}

impl BasicGate {
    pub fn new(
        verifier: Arc<dyn Verifier>,
        forward: ForwardHandler,
        realm: impl Into<String>,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            verifier,
            forward,
            realm: realm.into(),
            metrics,
        }
    }

    pub async fn handle(&self, mut request: Request<Body>) -> Result<Response, AppError> {
        let credential = Credential::from_authorization_header(request.headers()).map_err(|e| {
            debug!(error = %e, "no usable basic credentials");
            self.challenge()
        })?;

        let authorized = super::verify(self.verifier.as_ref(), &credential, &self.metrics)
            .await
            .unwrap_or(false);
        if !authorized {
            return Err(self.challenge());
        }

        super::set_forwarded_user(request.headers_mut(), &credential.username).map_err(|e| {
            debug!(error = %e, "username not representable as a header");
            self.challenge()
        })?;
        Ok(self.forward.forward(request).await)
    }

    fn challenge(&self) -> AppError {
        AppError::Unauthorized {
            realm: self.realm.clone(),
        }
    }
}
