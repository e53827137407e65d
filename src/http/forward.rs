//! Request forwarding toward the protected upstream.
//!
//! [`ForwardHandler`] rebuilds the target URL from the inbound request and
//! hands it to a [`RoundTrip`].  [`UpstreamClient`] is the production
//! transport: it always dials the configured target address, never follows
//! redirects and ignores proxy environment variables.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::{Body, HttpBody};
use axum::http::{header, HeaderMap, HeaderName, Request, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use tracing::{debug, warn};

use crate::metrics::MetricsRegistry;

/// Connection-scoped headers never copied across the proxy.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Copy every end-to-end header, preserving repeated values.
fn copy_headers(src: &HeaderMap, dst: &mut HeaderMap) {
    for (name, value) in src {
        if !is_hop_by_hop(name) {
            dst.append(name.clone(), value.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Executes one HTTP exchange with the upstream.
#[async_trait::async_trait]
pub trait RoundTrip: Send + Sync {
    async fn round_trip(&self, request: Request<Body>) -> Result<Response<Body>>;
}

pub struct UpstreamClient {
    client: reqwest::Client,
    target_address: String,
}

impl UpstreamClient {
    pub fn new(target_address: impl Into<String>, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(connect_timeout)
            .build()
            .context("failed to build upstream client")?;
        Ok(Self {
            client,
            target_address: target_address.into(),
        })
    }

    /// The request URL with its authority replaced by the target address.
    fn dial_url(&self, uri: &Uri) -> String {
        let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
        format!("http://{}{path}", self.target_address)
    }
}

#[async_trait::async_trait]
impl RoundTrip for UpstreamClient {
    async fn round_trip(&self, request: Request<Body>) -> Result<Response<Body>> {
        let (parts, body) = request.into_parts();

        let mut headers = HeaderMap::with_capacity(parts.headers.len());
        copy_headers(&parts.headers, &mut headers);
        // The client sets Host from the URL only when absent.
        if let Some(host) = parts.uri.authority() {
            if !headers.contains_key(header::HOST) {
                headers.insert(header::HOST, host.as_str().parse()?);
            }
        }

        let url = self.dial_url(&parts.uri);
        let mut outbound = self.client.request(parts.method, &url).headers(headers);
        if body.size_hint().exact() != Some(0) {
            outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }
        let upstream = outbound
            .send()
            .await
            .with_context(|| format!("upstream request to {url} failed"))?;

        let mut builder = Response::builder().status(upstream.status());
        if let Some(dst) = builder.headers_mut() {
            copy_headers(upstream.headers(), dst);
        }
        builder
            .body(Body::from_stream(upstream.bytes_stream()))
            .context("failed to build upstream response")
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ForwardHandler {
    transport: Arc<dyn RoundTrip>,
    target_address: String,
    metrics: MetricsRegistry,
}

impl ForwardHandler {
    pub fn new(
        transport: Arc<dyn RoundTrip>,
        target_address: impl Into<String>,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            transport,
            target_address: target_address.into(),
            metrics,
        }
    }

    /// Forward `request` and relay the upstream response.  Transport errors
    /// become a bare 500; the upstream is never retried.
    pub async fn forward(&self, mut request: Request<Body>) -> Response<Body> {
        self.metrics.metrics.upstream_requests.inc();

        let uri = match self.target_uri(&request) {
            Ok(uri) => uri,
            Err(e) => return self.failure(e),
        };
        debug!(method = %request.method(), %uri, "forwarding request");
        *request.uri_mut() = uri;

        match self.transport.round_trip(request).await {
            Ok(response) => response,
            Err(e) => self.failure(e),
        }
    }

    /// `http://{Host}{request-uri}`, falling back to the target address when
    /// the request carries no `Host`.
    fn target_uri(&self, request: &Request<Body>) -> Result<Uri> {
        let host = request
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| request.uri().authority().map(|a| a.as_str()))
            .unwrap_or(self.target_address.as_str());
        let path = request
            .uri()
            .path_and_query()
            .map_or("/", |pq| pq.as_str());
        format!("http://{host}{path}")
            .parse()
            .context("invalid forward URL")
    }

    fn failure(&self, err: anyhow::Error) -> Response<Body> {
        self.metrics.metrics.upstream_failures.inc();
        warn!(error = %format!("{err:#}"), "forward request failed");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}
