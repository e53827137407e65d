use std::fmt::Write;
use std::sync::Arc;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue, LabelValueEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct VerifyLabels {
    pub result: VerifyResult,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum VerifyResult {
    Allowed,
    Denied,
    Error,
}

impl VerifyResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyResult::Allowed => "allowed",
            VerifyResult::Denied => "denied",
            VerifyResult::Error => "error",
        }
    }
}

impl EncodeLabelValue for VerifyResult {
    fn encode(&self, encoder: &mut LabelValueEncoder) -> Result<(), std::fmt::Error> {
        encoder.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Central container for every Prometheus metric exposed by the proxy.
pub struct Metrics {
    // -- gates --
    pub verify_total: Family<VerifyLabels, Counter>,

    // -- auth cache --
    pub auth_cache_hits: Counter,
    pub auth_cache_misses: Counter,

    // -- ldap pool --
    pub ldap_connections_created: Counter,
    pub ldap_connections_reused: Counter,
    pub ldap_connections_discarded: Counter,

    // -- upstream --
    pub upstream_requests: Counter,
    pub upstream_failures: Counter,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let verify_total = Family::<VerifyLabels, Counter>::default();
        registry.register(
            "auth_http_proxy_verify",
            "Credential verifications by outcome",
            verify_total.clone(),
        );

        let auth_cache_hits = Counter::default();
        registry.register(
            "auth_http_proxy_auth_cache_hits",
            "Verifications answered from the positive cache",
            auth_cache_hits.clone(),
        );

        let auth_cache_misses = Counter::default();
        registry.register(
            "auth_http_proxy_auth_cache_misses",
            "Verifications delegated to the backend",
            auth_cache_misses.clone(),
        );

        let ldap_connections_created = Counter::default();
        registry.register(
            "auth_http_proxy_ldap_connections_created",
            "LDAP connections opened",
            ldap_connections_created.clone(),
        );

        let ldap_connections_reused = Counter::default();
        registry.register(
            "auth_http_proxy_ldap_connections_reused",
            "LDAP connections taken from the idle queue",
            ldap_connections_reused.clone(),
        );

        let ldap_connections_discarded = Counter::default();
        registry.register(
            "auth_http_proxy_ldap_connections_discarded",
            "LDAP connections closed after an error or on a full queue",
            ldap_connections_discarded.clone(),
        );

        let upstream_requests = Counter::default();
        registry.register(
            "auth_http_proxy_upstream_requests",
            "Requests forwarded to the upstream",
            upstream_requests.clone(),
        );

        let upstream_failures = Counter::default();
        registry.register(
            "auth_http_proxy_upstream_failures",
            "Forwarded requests that failed before a response",
            upstream_failures.clone(),
        );

        Self {
            verify_total,
            auth_cache_hits,
            auth_cache_misses,
            ldap_connections_created,
            ldap_connections_reused,
            ldap_connections_discarded,
            upstream_requests,
            upstream_failures,
        }
    }

    pub fn record_verify(&self, result: VerifyResult) {
        self.verify_total
            .get_or_create(&VerifyLabels { result })
            .inc();
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe wrapper for the metrics registry.
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all proxy metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    /// Render the registry in OpenMetrics text format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
