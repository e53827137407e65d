use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::TcpStream;

use crate::config::Config;

// ---------------------------------------------------------------------------
// Health hook
// ---------------------------------------------------------------------------

/// Upstream liveness check shared by `/healthz` and `/readiness`.
#[derive(Clone)]
pub struct HealthCheck {
    target: HealthTarget,
    timeout: Duration,
}

#[derive(Clone)]
enum HealthTarget {
    /// GET this URL and expect a 2xx.
    Url {
        url: String,
        http_client: reqwest::Client,
    },
    /// Open a TCP connection to this address.
    Dial { address: String },
}

impl HealthCheck {
    pub fn from_config(config: &Config) -> Result<Self> {
        let timeout = Duration::from_secs(config.upstream_timeout);
        let target = match &config.target_healthz_url {
            Some(url) if !url.is_empty() => HealthTarget::Url {
                url: url.clone(),
                http_client: reqwest::Client::builder()
                    .timeout(timeout)
                    .build()
                    .context("failed to build health check client")?,
            },
            _ => HealthTarget::Dial {
                address: config.target_address.clone(),
            },
        };
        Ok(Self { target, timeout })
    }

    pub async fn check(&self) -> Result<()> {
        match &self.target {
            HealthTarget::Url { url, http_client } => {
                let resp = http_client
                    .get(url)
                    .send()
                    .await
                    .with_context(|| format!("GET {url} failed"))?;
                if !resp.status().is_success() {
                    bail!("GET {url} returned {}", resp.status());
                }
                Ok(())
            }
            HealthTarget::Dial { address } => {
                tokio::time::timeout(self.timeout, TcpStream::connect(address.as_str()))
                    .await
                    .with_context(|| format!("connect to {address} timed out"))?
                    .with_context(|| format!("connect to {address} failed"))?;
                Ok(())
            }
        }
    }
}
