//! Atlassian Crowd backend.
//!
//! Uses the usermanagement REST API as a Crowd application.  Crowd returns
//! no group information here, so required groups do not apply.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CrowdConfig;

use super::credential::Credential;
use super::Verifier;

/// 400 reasons that mean the credential was rejected.
const DENIAL_REASONS: &[&str] = &[
    "INVALID_USER_AUTHENTICATION",
    "USER_NOT_FOUND",
    "INACTIVE_ACCOUNT",
    "EXPIRED_CREDENTIAL",
];

#[derive(Serialize)]
struct PasswordBody<'a> {
    value: &'a str,
}

#[derive(Deserialize)]
struct CrowdError {
    #[serde(default)]
    reason: String,
}

pub struct CrowdClient {
    http_client: reqwest::Client,
    authentication_url: String,
    app_name: String,
    app_password: String,
}

impl CrowdClient {
    pub fn new(config: &CrowdConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("auth-http-proxy/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            http_client,
            authentication_url: format!(
                "{}/rest/usermanagement/1/authentication",
                config.url.trim_end_matches('/')
            ),
            app_name: config.app_name.clone(),
            app_password: config.app_password.clone(),
        })
    }
}

#[async_trait::async_trait]
impl Verifier for CrowdClient {
    async fn verify(&self, credential: &Credential) -> Result<bool> {
        let username = credential.username.as_str();
        debug!(%username, password_len = credential.password.len(), "crowd authenticate");

        let resp = self
            .http_client
            .post(&self.authentication_url)
            .query(&[("username", username)])
            .basic_auth(&self.app_name, Some(&self.app_password))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&PasswordBody {
                value: credential.password.as_str(),
            })
            .send()
            .await
            .context("crowd request failed")?;

        let status = resp.status();
        if status.is_success() {
            return Ok(true);
        }
        if status == StatusCode::BAD_REQUEST {
            let err: CrowdError = resp
                .json()
                .await
                .context("failed to parse crowd error response")?;
            if DENIAL_REASONS.contains(&err.reason.as_str()) {
                debug!(%username, reason = %err.reason, "crowd rejected credential");
                return Ok(false);
            }
            bail!("crowd returned 400: {}", err.reason);
        }
        bail!("crowd returned {status}")
    }
}
