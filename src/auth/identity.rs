//! External identity service backend.
//!
//! The remote service receives the auth token together with the required
//! groups and answers with the resolved principal name.  Group semantics
//! live entirely on the remote side.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AuthServiceConfig;

use super::credential::{AuthToken, Credential};
use super::groups::{GroupName, RequiredGroups};
use super::Verifier;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Resolves a token to a principal name.  An empty name means not authorized.
#[async_trait::async_trait]
pub trait IdentityService: Send + Sync {
    async fn check(&self, token: &AuthToken, required: &RequiredGroups) -> Result<String>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    auth_token: &'a str,
    required_groups: Vec<&'a GroupName>,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(default)]
    user: Option<String>,
}

pub struct AuthServiceClient {
    http_client: reqwest::Client,
    login_url: String,
    application_name: String,
    application_password: String,
}

impl AuthServiceClient {
    pub fn new(config: &AuthServiceConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("auth-http-proxy/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            http_client,
            login_url: format!("{}/api/1.0/login", config.url.trim_end_matches('/')),
            application_name: config.application_name.clone(),
            application_password: config.application_password.clone(),
        })
    }
}

#[async_trait::async_trait]
impl IdentityService for AuthServiceClient {
    async fn check(&self, token: &AuthToken, required: &RequiredGroups) -> Result<String> {
        let body = LoginRequest {
            auth_token: token.as_str(),
            required_groups: required.iter().collect(),
        };

        let resp = self
            .http_client
            .post(&self.login_url)
            .basic_auth(&self.application_name, Some(&self.application_password))
            .json(&body)
            .send()
            .await
            .context("auth service request failed")?;

        let status = resp.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                debug!(%status, "auth service rejected token");
                return Ok(String::new());
            }
            s if !s.is_success() => bail!("auth service returned {status}"),
            _ => {}
        }

        let login: LoginResponse = resp
            .json()
            .await
            .context("failed to parse auth service response")?;
        Ok(login.user.unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Verifier
// ---------------------------------------------------------------------------

pub struct IdentityServiceVerifier<S: IdentityService> {
    service: S,
    required: RequiredGroups,
}

impl<S: IdentityService> IdentityServiceVerifier<S> {
    pub fn new(service: S, required: RequiredGroups) -> Self {
        Self { service, required }
    }
}

#[async_trait::async_trait]
impl<S: IdentityService> Verifier for IdentityServiceVerifier<S> {
    async fn verify(&self, credential: &Credential) -> Result<bool> {
        let principal = self
            .service
            .check(&credential.token(), &self.required)
            .await?;
        let ok = !principal.is_empty();
        debug!(username = %credential.username, %principal, ok, "auth service verdict");
        Ok(ok)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{header, HeaderMap};
    use axum::routing::post;
    use axum::{Json, Router};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde_json::{json, Value};

    use super::*;

    struct StaticService(Result<String, String>);

    #[async_trait::async_trait]
    impl IdentityService for StaticService {
        async fn check(&self, _token: &AuthToken, _required: &RequiredGroups) -> Result<String> {
            self.0.clone().map_err(anyhow::Error::msg)
        }
    }

    #[tokio::test]
    async fn test_non_empty_principal_authorizes() {
        let v = IdentityServiceVerifier::new(
            StaticService(Ok("alice".into())),
            RequiredGroups::default(),
        );
        assert!(v.verify(&Credential::new("alice", "secret")).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_principal_denies() {
        let v = IdentityServiceVerifier::new(
            StaticService(Ok(String::new())),
            RequiredGroups::default(),
        );
        assert!(!v.verify(&Credential::new("alice", "secret")).await.unwrap());
    }

    #[tokio::test]
    async fn test_service_error_propagates() {
        let v = IdentityServiceVerifier::new(
            StaticService(Err("down".into())),
            RequiredGroups::default(),
        );
        assert!(v.verify(&Credential::new("alice", "secret")).await.is_err());
    }

    /// Accepts app `proxy:app-pw`; authorizes `alice:secret` if every
    /// requested group is `admins`.
    async fn login(headers: HeaderMap, Json(body): Json<Value>) -> axum::response::Response {
        use axum::response::IntoResponse;

        let expected = format!("Basic {}", STANDARD.encode("proxy:app-pw"));
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        if presented != Some(expected.as_str()) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        match body["authToken"].as_str() {
            Some("alice:secret") => {}
            Some("boom:boom") => return StatusCode::BAD_GATEWAY.into_response(),
            _ => return StatusCode::NOT_FOUND.into_response(),
        }
        let groups_ok = body["requiredGroups"]
            .as_array()
            .is_some_and(|groups| groups.iter().all(|g| g.as_str() == Some("admins")));
        if groups_ok {
            Json(json!({ "user": "alice" })).into_response()
        } else {
            Json(json!({ "user": "" })).into_response()
        }
    }

    async fn spawn_service() -> String {
        let app = Router::new().route("/api/1.0/login", post(login));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn client(url: String, password: &str) -> AuthServiceClient {
        AuthServiceClient::new(&AuthServiceConfig {
            url,
            application_name: "proxy".into(),
            application_password: password.into(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_client_resolves_principal() {
        let url = spawn_service().await;
        let client = client(url, "app-pw");
        let required = RequiredGroups::from_list(["admins"]);
        let token = Credential::new("alice", "secret").token();
        assert_eq!(client.check(&token, &required).await.unwrap(), "alice");
    }

    #[tokio::test]
    async fn test_client_group_mismatch_is_empty() {
        let url = spawn_service().await;
        let client = client(url, "app-pw");
        let required = RequiredGroups::from_list(["ops"]);
        let token = Credential::new("alice", "secret").token();
        assert_eq!(client.check(&token, &required).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_client_unknown_user_is_empty() {
        let url = spawn_service().await;
        let client = client(url, "app-pw");
        let token = Credential::new("carol", "x").token();
        assert_eq!(client.check(&token, &RequiredGroups::default()).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_client_server_error_is_error() {
        let url = spawn_service().await;
        let client = client(url, "app-pw");
        let token = Credential::new("boom", "boom").token();
        assert!(client.check(&token, &RequiredGroups::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_client_unreachable_is_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = client(format!("http://{addr}"), "app-pw");
        let token = Credential::new("alice", "secret").token();
        assert!(client.check(&token, &RequiredGroups::default()).await.is_err());
    }
}
