//! Fakes shared by the gate and router tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::http::{HeaderMap, Request, Response, StatusCode};
use parking_lot::Mutex;

use crate::auth::credential::Credential;
use crate::auth::Verifier;

use super::forward::RoundTrip;

/// Accepts a fixed `username -> password` table.
#[derive(Default)]
pub struct StaticVerifier {
    users: HashMap<String, String>,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl StaticVerifier {
    pub fn with_user(username: &str, password: &str) -> Arc<Self> {
        let mut users = HashMap::new();
        users.insert(username.to_string(), password.to_string());
        Arc::new(Self {
            users,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Verifier for StaticVerifier {
    async fn verify(&self, credential: &Credential) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("backend down");
        }
        Ok(self
            .users
            .get(credential.username.as_str())
            .is_some_and(|pw| pw == credential.password.as_str()))
    }
}

/// Answers `200 upstream:<path>` and remembers the forwarded headers.
#[derive(Default)]
pub struct RecordingTransport {
    pub calls: AtomicUsize,
    pub last_headers: Mutex<Option<HeaderMap>>,
}

impl RecordingTransport {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_header(&self, name: &str) -> Option<String> {
        self.last_headers
            .lock()
            .as_ref()
            .and_then(|h| h.get(name))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

#[async_trait::async_trait]
impl RoundTrip for RecordingTransport {
    async fn round_trip(&self, request: Request<Body>) -> Result<Response<Body>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_headers.lock() = Some(request.headers().clone());
        let body = format!("upstream:{}", request.uri().path());
        Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Body::from(body))?)
    }
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
