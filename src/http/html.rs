//! Login form and session cookie gate.
//!
//! A request is authorized by, in order: a Basic header, the encrypted
//! session cookie, or `login`/`password` form fields.  A successful form
//! login sets the cookie and serves a redirect page back to the requested
//! URI; every other miss serves the login form.  Both pages use status 401.

use std::sync::Arc;

use anyhow::Context;
use axum::body::Body;
use axum::http::request::Parts;
use axum::http::uri::Scheme;
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use time::OffsetDateTime;
use tracing::debug;

use crate::auth::credential::{AuthToken, Credential};
use crate::auth::crypter::Crypter;
use crate::auth::Verifier;
use crate::metrics::MetricsRegistry;

use super::forward::ForwardHandler;
use super::handler::AppError;

pub const SESSION_COOKIE: &str = "auth-http-proxy-token";
pub const FIELD_LOGIN: &str = "login";
pub const FIELD_PASSWORD: &str = "password";

const SESSION_LIFETIME: time::Duration = time::Duration::hours(24);
const MAX_FORM_BYTES: usize = 64 * 1024;

pub struct HtmlGate {
    verifier: Arc<dyn Verifier>,
    forward: ForwardHandler,
    crypter: Crypter,
    metrics: MetricsRegistry,
}

impl HtmlGate {
    pub fn new(
        verifier: Arc<dyn Verifier>,
        forward: ForwardHandler,
        crypter: Crypter,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            verifier,
            forward,
            crypter,
            metrics,
        }
    }

    pub async fn handle(&self, request: Request<Body>) -> Result<Response, AppError> {
        // Basic: errors fall through to the cookie.
        if let Ok(credential) = Credential::from_authorization_header(request.headers()) {
            if let Ok(true) = self.verify(&credential).await {
                return self.authorized(request, &credential).await;
            }
        }

        if let Some(credential) = self.session_credential(request.headers()) {
            if self.verify(&credential).await? {
                return self.authorized(request, &credential).await;
            }
            debug!(username = %credential.username, "session cookie no longer valid");
        }

        let target = request
            .uri()
            .path_and_query()
            .map_or("/", |pq| pq.as_str())
            .to_string();
        let secure = is_secure(&request);
        let (parts, body) = request.into_parts();
        let form = read_login_form(&parts, body).await;

        let (Some(login), Some(password)) = (form.login, form.password) else {
            return Ok(login_form());
        };
        let credential = Credential::new(login, password);
        if !self.verify(&credential).await? {
            return Ok(login_form());
        }

        let value = self
            .crypter
            .encrypt(credential.token().as_str())
            .context("failed to encrypt session token")?;
        let cookie = Cookie::build((SESSION_COOKIE, value))
            .path("/")
            .http_only(true)
            .secure(secure)
            .expires(OffsetDateTime::now_utc() + SESSION_LIFETIME)
            .build();
        let set_cookie = HeaderValue::from_str(&cookie.to_string())
            .context("session cookie is not a valid header")?;

        debug!(username = %credential.username, %target, "login succeeded, redirecting");
        let mut response = redirect_page(&target);
        response.headers_mut().append(header::SET_COOKIE, set_cookie);
        Ok(response)
    }

    async fn verify(&self, credential: &Credential) -> anyhow::Result<bool> {
        super::verify(self.verifier.as_ref(), credential, &self.metrics).await
    }

    async fn authorized(
        &self,
        mut request: Request<Body>,
        credential: &Credential,
    ) -> Result<Response, AppError> {
        super::set_forwarded_user(request.headers_mut(), &credential.username)?;
        Ok(self.forward.forward(request).await)
    }

    /// Credential held by a decryptable session cookie.  Any decode failure
    /// means no session.
    fn session_credential(&self, headers: &HeaderMap) -> Option<Credential> {
        let jar = CookieJar::from_headers(headers);
        let cookie = jar.get(SESSION_COOKIE)?;
        let token = match self.crypter.decrypt(cookie.value()) {
            Ok(token) => token,
            Err(e) => {
                debug!(error = %e, "session cookie rejected");
                return None;
            }
        };
        match AuthToken::new(token).parse() {
            Ok(credential) => Some(credential),
            Err(e) => {
                debug!(error = %e, "session token unparsable");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Form handling
// ---------------------------------------------------------------------------

#[derive(Debug, Default, PartialEq, Eq)]
struct LoginForm {
    login: Option<String>,
    password: Option<String>,
}

impl LoginForm {
    /// Fill unset fields from urlencoded input; empty values count as unset.
    fn absorb(&mut self, encoded: &[u8]) {
        for (key, value) in url::form_urlencoded::parse(encoded) {
            let slot = match key.as_ref() {
                FIELD_LOGIN => &mut self.login,
                FIELD_PASSWORD => &mut self.password,
                _ => continue,
            };
            if slot.is_none() && !value.is_empty() {
                *slot = Some(value.into_owned());
            }
        }
    }
}

/// Login fields from an urlencoded POST body, then from the query string.
/// An unreadable or oversized body contributes nothing.
async fn read_login_form(parts: &Parts, body: Body) -> LoginForm {
    let mut form = LoginForm::default();

    if parts.method == Method::POST && is_urlencoded(&parts.headers) {
        match axum::body::to_bytes(body, MAX_FORM_BYTES).await {
            Ok(bytes) => form.absorb(&bytes),
            Err(e) => debug!(error = %e, "login form body unreadable"),
        }
    }
    if let Some(query) = parts.uri.query() {
        form.absorb(query.as_bytes());
    }
    form
}

fn is_urlencoded(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|mime| {
            mime.trim()
                .eq_ignore_ascii_case("application/x-www-form-urlencoded")
        })
}

/// Arrived over TLS, or behind a proxy that says so.
fn is_secure(request: &Request<Body>) -> bool {
    if request.uri().scheme() == Some(&Scheme::HTTPS) {
        return true;
    }
    request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

// ---------------------------------------------------------------------------
// Pages
// ---------------------------------------------------------------------------

fn login_form() -> Response {
    let page = format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Login Form</title>
</head>
<body>
<form name="loginForm" action="" method="post">
<fieldset>
<legend>Login required</legend>
<label for="{FIELD_LOGIN}">Login</label>
<input type="text" id="{FIELD_LOGIN}" name="{FIELD_LOGIN}" maxlength="255" required placeholder="login">
<label for="{FIELD_PASSWORD}">Password</label>
<input type="password" id="{FIELD_PASSWORD}" name="{FIELD_PASSWORD}" maxlength="255" required placeholder="password">
<button type="submit">Login</button>
</fieldset>
</form>
</body>
</html>
"#
    );
    (StatusCode::UNAUTHORIZED, Html(page)).into_response()
}

fn redirect_page(target: &str) -> Response {
    let target = escape_html(target);
    let page = format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta http-equiv="refresh" content="0;URL={target}">
<title>Login Success</title>
</head>
<body>
<h1>Login Success</h1>
<a href="{target}">{target}</a>
</body>
</html>
"#
    );
    (StatusCode::UNAUTHORIZED, Html(page)).into_response()
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
