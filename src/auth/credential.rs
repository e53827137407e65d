//! Credential value types.
//!
//! A [`Credential`] is built per request from a `Basic` header, a session
//! cookie or a login form, and dropped once the verifier has answered.  The
//! [`AuthToken`] is its reversible `username:password` encoding, used as the
//! session cookie payload and as the identity-service request token.

use std::fmt;

use anyhow::{bail, Context, Result};
use axum::http::{header, HeaderMap};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

const TOKEN_SEPARATOR: char = ':';

// ---------------------------------------------------------------------------
// Username / Password
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Username(String);

impl Username {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A presented password.  `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Password(len={})", self.0.len())
    }
}

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: Username,
    pub password: Password,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Username(username.into()),
            password: Password(password.into()),
        }
    }

    /// Parse an `Authorization: Basic <base64(user:pass)>` header.
    pub fn from_authorization_header(headers: &HeaderMap) -> Result<Self> {
        let value = headers
            .get(header::AUTHORIZATION)
            .context("missing Authorization header")?
            .to_str()
            .context("Authorization header is not visible ASCII")?;

        let (scheme, encoded) = value
            .split_once(' ')
            .context("malformed Authorization header")?;
        if !scheme.eq_ignore_ascii_case("basic") {
            bail!("unsupported authorization scheme: {scheme}");
        }

        let decoded = STANDARD
            .decode(encoded.trim())
            .context("Authorization header is not valid base64")?;
        let decoded = String::from_utf8(decoded).context("Authorization header is not UTF-8")?;

        AuthToken(decoded).parse()
    }

    pub fn token(&self) -> AuthToken {
        AuthToken(format!(
            "{}{TOKEN_SEPARATOR}{}",
            self.username.as_str(),
            self.password.as_str()
        ))
    }
}

// ---------------------------------------------------------------------------
// AuthToken
// ---------------------------------------------------------------------------

/// `username:password`.
///
/// Parsing splits at the first separator, so passwords may contain `:` but
/// a username containing `:` does not survive a round trip.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn parse(&self) -> Result<Credential> {
        let (username, password) = self
            .0
            .split_once(TOKEN_SEPARATOR)
            .context("auth token has no separator")?;
        Ok(Credential::new(username, password))
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthToken(len={})", self.0.len())
    }
}
