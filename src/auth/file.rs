//! Flat-file backend.
//!
//! One `username:password` record per line, surrounding whitespace ignored.
//! The file is re-read on every call so edits take effect without a restart.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use super::credential::Credential;
use super::Verifier;

pub struct FileVerifier {
    path: PathBuf,
}

impl FileVerifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl Verifier for FileVerifier {
    async fn verify(&self, credential: &Credential) -> Result<bool> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .with_context(|| format!("failed to open users file: {}", self.path.display()))?;
        let mut lines = BufReader::new(file).lines();

        let username = credential.username.as_str();
        while let Some(line) = lines
            .next_line()
            .await
            .with_context(|| format!("failed to read users file: {}", self.path.display()))?
        {
            let Some((user, password)) = line.trim().split_once(':') else {
                continue;
            };
            if user != username {
                continue;
            }
            // First matching record decides.
            let ok = password == credential.password.as_str();
            debug!(%username, ok, "users file match");
            return Ok(ok);
        }

        debug!(%username, "user not found in users file");
        Ok(false)
    }
}
