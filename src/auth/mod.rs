//! Authentication and authorisation subsystem.
//!
//! Every backend implements [`Verifier`].  A backend is selected once at
//! startup by [`build_verifier`] and wrapped in the positive-result
//! [`cache::CachingVerifier`].

pub mod cache;
pub mod credential;
pub mod crowd;
pub mod crypter;
pub mod file;
pub mod groups;
pub mod identity;
pub mod ldap;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::{Config, GroupList, VerifierKind};
use crate::metrics::MetricsRegistry;

use self::credential::Credential;
use self::groups::RequiredGroups;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Answers whether a presented username/password pair is authorized.
///
/// `Ok(false)` means the credential was rejected.  `Err` means the backend
/// could not produce an answer; callers fail closed but must not cache it.
#[async_trait::async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, credential: &Credential) -> Result<bool>;

    /// Release backend resources.  Called once after the listener stops.
    async fn shutdown(&self) {}
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build the configured backend, wrapped in the verification cache.
pub fn build_verifier(config: &Config, metrics: &MetricsRegistry) -> Result<Arc<dyn Verifier>> {
    let required = match &config.required_groups {
        GroupList::Csv(csv) => RequiredGroups::from_csv(csv),
        GroupList::List(names) => RequiredGroups::from_list(names.iter().cloned()),
    };

    let backend: Box<dyn Verifier> = match config.verifier {
        VerifierKind::File => {
            warn_groups_unsupported(&required, "file");
            Box::new(file::FileVerifier::new(&config.file.users))
        }
        VerifierKind::Ldap => {
            let connector = ldap::client::LdapConnector::new(config.ldap.clone())
                .context("failed to build LDAP connector")?;
            let pool = ldap::pool::ConnectionPool::new(connector, metrics.clone());
            Box::new(ldap::DirectoryVerifier::new(pool, required))
        }
        VerifierKind::Crowd => {
            warn_groups_unsupported(&required, "crowd");
            let client = crowd::CrowdClient::new(&config.crowd)
                .context("failed to build Crowd client")?;
            Box::new(client)
        }
        VerifierKind::Auth => {
            let client = identity::AuthServiceClient::new(&config.auth)
                .context("failed to build auth service client")?;
            Box::new(identity::IdentityServiceVerifier::new(client, required))
        }
    };

    let ttl = Duration::from_secs(config.cache_ttl);
    Ok(Arc::new(cache::CachingVerifier::new(
        backend,
        ttl,
        metrics.clone(),
    )))
}

fn warn_groups_unsupported(required: &RequiredGroups, backend: &str) {
    if !required.is_empty() {
        tracing::warn!(
            backend,
            "required_groups has no effect: backend carries no group information"
        );
    }
}
