//! Directory (LDAP) backend.
//!
//! Authentication is a bind through a pooled connection; authorization then
//! requires every configured group to appear among the user's groups.

pub mod client;
pub mod pool;
mod tls;

use anyhow::Result;
use tracing::debug;

use super::credential::Credential;
use super::groups::RequiredGroups;
use super::Verifier;

use self::pool::{ConnectionPool, DirectoryConnector};

pub struct DirectoryVerifier<C: DirectoryConnector> {
    pool: ConnectionPool<C>,
    required: RequiredGroups,
}

impl<C: DirectoryConnector> DirectoryVerifier<C> {
    pub fn new(pool: ConnectionPool<C>, required: RequiredGroups) -> Self {
        Self { pool, required }
    }
}

#[async_trait::async_trait]
impl<C: DirectoryConnector> Verifier for DirectoryVerifier<C> {
    async fn verify(&self, credential: &Credential) -> Result<bool> {
        let username = credential.username.as_str();
        if !self
            .pool
            .authenticate(username, credential.password.as_str())
            .await?
        {
            debug!(%username, "directory bind rejected");
            return Ok(false);
        }

        if self.required.is_empty() {
            return Ok(true);
        }

        let groups = self.pool.groups_of_user(username).await?;
        if let Some(missing) = self.required.missing(groups.as_slice()) {
            debug!(%username, %missing, "user lacks required group");
            return Ok(false);
        }
        Ok(true)
    }

    async fn shutdown(&self) {
        self.pool.close_all().await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::pool::DirectoryConnection;
    use super::*;
    use crate::metrics::MetricsRegistry;

    /// In-memory directory: `username -> (password, groups)`.
    #[derive(Clone, Default)]
    struct FakeDirectory {
        users: Arc<HashMap<String, (String, Vec<String>)>>,
        group_lookups: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        unreachable: bool,
    }

    impl FakeDirectory {
        fn with_user(username: &str, password: &str, groups: &[&str]) -> Self {
            let mut users = HashMap::new();
            users.insert(
                username.to_string(),
                (
                    password.to_string(),
                    groups.iter().map(|g| g.to_string()).collect(),
                ),
            );
            Self {
                users: Arc::new(users),
                ..Self::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl DirectoryConnector for FakeDirectory {
        type Connection = FakeDirectory;

        async fn connect(&self) -> Result<FakeDirectory> {
            if self.unreachable {
                anyhow::bail!("connection refused");
            }
            Ok(self.clone())
        }
    }

    #[async_trait::async_trait]
    impl DirectoryConnection for FakeDirectory {
        async fn authenticate(&mut self, username: &str, password: &str) -> Result<bool> {
            Ok(self
                .users
                .get(username)
                .is_some_and(|(pw, _)| pw == password))
        }

        async fn groups_of_user(&mut self, username: &str) -> Result<Vec<String>> {
            self.group_lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .users
                .get(username)
                .map(|(_, groups)| groups.clone())
                .unwrap_or_default())
        }

        async fn close(self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn verifier(directory: FakeDirectory, required: &[&str]) -> DirectoryVerifier<FakeDirectory> {
        let pool = ConnectionPool::new(directory, MetricsRegistry::new());
        DirectoryVerifier::new(pool, RequiredGroups::from_list(required.iter().copied()))
    }

    #[tokio::test]
    async fn test_member_of_all_required_groups() {
        let dir = FakeDirectory::with_user("alice", "secret", &["a", "b", "c"]);
        let v = verifier(dir, &["a", "c"]);
        assert!(v.verify(&Credential::new("alice", "secret")).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_required_group_denied() {
        let dir = FakeDirectory::with_user("alice", "secret", &["a", "b", "c"]);
        let v = verifier(dir, &["a", "d"]);
        assert!(!v.verify(&Credential::new("alice", "secret")).await.unwrap());
    }

    #[tokio::test]
    async fn test_bad_password_skips_group_lookup() {
        let dir = FakeDirectory::with_user("alice", "secret", &["a"]);
        let lookups = Arc::clone(&dir.group_lookups);
        let v = verifier(dir, &["a"]);
        assert!(!v.verify(&Credential::new("alice", "nope")).await.unwrap());
        assert_eq!(lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_required_groups_skips_lookup() {
        let dir = FakeDirectory::with_user("alice", "secret", &[]);
        let lookups = Arc::clone(&dir.group_lookups);
        let v = verifier(dir, &[]);
        assert!(v.verify(&Credential::new("alice", "secret")).await.unwrap());
        assert_eq!(lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unreachable_directory_is_error() {
        let dir = FakeDirectory {
            unreachable: true,
            ..FakeDirectory::default()
        };
        let v = verifier(dir, &[]);
        assert!(v.verify(&Credential::new("alice", "secret")).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_connections() {
        let dir = FakeDirectory::with_user("alice", "secret", &[]);
        let closes = Arc::clone(&dir.closes);
        let v = verifier(dir, &[]);
        v.verify(&Credential::new("alice", "secret")).await.unwrap();

        v.shutdown().await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
