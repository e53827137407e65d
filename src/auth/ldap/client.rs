//! [`DirectoryConnection`] over `ldap3`.
//!
//! Each operation starts with a bind as the service account, searches for the
//! user entry and then acts on the result.  That keeps a connection usable
//! after a previous user bind changed its identity.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use ldap3::{ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use rustls::ClientConfig;
use tracing::debug;

use crate::config::LdapConfig;

use super::pool::{DirectoryConnection, DirectoryConnector};

/// `invalidCredentials` result code.
const RC_INVALID_CREDENTIALS: u32 = 49;

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

pub struct LdapConnector {
    config: LdapConfig,
    /// Set when TLS is in use and `server_name` overrides the host.
    tls: Option<Arc<ClientConfig>>,
}

impl LdapConnector {
    pub fn new(config: LdapConfig) -> Result<Self> {
        let uses_tls = config.use_ssl || !config.skip_tls;
        let tls = if uses_tls && !config.server_name.is_empty() {
            Some(super::tls::client_config(&config.server_name)?)
        } else {
            None
        };
        Ok(Self { config, tls })
    }

    fn url(&self) -> String {
        let scheme = if self.config.use_ssl { "ldaps" } else { "ldap" };
        format!("{scheme}://{}:{}", self.config.host, self.config.port)
    }
}

#[async_trait::async_trait]
impl DirectoryConnector for LdapConnector {
    type Connection = LdapConnection;

    async fn connect(&self) -> Result<LdapConnection> {
        let mut settings = LdapConnSettings::new()
            .set_conn_timeout(Duration::from_secs(self.config.connect_timeout))
            .set_starttls(!self.config.use_ssl && !self.config.skip_tls);
        if let Some(tls) = &self.tls {
            settings = settings.set_config(Arc::clone(tls));
        }

        let url = self.url();
        let (conn, ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .with_context(|| format!("failed to connect to {url}"))?;
        ldap3::drive!(conn);

        debug!(%url, "directory connection opened");
        Ok(LdapConnection {
            ldap,
            timeout: Duration::from_secs(self.config.timeout),
            config: self.config.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

pub struct LdapConnection {
    ldap: Ldap,
    /// Applied to every bind and search.
    timeout: Duration,
    config: LdapConfig,
}

impl LdapConnection {
    async fn bind_service(&mut self) -> Result<()> {
        self.ldap
            .with_timeout(self.timeout)
            .simple_bind(&self.config.bind_dn, &self.config.bind_password)
            .await
            .context("service bind failed")?
            .success()
            .context("service bind rejected")?;
        Ok(())
    }

    /// DN of the single entry matching the user filter, `None` if absent.
    async fn find_user_dn(&mut self, username: &str) -> Result<Option<String>> {
        let base = search_base(&self.config.user_dn, &self.config.base_dn);
        let filter = render_filter(&self.config.user_filter, username);

        let (entries, _) = self
            .ldap
            .with_timeout(self.timeout)
            .search(&base, Scope::Subtree, &filter, vec!["dn"])
            .await
            .context("user search failed")?
            .success()
            .context("user search rejected")?;

        match entries.len() {
            0 => Ok(None),
            1 => {
                let entry = entries
                    .into_iter()
                    .next()
                    .map(SearchEntry::construct)
                    .context("user search returned no entry")?;
                Ok(Some(entry.dn))
            }
            n => bail!("user filter matched {n} entries for {username}"),
        }
    }
}

#[async_trait::async_trait]
impl DirectoryConnection for LdapConnection {
    async fn authenticate(&mut self, username: &str, password: &str) -> Result<bool> {
        // An empty password would be an unauthenticated bind.
        if password.is_empty() {
            return Ok(false);
        }

        self.bind_service().await?;
        let Some(user_dn) = self.find_user_dn(username).await? else {
            debug!(%username, "user not found in directory");
            return Ok(false);
        };

        let res = self
            .ldap
            .with_timeout(self.timeout)
            .simple_bind(&user_dn, password)
            .await
            .context("user bind failed")?;
        match res.rc {
            0 => Ok(true),
            RC_INVALID_CREDENTIALS => Ok(false),
            _ => {
                res.success().context("user bind rejected")?;
                Ok(false)
            }
        }
    }

    async fn groups_of_user(&mut self, username: &str) -> Result<Vec<String>> {
        self.bind_service().await?;

        let base = search_base(&self.config.group_dn, &self.config.base_dn);
        let filter = render_filter(&self.config.group_filter, username);
        let field = self.config.group_field.as_str();

        let (entries, _) = self
            .ldap
            .with_timeout(self.timeout)
            .search(&base, Scope::Subtree, &filter, vec![field])
            .await
            .context("group search failed")?
            .success()
            .context("group search rejected")?;

        let groups = entries
            .into_iter()
            .map(SearchEntry::construct)
            .filter_map(|mut entry| entry.attrs.remove(field))
            .flatten()
            .collect();
        Ok(groups)
    }

    async fn close(mut self) {
        if let Err(e) = self.ldap.unbind().await {
            debug!(error = %e, "directory unbind failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn search_base(prefix: &str, base_dn: &str) -> String {
    if prefix.is_empty() {
        base_dn.to_string()
    } else {
        format!("{prefix},{base_dn}")
    }
}

/// Substitute every `%s` with the RFC 4515 escaped username.
fn render_filter(template: &str, username: &str) -> String {
    template.replace("%s", &ldap_escape(username))
}
