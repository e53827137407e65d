use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Selectors
// ---------------------------------------------------------------------------

/// Front-end protocol used to collect credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// `Authorization: Basic` challenge/response.
    Basic,
    /// HTML login form with an encrypted session cookie.
    Html,
}

/// Credential verification backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifierKind {
    /// Flat `username:password` file.
    File,
    /// LDAP bind plus group lookup.
    Ldap,
    /// Atlassian Crowd REST API.
    Crowd,
    /// Remote auth service that also evaluates required groups.
    Auth,
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Socket address for the proxy listener.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Optional socket address serving `/metrics`.
    #[serde(default)]
    pub metrics_listen: Option<String>,
    /// `host:port` of the protected upstream.
    pub target_address: String,
    /// If set, health checks GET this URL instead of dialing `target_address`.
    #[serde(default)]
    pub target_healthz_url: Option<String>,
    /// Connect timeout (seconds) toward the upstream.
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout: u64,
    pub kind: Kind,
    pub verifier: VerifierKind,
    /// Realm announced in `WWW-Authenticate` (`kind: basic`).
    #[serde(default)]
    pub basic_auth_realm: String,
    /// AES key protecting session cookies (`kind: html`).
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub required_groups: GroupList,
    /// Positive verification cache TTL in seconds.  Zero means the default.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,
    #[serde(default)]
    pub file: FileConfig,
    #[serde(default)]
    pub ldap: LdapConfig,
    #[serde(default)]
    pub crowd: CrowdConfig,
    #[serde(default)]
    pub auth: AuthServiceConfig,
}

/// `required_groups` accepts a list or a comma separated string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum GroupList {
    Csv(String),
    List(Vec<String>),
}

impl Default for GroupList {
    fn default() -> Self {
        GroupList::List(Vec::new())
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_upstream_timeout() -> u64 {
    30
}

fn default_cache_ttl() -> u64 {
    300
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    /// Path of the `username:password` file.
    #[serde(default)]
    pub users: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LdapConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_ldap_port")]
    pub port: u16,
    /// Connect via `ldaps://`.
    #[serde(default)]
    pub use_ssl: bool,
    /// Do not upgrade plain connections with StartTLS.
    #[serde(default)]
    pub skip_tls: bool,
    #[serde(default)]
    pub bind_dn: String,
    #[serde(default)]
    pub bind_password: String,
    #[serde(default)]
    pub base_dn: String,
    /// Prefix prepended to `base_dn` for user searches (e.g. `ou=people`).
    #[serde(default)]
    pub user_dn: String,
    /// Search filter; `%s` is replaced by the escaped username.
    #[serde(default)]
    pub user_filter: String,
    /// Prefix prepended to `base_dn` for group searches.
    #[serde(default)]
    pub group_dn: String,
    /// Search filter; `%s` is replaced by the escaped username.
    #[serde(default)]
    pub group_filter: String,
    /// Attribute holding the group name.
    #[serde(default = "default_group_field")]
    pub group_field: String,
    /// Connect timeout in seconds.
    #[serde(default = "default_ldap_connect_timeout")]
    pub connect_timeout: u64,
    /// Per-operation (bind, search) timeout in seconds.
    #[serde(default = "default_ldap_timeout")]
    pub timeout: u64,
    /// Name the server certificate is checked against, when `host` is an
    /// address or an alias.
    #[serde(default)]
    pub server_name: String,
}

impl Default for LdapConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_ldap_port(),
            use_ssl: false,
            skip_tls: false,
            bind_dn: String::new(),
            bind_password: String::new(),
            base_dn: String::new(),
            user_dn: String::new(),
            user_filter: String::new(),
            group_dn: String::new(),
            group_filter: String::new(),
            group_field: default_group_field(),
            connect_timeout: default_ldap_connect_timeout(),
            timeout: default_ldap_timeout(),
            server_name: String::new(),
        }
    }
}

fn default_ldap_port() -> u16 {
    389
}

fn default_group_field() -> String {
    "cn".to_string()
}

fn default_ldap_connect_timeout() -> u64 {
    10
}

fn default_ldap_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrowdConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub app_password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthServiceConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub application_name: String,
    #[serde(default)]
    pub application_password: String,
}

// ---------------------------------------------------------------------------
// Flat layout
// ---------------------------------------------------------------------------

/// Single-level `kebab-case` layout used by older deployments
/// (`target-address`, `file-users`, `ldap-host`, ...).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
struct FlatConfig {
    port: Option<u16>,
    /// Nanoseconds.
    cache_ttl: u64,
    target_address: String,
    target_healthz_url: Option<String>,
    basic_auth_realm: String,
    secret: String,
    required_groups: Vec<String>,
    verifier: Option<VerifierKind>,
    file_users: String,
    kind: Option<Kind>,
    ldap_host: String,
    #[serde(rename = "ldap-servername")]
    ldap_server_name: String,
    ldap_port: Option<u16>,
    ldap_use_ssl: bool,
    ldap_skip_tls: bool,
    ldap_bind_dn: String,
    ldap_bind_password: String,
    ldap_base_dn: String,
    ldap_user_dn: String,
    ldap_group_dn: String,
    ldap_user_filter: String,
    ldap_group_filter: String,
    ldap_group_field: String,
    crowd_url: String,
    crowd_app_name: String,
    crowd_app_password: String,
}

const NANOS_PER_SEC: u64 = 1_000_000_000;

impl TryFrom<FlatConfig> for Config {
    type Error = anyhow::Error;

    fn try_from(flat: FlatConfig) -> Result<Self> {
        let kind = flat.kind.context("kind missing")?;
        let verifier = flat.verifier.context("verifier missing")?;

        // Whole seconds, rounded up; zero keeps the default.
        let cache_ttl = match flat.cache_ttl {
            0 => default_cache_ttl(),
            nanos => nanos.div_ceil(NANOS_PER_SEC),
        };

        let group_field = if flat.ldap_group_field.is_empty() {
            default_group_field()
        } else {
            flat.ldap_group_field
        };

        Ok(Config {
            listen: format!("0.0.0.0:{}", flat.port.unwrap_or(8080)),
            metrics_listen: None,
            target_address: flat.target_address,
            target_healthz_url: flat.target_healthz_url.filter(|url| !url.is_empty()),
            upstream_timeout: default_upstream_timeout(),
            kind,
            verifier,
            basic_auth_realm: flat.basic_auth_realm,
            secret: flat.secret,
            required_groups: GroupList::List(flat.required_groups),
            cache_ttl,
            file: FileConfig {
                users: flat.file_users,
            },
            ldap: LdapConfig {
                host: flat.ldap_host,
                port: flat.ldap_port.unwrap_or_else(default_ldap_port),
                use_ssl: flat.ldap_use_ssl,
                skip_tls: flat.ldap_skip_tls,
                bind_dn: flat.ldap_bind_dn,
                bind_password: flat.ldap_bind_password,
                base_dn: flat.ldap_base_dn,
                user_dn: flat.ldap_user_dn,
                user_filter: flat.ldap_user_filter,
                group_dn: flat.ldap_group_dn,
                group_filter: flat.ldap_group_filter,
                group_field,
                server_name: flat.ldap_server_name,
                ..LdapConfig::default()
            },
            crowd: CrowdConfig {
                url: flat.crowd_url,
                app_name: flat.crowd_app_name,
                app_password: flat.crowd_app_password,
            },
            auth: AuthServiceConfig::default(),
        })
    }
}

/// A document is in the flat layout when any top-level key is kebab-case.
fn is_flat_layout(value: &serde_yaml::Value) -> bool {
    value.as_mapping().is_some_and(|mapping| {
        mapping
            .keys()
            .any(|key| key.as_str().is_some_and(|key| key.contains('-')))
    })
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML (or JSON) file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    parse_config(&contents)
        .with_context(|| format!("failed to load config file: {}", path.display()))
}

/// Parse the nested layout, or the flat `kebab-case` one.
pub fn parse_config(contents: &str) -> Result<Config> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(contents).context("failed to parse config")?;
    let config: Config = if is_flat_layout(&value) {
        let flat: FlatConfig =
            serde_yaml::from_value(value).context("failed to parse config")?;
        flat.try_into()?
    } else {
        serde_yaml::from_value(value).context("failed to parse config")?
    };
    validate_config(&config)?;
    Ok(config)
}

/// Checks serde cannot express: per-kind and per-backend required fields.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(!config.target_address.is_empty(), "target_address missing");

    match config.kind {
        Kind::Basic => {
            anyhow::ensure!(
                !config.basic_auth_realm.is_empty(),
                "basic_auth_realm missing"
            );
        }
        Kind::Html => {
            anyhow::ensure!(!config.secret.is_empty(), "secret missing");
            anyhow::ensure!(
                config.secret.len() % 16 == 0,
                "secret length must be a multiple of 16"
            );
            anyhow::ensure!(
                matches!(config.secret.len(), 16 | 32),
                "secret must be 16 or 32 bytes"
            );
        }
    }

    match config.verifier {
        VerifierKind::File => {
            anyhow::ensure!(!config.file.users.is_empty(), "file.users missing");
        }
        VerifierKind::Ldap => {
            let ldap = &config.ldap;
            anyhow::ensure!(!ldap.host.is_empty(), "ldap.host missing");
            anyhow::ensure!(ldap.port != 0, "ldap.port missing");
            anyhow::ensure!(!ldap.bind_dn.is_empty(), "ldap.bind_dn missing");
            anyhow::ensure!(!ldap.bind_password.is_empty(), "ldap.bind_password missing");
            anyhow::ensure!(!ldap.base_dn.is_empty(), "ldap.base_dn missing");
            anyhow::ensure!(!ldap.user_filter.is_empty(), "ldap.user_filter missing");
            anyhow::ensure!(!ldap.group_filter.is_empty(), "ldap.group_filter missing");
        }
        VerifierKind::Crowd => {
            let crowd = &config.crowd;
            anyhow::ensure!(!crowd.url.is_empty(), "crowd.url missing");
            anyhow::ensure!(!crowd.app_name.is_empty(), "crowd.app_name missing");
            anyhow::ensure!(!crowd.app_password.is_empty(), "crowd.app_password missing");
        }
        VerifierKind::Auth => {
            let auth = &config.auth;
            anyhow::ensure!(!auth.url.is_empty(), "auth.url missing");
            anyhow::ensure!(
                !auth.application_name.is_empty(),
                "auth.application_name missing"
            );
            anyhow::ensure!(
                !auth.application_password.is_empty(),
                "auth.application_password missing"
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC_FILE: &str = r#"
target_address: "127.0.0.1:9000"
kind: basic
verifier: file
basic_auth_realm: "Protected"
file:
  users: /etc/users
"#;

    #[test]
    fn test_parse_basic_file_config() {
        let config = parse_config(BASIC_FILE).unwrap();
        assert_eq!(config.kind, Kind::Basic);
        assert_eq!(config.verifier, VerifierKind::File);
        assert_eq!(config.listen, "0.0.0.0:8080");
        assert_eq!(config.cache_ttl, 300);
        assert_eq!(config.upstream_timeout, 30);
        assert_eq!(config.file.users, "/etc/users");
        assert_eq!(config.required_groups, GroupList::default());
        assert!(config.metrics_listen.is_none());
    }

    #[test]
    fn test_parse_json_config() {
        let json = r#"{
            "target_address": "upstream:80",
            "kind": "html",
            "verifier": "ldap",
            "secret": "AES256Key-32Characters1234567890",
            "required_groups": ["admins", "ops"],
            "ldap": {
                "host": "ldap.local",
                "bind_dn": "cn=proxy,dc=example,dc=com",
                "bind_password": "pw",
                "base_dn": "dc=example,dc=com",
                "user_filter": "(uid=%s)",
                "group_filter": "(memberUid=%s)"
            }
        }"#;
        let config = parse_config(json).unwrap();
        assert_eq!(config.kind, Kind::Html);
        assert_eq!(config.ldap.port, 389);
        assert_eq!(config.ldap.group_field, "cn");
        assert_eq!(
            config.required_groups,
            GroupList::List(vec!["admins".to_string(), "ops".to_string()])
        );
    }

    #[test]
    fn test_parse_flat_file_config() {
        let json = r#"{"target-address":"127.0.0.1:9000","basic-auth-realm":"Protected","verifier":"file","file-users":"/etc/users","kind":"basic"}"#;
        let config = parse_config(json).unwrap();
        assert_eq!(config.kind, Kind::Basic);
        assert_eq!(config.verifier, VerifierKind::File);
        assert_eq!(config.target_address, "127.0.0.1:9000");
        assert_eq!(config.basic_auth_realm, "Protected");
        assert_eq!(config.file.users, "/etc/users");
        assert_eq!(config.listen, "0.0.0.0:8080");
        assert_eq!(config.cache_ttl, 300);
        assert!(config.target_healthz_url.is_none());
    }

    #[test]
    fn test_parse_flat_ldap_config() {
        let json = r#"{
            "port": 9090,
            "cache-ttl": 60000000000,
            "target-address": "upstream:80",
            "target-healthz-url": "http://upstream/healthz",
            "kind": "html",
            "verifier": "ldap",
            "secret": "AES256Key-32Characters1234567890",
            "required-groups": ["admins", "ops"],
            "ldap-host": "10.0.0.5",
            "ldap-servername": "ldap.example.com",
            "ldap-port": 636,
            "ldap-use-ssl": true,
            "ldap-bind-dn": "cn=proxy,dc=example,dc=com",
            "ldap-bind-password": "pw",
            "ldap-base-dn": "dc=example,dc=com",
            "ldap-user-dn": "ou=people",
            "ldap-user-filter": "(uid=%s)",
            "ldap-group-filter": "(member=%s)"
        }"#;
        let config = parse_config(json).unwrap();
        assert_eq!(config.listen, "0.0.0.0:9090");
        assert_eq!(config.cache_ttl, 60);
        assert_eq!(
            config.target_healthz_url.as_deref(),
            Some("http://upstream/healthz")
        );
        assert_eq!(
            config.required_groups,
            GroupList::List(vec!["admins".to_string(), "ops".to_string()])
        );
        assert_eq!(config.ldap.host, "10.0.0.5");
        assert_eq!(config.ldap.server_name, "ldap.example.com");
        assert_eq!(config.ldap.port, 636);
        assert!(config.ldap.use_ssl);
        assert_eq!(config.ldap.user_dn, "ou=people");
        assert_eq!(config.ldap.group_field, "cn");
        assert_eq!(config.ldap.timeout, 10);
    }

    #[test]
    fn test_flat_sub_second_ttl_rounds_up() {
        let json = r#"{"target-address":"t:1","basic-auth-realm":"r","verifier":"file","file-users":"/u","kind":"basic","cache-ttl":1500000000}"#;
        assert_eq!(parse_config(json).unwrap().cache_ttl, 2);
    }

    #[test]
    fn test_flat_requires_kind() {
        let json = r#"{"target-address":"t:1","basic-auth-realm":"r","verifier":"file","file-users":"/u"}"#;
        let err = parse_config(json).unwrap_err();
        assert!(format!("{err:#}").contains("kind missing"));
    }

    #[test]
    fn test_flat_validation_still_applies() {
        let json = r#"{"target-address":"t:1","verifier":"file","file-users":"/u","kind":"basic"}"#;
        let err = parse_config(json).unwrap_err();
        assert!(format!("{err:#}").contains("basic_auth_realm"));
    }

    #[test]
    fn test_required_groups_csv() {
        let yaml = format!("{BASIC_FILE}required_groups: \"admins,ops\"\n");
        let config = parse_config(&yaml).unwrap();
        assert_eq!(config.required_groups, GroupList::Csv("admins,ops".to_string()));
    }

    #[test]
    fn test_basic_requires_realm() {
        let yaml = BASIC_FILE.replace("basic_auth_realm: \"Protected\"", "");
        let err = parse_config(&yaml).unwrap_err();
        assert!(format!("{err:#}").contains("basic_auth_realm"));
    }

    #[test]
    fn test_html_secret_length() {
        let yaml = r#"
target_address: "127.0.0.1:9000"
kind: html
verifier: file
secret: "tooshort"
file:
  users: /etc/users
"#;
        let err = parse_config(yaml).unwrap_err();
        assert!(format!("{err:#}").contains("multiple of 16"));
    }

    #[test]
    fn test_file_requires_users() {
        let yaml = BASIC_FILE.replace("  users: /etc/users", "  users: \"\"");
        assert!(parse_config(&yaml).is_err());
    }

    #[test]
    fn test_crowd_requires_fields() {
        let yaml = r#"
target_address: "127.0.0.1:9000"
kind: basic
verifier: crowd
basic_auth_realm: r
crowd:
  url: https://crowd.local
"#;
        let err = parse_config(yaml).unwrap_err();
        assert!(format!("{err:#}").contains("crowd.app_name"));
    }

    #[test]
    fn test_unknown_verifier_rejected() {
        let yaml = BASIC_FILE.replace("verifier: file", "verifier: kerberos");
        assert!(parse_config(&yaml).is_err());
    }

    #[test]
    fn test_missing_target_rejected() {
        let yaml = BASIC_FILE.replace("\"127.0.0.1:9000\"", "\"\"");
        assert!(parse_config(&yaml).is_err());
    }
}
