//! rustls client config for directory connections whose certificate name
//! differs from the dialed host (e.g. `ldap_host` is an IP address).

use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use rustls::client::{ServerCertVerified, ServerCertVerifier, WebPkiVerifier};
use rustls::{Certificate, ClientConfig, RootCertStore, ServerName};
use tracing::warn;

/// Verifies the chain against the system roots, but checks the certificate
/// name against a fixed `server_name` instead of the connection host.
struct FixedNameVerifier {
    inner: WebPkiVerifier,
    server_name: ServerName,
}

impl ServerCertVerifier for FixedNameVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        intermediates: &[Certificate],
        _server_name: &ServerName,
        scts: &mut dyn Iterator<Item = &[u8]>,
        ocsp_response: &[u8],
        now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.inner.verify_server_cert(
            end_entity,
            intermediates,
            &self.server_name,
            scts,
            ocsp_response,
            now,
        )
    }
}

fn native_roots() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    match rustls_native_certs::load_native_certs() {
        Ok(certs) => {
            let der: Vec<Vec<u8>> = certs.into_iter().map(|cert| cert.0).collect();
            let (_, invalid) = root_store.add_parsable_certificates(&der);
            if invalid > 0 {
                warn!(invalid, "skipped unparsable system root certificates");
            }
        }
        Err(e) => warn!(error = %e, "failed to load system root certificates"),
    }
    root_store
}

/// Client config checking directory certificates against `server_name`.
pub fn client_config(server_name: &str) -> Result<Arc<ClientConfig>> {
    let server_name = ServerName::try_from(server_name)
        .with_context(|| format!("invalid ldap server_name: {server_name}"))?;

    let root_store = native_roots();
    let verifier = FixedNameVerifier {
        inner: WebPkiVerifier::new(root_store.clone(), None),
        server_name,
    };

    let mut config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    config
        .dangerous()
        .set_certificate_verifier(Arc::new(verifier));
    Ok(Arc::new(config))
}
