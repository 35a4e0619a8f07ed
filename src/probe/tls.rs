//! TLS connector for probing. Certificate validation is disabled on purpose:
//! the goal is to fingerprint whatever is listening, not to trust it. Do not
//! reuse this connector for anything that carries real traffic.

use std::sync::{Arc, OnceLock};

use tokio_rustls::rustls::client::{ServerCertVerified, ServerCertVerifier};
use tokio_rustls::rustls::{Certificate, ClientConfig, Error as TlsError, RootCertStore, ServerName};
use tokio_rustls::TlsConnector;

struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }
}

pub fn connector() -> TlsConnector {
    static CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();
    let config = CONFIG.get_or_init(|| {
        let mut config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(RootCertStore::empty())
            .with_no_client_auth();
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(AcceptAnyCert));
        Arc::new(config)
    });
    TlsConnector::from(config.clone())
}

/// SNI value for a target; IP literals become `ServerName::IpAddress`.
pub fn server_name(host: &str) -> Option<ServerName> {
    ServerName::try_from(host).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_name_accepts_hostnames_and_ips() {
        assert!(server_name("example.com").is_some());
        assert!(server_name("192.0.2.7").is_some());
    }
}
