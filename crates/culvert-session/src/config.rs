//! Transport configuration for agent sessions

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cert::generate_self_signed_cert;
use crate::{SessionError, SessionResult};

/// ALPN protocol identifier spoken on every session connection
const ALPN_PROTOCOL: &[u8] = b"culvert-v1";

/// Configuration for session listeners and connectors
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server certificate path (for listeners)
    pub cert_path: Option<PathBuf>,

    /// Server private key path (for listeners)
    pub key_path: Option<PathBuf>,

    /// Whether to verify the server certificate (connectors)
    pub verify_server_cert: bool,

    /// Keep-alive interval
    pub keep_alive_interval: Duration,

    /// Maximum idle timeout; dead peers surface as a closure within this window
    pub max_idle_timeout: Duration,

    /// Maximum number of concurrent bidirectional streams per session
    pub max_concurrent_streams: u64,
}

impl SessionConfig {
    /// Listener configuration with a provisioned certificate pair
    pub fn server(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: Some(cert_path.into()),
            key_path: Some(key_path.into()),
            verify_server_cert: true,
            keep_alive_interval: Duration::from_secs(3),
            max_idle_timeout: Duration::from_secs(10),
            max_concurrent_streams: 1000,
        }
    }

    /// Listener configuration with a freshly generated self-signed certificate
    ///
    /// The certificate is written to uniquely named files in the system temp
    /// directory. Connecting agents must skip verification.
    pub fn server_ephemeral() -> SessionResult<Self> {
        let cert = generate_self_signed_cert()
            .map_err(|e| SessionError::TlsError(format!("Failed to generate cert: {}", e)))?;

        let (cert_path, key_path) = cert.save_to_temp_files().map_err(|e| {
            SessionError::TlsError(format!("Failed to save temp cert files: {}", e))
        })?;

        Ok(Self::server(cert_path, key_path))
    }

    /// Connector configuration verifying against the webpki root set
    pub fn client() -> Self {
        Self {
            cert_path: None,
            key_path: None,
            verify_server_cert: true,
            keep_alive_interval: Duration::from_secs(3),
            max_idle_timeout: Duration::from_secs(10),
            max_concurrent_streams: 1000,
        }
    }

    /// Connector configuration that skips certificate verification
    ///
    /// **INSECURE**: accepts any certificate, including an active
    /// man-in-the-middle's. Only for relays running on self-signed material.
    pub fn client_insecure() -> Self {
        let mut config = Self::client();
        config.verify_server_cert = false;
        config
    }

    /// Set a custom keep-alive interval
    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Set a custom idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.max_idle_timeout = timeout;
        self
    }

    pub fn validate(&self) -> SessionResult<()> {
        if self.keep_alive_interval.as_secs() == 0 {
            return Err(SessionError::ConfigurationError(
                "Keep-alive interval must be > 0".to_string(),
            ));
        }

        if self.max_idle_timeout < self.keep_alive_interval * 2 {
            return Err(SessionError::ConfigurationError(
                "Idle timeout must be at least 2x keep-alive interval".to_string(),
            ));
        }

        Ok(())
    }

    /// Build quinn ClientConfig
    pub(crate) fn build_client_config(&self) -> SessionResult<quinn::ClientConfig> {
        // Use quinn's re-exported rustls
        let mut client_crypto = if self.verify_server_cert {
            let mut roots = quinn::rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

            quinn::rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        } else {
            // INSECURE: Skip certificate verification
            quinn::rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(SkipVerification::new())
                .with_no_client_auth()
        };

        client_crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

        let mut client_config = quinn::ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(client_crypto)
                .map_err(|e| SessionError::TlsError(e.to_string()))?,
        ));

        client_config.transport_config(self.build_transport_config());

        Ok(client_config)
    }

    /// Build quinn ServerConfig
    pub(crate) fn build_server_config(&self) -> SessionResult<quinn::ServerConfig> {
        let cert_path = self.cert_path.as_ref().ok_or_else(|| {
            SessionError::ConfigurationError("Server cert path required".to_string())
        })?;
        let key_path = self.key_path.as_ref().ok_or_else(|| {
            SessionError::ConfigurationError("Server key path required".to_string())
        })?;

        let certs = load_certs(cert_path)?;
        let key = load_private_key(key_path)?;

        let mut server_crypto = quinn::rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| SessionError::TlsError(format!("Invalid cert/key: {}", e)))?;

        server_crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(server_crypto)
                .map_err(|e| SessionError::TlsError(e.to_string()))?,
        ));

        server_config.transport_config(self.build_transport_config());

        Ok(server_config)
    }

    fn build_transport_config(&self) -> Arc<quinn::TransportConfig> {
        let mut transport = quinn::TransportConfig::default();
        transport.keep_alive_interval(Some(self.keep_alive_interval));
        transport.max_idle_timeout(Some(self.max_idle_timeout.try_into().unwrap()));
        transport.max_concurrent_bidi_streams(self.max_concurrent_streams.try_into().unwrap());

        Arc::new(transport)
    }
}

// Helper functions for loading certificates

fn load_certs(path: &Path) -> SessionResult<Vec<quinn::rustls::pki_types::CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        SessionError::TlsError(format!("Failed to open cert file {}: {}", path.display(), e))
    })?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SessionError::TlsError(format!("Failed to parse certs: {}", e)))?;

    if certs.is_empty() {
        return Err(SessionError::TlsError(format!(
            "No certificates found in {}",
            path.display()
        )));
    }

    Ok(certs)
}

fn load_private_key(path: &Path) -> SessionResult<quinn::rustls::pki_types::PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| {
        SessionError::TlsError(format!("Failed to open key file {}: {}", path.display(), e))
    })?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| SessionError::TlsError(format!("Failed to parse key: {}", e)))?
        .ok_or_else(|| SessionError::TlsError(format!("No private key found in {}", path.display())))
}

// Certificate verifier that skips verification (INSECURE - only for development!)
#[derive(Debug)]
struct SkipVerification;

impl SkipVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl quinn::rustls::client::danger::ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &quinn::rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[quinn::rustls::pki_types::CertificateDer<'_>],
        _server_name: &quinn::rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: quinn::rustls::pki_types::UnixTime,
    ) -> Result<quinn::rustls::client::danger::ServerCertVerified, quinn::rustls::Error> {
        Ok(quinn::rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &quinn::rustls::pki_types::CertificateDer<'_>,
        _dss: &quinn::rustls::DigitallySignedStruct,
    ) -> Result<quinn::rustls::client::danger::HandshakeSignatureValid, quinn::rustls::Error> {
        Ok(quinn::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &quinn::rustls::pki_types::CertificateDer<'_>,
        _dss: &quinn::rustls::DigitallySignedStruct,
    ) -> Result<quinn::rustls::client::danger::HandshakeSignatureValid, quinn::rustls::Error> {
        Ok(quinn::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<quinn::rustls::SignatureScheme> {
        use quinn::rustls::SignatureScheme;
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default() {
        let config = SessionConfig::client();
        assert!(config.verify_server_cert);
        assert_eq!(config.keep_alive_interval, Duration::from_secs(3));
        assert_eq!(config.max_idle_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_insecure_client_config() {
        let config = SessionConfig::client_insecure();
        assert!(!config.verify_server_cert);
    }

    #[test]
    fn test_config_validation() {
        let config = SessionConfig::client();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config_validation() {
        let config = SessionConfig::client().with_idle_timeout(Duration::from_secs(1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_server_config_requires_cert_paths() {
        let config = SessionConfig::client();
        assert!(config.build_server_config().is_err());
    }

    #[test]
    fn test_server_config_fails_on_missing_files() {
        let config = SessionConfig::server("/nonexistent/cert.pem", "/nonexistent/key.pem");
        assert!(config.build_server_config().is_err());
    }
}
