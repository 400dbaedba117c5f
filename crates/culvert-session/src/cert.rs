//! Self-signed certificate generation for development and testing
//!
//! Lets the relay start without a provisioned certificate pair: an ephemeral
//! certificate valid for localhost is generated at startup. Agents connecting
//! to such a relay must skip verification (`--insecure`).

use rcgen::{CertificateParams, DistinguishedName};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::path::PathBuf;
use std::time::SystemTime;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SelfSignedError {
    #[error("Certificate generation failed: {0}")]
    GenerationFailed(String),

    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),
}

/// Generate a self-signed certificate for development/testing
///
/// Valid for 90 days, for localhost and the loopback addresses. **Not** for
/// production use; deploy a real certificate pair and pass it via
/// `--cert`/`--key` instead.
pub fn generate_self_signed_cert() -> Result<SelfSignedCertificate, SelfSignedError> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(rcgen::DnType::CommonName, "Culvert Development Certificate");
    dn.push(rcgen::DnType::OrganizationName, "Culvert Dev");
    params.distinguished_name = dn;

    // SANs for local development
    params.subject_alt_names = vec![
        rcgen::SanType::DnsName(rcgen::Ia5String::try_from("localhost").unwrap()),
        rcgen::SanType::IpAddress(std::net::IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1))),
        rcgen::SanType::IpAddress(std::net::IpAddr::V6(std::net::Ipv6Addr::new(
            0, 0, 0, 0, 0, 0, 0, 1,
        ))),
    ];

    // Validity: 90 days from now
    let not_before = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap();
    params.not_before = time::OffsetDateTime::from_unix_timestamp(not_before.as_secs() as i64)
        .map_err(|e| SelfSignedError::GenerationFailed(e.to_string()))?;

    let not_after = not_before + std::time::Duration::from_secs(90 * 24 * 60 * 60);
    params.not_after = time::OffsetDateTime::from_unix_timestamp(not_after.as_secs() as i64)
        .map_err(|e| SelfSignedError::GenerationFailed(e.to_string()))?;

    // Random serial number to avoid collisions
    params.serial_number = Some(rcgen::SerialNumber::from(rand::random::<u64>()));

    let key_pair =
        rcgen::KeyPair::generate().map_err(|e| SelfSignedError::GenerationFailed(e.to_string()))?;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| SelfSignedError::GenerationFailed(e.to_string()))?;

    let cert_pem = cert.pem();
    let key_pem = key_pair.serialize_pem();

    let cert_der = cert.der().to_vec();
    let key_der = key_pair.serialize_der();

    Ok(SelfSignedCertificate {
        cert_der: CertificateDer::from(cert_der),
        key_der: PrivateKeyDer::try_from(key_der)
            .map_err(|e| SelfSignedError::KeyGenerationFailed(format!("{:?}", e)))?,
        pem_cert: cert_pem,
        pem_key: key_pem,
    })
}

/// A self-signed certificate with its private key
pub struct SelfSignedCertificate {
    /// Certificate in DER format (binary)
    pub cert_der: CertificateDer<'static>,

    /// Private key in DER format (binary)
    pub key_der: PrivateKeyDer<'static>,

    /// Certificate in PEM format (text)
    pub pem_cert: String,

    /// Private key in PEM format (text)
    pub pem_key: String,
}

impl SelfSignedCertificate {
    /// Save to uniquely named files in the system temp directory
    ///
    /// Returns the (cert, key) paths. Unique names keep parallel test runs
    /// and concurrent relay instances from trampling each other.
    pub fn save_to_temp_files(&self) -> std::io::Result<(PathBuf, PathBuf)> {
        let temp_dir = std::env::temp_dir();
        let unique = format!("{}-{:08x}", std::process::id(), rand::random::<u32>());
        let cert_path = temp_dir.join(format!("culvert-{}.crt", unique));
        let key_path = temp_dir.join(format!("culvert-{}.key", unique));

        std::fs::write(&cert_path, &self.pem_cert)?;
        std::fs::write(&key_path, &self.pem_key)?;

        Ok((cert_path, key_path))
    }
}
