//! Cloud link credentials
//!
//! Loads the CA certificate, client certificate and private key from PEM
//! files and checks they parse before any connection is attempted. Missing
//! or unreadable credentials are the one fatal startup condition.

use std::path::Path;

use rumqttc::{TlsConfiguration, Transport};
use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::RootCertStore;

use crate::config::CloudTlsConfig;

/// Error type for credential loading
#[derive(Debug)]
pub enum TlsError {
    /// IO error reading files
    Io(String, std::io::Error),
    /// Certificate parsing error
    CertificateError(String),
    /// Private key error
    PrivateKeyError(String),
}

impl std::fmt::Display for TlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsError::Io(path, e) => write!(f, "IO error reading {}: {}", path, e),
            TlsError::CertificateError(msg) => write!(f, "Certificate error: {}", msg),
            TlsError::PrivateKeyError(msg) => write!(f, "Private key error: {}", msg),
        }
    }
}

impl std::error::Error for TlsError {}

fn read_pem(path: &str) -> Result<Vec<u8>, TlsError> {
    std::fs::read(Path::new(path)).map_err(|e| TlsError::Io(path.to_string(), e))
}

/// Check that a PEM file holds at least one certificate
fn check_certs(path: &str, pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::CertificateError(format!("Failed to parse {}: {}", path, e)))?;

    if certs.is_empty() {
        return Err(TlsError::CertificateError(format!(
            "No certificates found in {}",
            path
        )));
    }

    Ok(certs)
}

/// Check that the CA file holds certificates usable as trust anchors
fn check_ca_certs(path: &str, pem: &[u8]) -> Result<(), TlsError> {
    let mut root_store = RootCertStore::empty();
    for cert in check_certs(path, pem)? {
        root_store.add(cert).map_err(|e| {
            TlsError::CertificateError(format!("Failed to add CA certificate from {}: {}", path, e))
        })?;
    }
    Ok(())
}

fn check_private_key(path: &str, pem: &[u8]) -> Result<(), TlsError> {
    PrivateKeyDer::from_pem_slice(pem)
        .map(|_| ())
        .map_err(|e| TlsError::PrivateKeyError(format!("Failed to parse {}: {}", path, e)))
}

/// PEM material for mutual TLS with the cloud broker
#[derive(Clone)]
pub struct CloudCredentials {
    ca: Vec<u8>,
    client_cert: Vec<u8>,
    client_key: Vec<u8>,
}

impl std::fmt::Debug for CloudCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudCredentials")
            .field("ca", &format_args!("{} bytes", self.ca.len()))
            .field("client_cert", &format_args!("{} bytes", self.client_cert.len()))
            .field("client_key", &"<redacted>")
            .finish()
    }
}

impl CloudCredentials {
    /// Load and check all three PEM files
    pub fn load(config: &CloudTlsConfig) -> Result<Self, TlsError> {
        let ca = read_pem(&config.ca_cert)?;
        check_ca_certs(&config.ca_cert, &ca)?;

        let client_cert = read_pem(&config.client_cert)?;
        check_certs(&config.client_cert, &client_cert)?;

        let client_key = read_pem(&config.client_key)?;
        check_private_key(&config.client_key, &client_key)?;

        Ok(Self {
            ca,
            client_cert,
            client_key,
        })
    }

    /// rumqttc transport for these credentials
    pub fn transport(&self) -> Transport {
        Transport::tls_with_config(TlsConfiguration::Simple {
            ca: self.ca.clone(),
            alpn: None,
            client_auth: Some((self.client_cert.clone(), self.client_key.clone())),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_temp(dir: &tempfile::TempDir, name: &str, content: &str) -> String {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_tls_error_display() {
        let err = TlsError::CertificateError("test error".to_string());
        assert!(err.to_string().contains("Certificate error"));

        let err = TlsError::PrivateKeyError("key error".to_string());
        assert!(err.to_string().contains("Private key error"));
    }

    #[test]
    fn test_missing_ca_file() {
        let config = CloudTlsConfig {
            ca_cert: "/nonexistent/root-CA.crt".to_string(),
            client_cert: "/nonexistent/certificate.pem.crt".to_string(),
            client_key: "/nonexistent/private.pem.key".to_string(),
        };
        let err = CloudCredentials::load(&config).unwrap_err();
        assert!(matches!(err, TlsError::Io(ref path, _) if path.contains("root-CA")));
    }

    #[test]
    fn test_empty_certificate_file() {
        let dir = tempfile::tempdir().unwrap();
        let ca = write_temp(&dir, "root-CA.crt", "");
        let err = check_certs(&ca, b"").unwrap_err();
        assert!(err.to_string().contains("No certificates found"));
    }

    #[test]
    fn test_missing_private_key() {
        let err = check_private_key("private.pem.key", b"not a key").unwrap_err();
        assert!(matches!(err, TlsError::PrivateKeyError(_)));
    }
}
