//! TLS client configuration for the NATS connection
//!
//! Certificate material is referenced through mounted secrets and loaded from
//! PEM files into a rustls [`ClientConfig`].

use crate::config::{SecretKeySelector, TlsConfig};
use crate::error::{NatsError, Result};
use crate::secrets::SecretReader;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{self, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Build a rustls client config from the TLS settings
///
/// Both `clientCertSecret` and `clientKeySecret` must be set for client
/// authentication, otherwise the settings are rejected. Without a CA secret
/// the Mozilla root set is trusted.
pub fn client_config(config: &TlsConfig, secrets: &dyn SecretReader) -> Result<ClientConfig> {
    config.validate()?;

    let resolve = |selector: &Option<SecretKeySelector>| -> Result<Option<PathBuf>> {
        selector
            .as_ref()
            .map(|s| secrets.secret_path(s))
            .transpose()
    };
    let ca_path = resolve(&config.ca_cert_secret)?;
    let cert_path = resolve(&config.cert_secret)?;
    let key_path = resolve(&config.key_secret)?;

    let roots = match &ca_path {
        Some(path) => load_root_store(path)?,
        None => RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        },
    };

    let provider = Arc::new(crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| NatsError::Tls(format!("unsupported TLS protocol versions: {}", e)))?;

    let builder = if config.insecure_skip_verify {
        tracing::warn!("TLS server certificate verification is disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification { provider }))
    } else {
        builder.with_root_certificates(roots)
    };

    let tls = match (cert_path, key_path) {
        (Some(cert_path), Some(key_path)) => {
            let certs = load_certs(&cert_path)?;
            let key = load_private_key(&key_path)?;
            tracing::debug!(
                cert_path = %cert_path.display(),
                cert_count = certs.len(),
                "Loaded client certificate"
            );
            builder.with_client_auth_cert(certs, key).map_err(|e| {
                NatsError::Tls(format!(
                    "failed to load client cert key pair ({}, {}): {}",
                    cert_path.display(),
                    key_path.display(),
                    e
                ))
            })?
        }
        _ => builder.with_no_client_auth(),
    };

    Ok(tls)
}

fn load_root_store(path: &Path) -> Result<RootCertStore> {
    let certs = load_certs(path)?;
    let mut store = RootCertStore::empty();
    for cert in certs {
        store.add(cert).map_err(|e| {
            NatsError::Tls(format!(
                "failed to add CA certificate from {}: {}",
                path.display(),
                e
            ))
        })?;
    }
    tracing::debug!(ca_cert_path = %path.display(), "Loaded CA certificates");
    Ok(store)
}

/// Load certificates from a PEM file
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|source| NatsError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            NatsError::Tls(format!(
                "failed to parse certificates from {}: {}",
                path.display(),
                e
            ))
        })?;

    if certs.is_empty() {
        return Err(NatsError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }

    Ok(certs)
}

/// Load a private key from a PEM file
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|source| NatsError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| {
            NatsError::Tls(format!(
                "failed to parse private key from {}: {}",
                path.display(),
                e
            ))
        })?
        .ok_or_else(|| NatsError::Tls(format!("no private key found in {}", path.display())))
}

/// Accepts any server certificate; handshake signatures are still checked
#[derive(Debug)]
struct SkipServerVerification {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::VolumeSecretReader;
    use tempfile::TempDir;

    /// Secret volume with a self-signed certificate mounted as `tls/{ca.crt,tls.crt,tls.key}`
    fn secret_volume() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let tls_dir = dir.path().join("tls");
        std::fs::create_dir_all(&tls_dir).unwrap();

        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
        let cert_pem = cert.serialize_pem().unwrap();
        std::fs::write(tls_dir.join("ca.crt"), &cert_pem).unwrap();
        std::fs::write(tls_dir.join("tls.crt"), &cert_pem).unwrap();
        std::fs::write(tls_dir.join("tls.key"), cert.serialize_private_key_pem()).unwrap();
        std::fs::write(tls_dir.join("garbage"), "not a pem document\n").unwrap();
        dir
    }

    fn selector(key: &str) -> Option<SecretKeySelector> {
        Some(SecretKeySelector::new("tls", key))
    }

    #[test]
    fn test_client_config_with_ca_and_client_cert() {
        let dir = secret_volume();
        let reader = VolumeSecretReader::new(dir.path());
        let config = TlsConfig {
            insecure_skip_verify: false,
            ca_cert_secret: selector("ca.crt"),
            cert_secret: selector("tls.crt"),
            key_secret: selector("tls.key"),
        };

        let tls = client_config(&config, &reader).unwrap();
        assert!(tls.client_auth_cert_resolver.has_certs());
    }

    #[test]
    fn test_client_config_insecure_without_material() {
        let reader = VolumeSecretReader::new("/nonexistent");
        let config = TlsConfig {
            insecure_skip_verify: true,
            ..Default::default()
        };
        let tls = client_config(&config, &reader).unwrap();
        assert!(!tls.client_auth_cert_resolver.has_certs());
    }

    #[test]
    fn test_client_config_default_roots() {
        let reader = VolumeSecretReader::new("/nonexistent");
        assert!(client_config(&TlsConfig::default(), &reader).is_ok());
    }

    #[test]
    fn test_cert_without_key_rejected() {
        let dir = secret_volume();
        let reader = VolumeSecretReader::new(dir.path());
        let config = TlsConfig {
            cert_secret: selector("tls.crt"),
            ..Default::default()
        };
        assert!(matches!(
            client_config(&config, &reader),
            Err(NatsError::Config(_))
        ));

        let config = TlsConfig {
            key_secret: selector("tls.key"),
            ..Default::default()
        };
        assert!(matches!(
            client_config(&config, &reader),
            Err(NatsError::Config(_))
        ));
    }

    #[test]
    fn test_missing_ca_file() {
        let dir = secret_volume();
        let reader = VolumeSecretReader::new(dir.path());
        let config = TlsConfig {
            ca_cert_secret: selector("absent.crt"),
            ..Default::default()
        };
        assert!(matches!(
            client_config(&config, &reader),
            Err(NatsError::Io { .. })
        ));
    }

    #[test]
    fn test_malformed_material() {
        let dir = secret_volume();
        let reader = VolumeSecretReader::new(dir.path());

        let config = TlsConfig {
            ca_cert_secret: selector("garbage"),
            ..Default::default()
        };
        assert!(matches!(
            client_config(&config, &reader),
            Err(NatsError::Tls(_))
        ));

        let config = TlsConfig {
            cert_secret: selector("tls.crt"),
            key_secret: selector("garbage"),
            ..Default::default()
        };
        assert!(matches!(
            client_config(&config, &reader),
            Err(NatsError::Tls(_))
        ));
    }
}
