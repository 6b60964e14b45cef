//! rustls connectors for the source and target pools.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{self, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, warn};

use crate::error::{MigrateError, Result};

/// libpq `sslmode` subset. `allow` and `prefer` need a plaintext fallback
/// that tokio-postgres does not offer, so they are not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    #[default]
    Disable,
    /// Encrypted, certificate not checked.
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    const NAMES: [(&'static str, SslMode); 4] = [
        ("disable", SslMode::Disable),
        ("require", SslMode::Require),
        ("verify-ca", SslMode::VerifyCa),
        ("verify-full", SslMode::VerifyFull),
    ];

    /// Case-insensitive; an empty value means `disable`.
    pub fn parse(s: &str) -> Result<Self> {
        let wanted = s.trim();
        if wanted.is_empty() {
            return Ok(SslMode::Disable);
        }
        Self::NAMES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
            .map(|(_, mode)| *mode)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::NAMES.iter().map(|(name, _)| *name).collect();
                MigrateError::Config(format!(
                    "ssl_mode {:?} is not supported (expected one of {})",
                    wanted,
                    known.join(", ")
                ))
            })
    }

    pub fn requires_tls(&self) -> bool {
        !matches!(self, SslMode::Disable)
    }
}

/// Produces the `MakeTlsConnect` handed to the pool manager.
pub struct TlsBuilder {
    ssl_mode: SslMode,
}

impl TlsBuilder {
    pub fn new(ssl_mode: SslMode) -> Self {
        Self { ssl_mode }
    }

    /// `None` for `disable`.
    pub fn build(&self) -> Result<Option<MakeRustlsConnect>> {
        if !self.ssl_mode.requires_tls() {
            return Ok(None);
        }
        let builder =
            ClientConfig::builder_with_provider(Arc::new(crypto::aws_lc_rs::default_provider()))
                .with_safe_default_protocol_versions()
                .map_err(|e| MigrateError::Config(format!("TLS setup failed: {}", e)))?;
        let config = if self.ssl_mode == SslMode::Require {
            warn!("ssl_mode=require: server certificate is NOT verified");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(EncryptOnly::new()))
                .with_no_client_auth()
        } else {
            // rustls has no chain-only mode; verify-ca also checks the host name.
            debug!(mode = ?self.ssl_mode, "verifying server certificate against webpki roots");
            let roots = RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            };
            builder.with_root_certificates(roots).with_no_client_auth()
        };
        Ok(Some(MakeRustlsConnect::new(config)))
    }
}

/// Skips certificate trust but still checks handshake signatures, so the
/// session is bound to whatever key the server presented.
#[derive(Debug)]
struct EncryptOnly {
    algorithms: WebPkiSupportedAlgorithms,
}

impl EncryptOnly {
    fn new() -> Self {
        Self {
            algorithms: crypto::aws_lc_rs::default_provider().signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for EncryptOnly {
    fn verify_server_cert(
        &self,
        _: &CertificateDer<'_>,
        _: &[CertificateDer<'_>],
        _: &ServerName<'_>,
        _: &[u8],
        _: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_libpq_spellings() {
        assert_eq!(SslMode::parse("Verify-Full").unwrap(), SslMode::VerifyFull);
        assert_eq!(SslMode::parse("  require\n").unwrap(), SslMode::Require);
        assert_eq!(SslMode::parse("verify-ca").unwrap(), SslMode::VerifyCa);
        assert_eq!(SslMode::parse("").unwrap(), SslMode::Disable);
    }

    #[test]
    fn test_parse_rejects_fallback_modes() {
        for mode in ["prefer", "allow", "verify_full"] {
            let err = SslMode::parse(mode).unwrap_err().to_string();
            assert!(err.contains("not supported"), "{}", err);
        }
    }

    #[test]
    fn test_connector_only_when_encrypting() {
        assert!(TlsBuilder::new(SslMode::default()).build().unwrap().is_none());
        assert!(TlsBuilder::new(SslMode::Require).build().unwrap().is_some());
        assert!(TlsBuilder::new(SslMode::VerifyFull).build().unwrap().is_some());
    }

    #[test]
    fn test_encrypt_only_advertises_provider_schemes() {
        assert!(!EncryptOnly::new().supported_verify_schemes().is_empty());
    }
}
