//! Trust settings for the TLS connector.

use rustls::pki_types::CertificateDer;
use rustls::pki_types::pem::PemObject;

use crate::error::TlsError;

/// ALPN id a TDS 8.0 strict handshake must offer.
pub const TDS8_ALPN: &[u8] = b"tds/8.0";

/// What the connector trusts and offers.
///
/// With no CA certificates configured the Mozilla root store from
/// `webpki-roots` is used.
#[derive(Clone, Debug, Default)]
pub struct TlsConfig {
    /// Accept any server certificate. Insecure; meant for self-signed
    /// development servers.
    pub skip_verify: bool,
    /// Certificate authorities to trust instead of the Mozilla roots.
    pub ca_certificates: Vec<CertificateDer<'static>>,
    /// Name to verify the certificate against instead of the dialed host.
    pub server_name: Option<String>,
    /// Offer [`TDS8_ALPN`] in the ClientHello.
    pub tds8_alpn: bool,
}

impl TlsConfig {
    /// Verify against the Mozilla roots, no ALPN.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept any server certificate.
    #[must_use]
    pub fn skip_verify(mut self, skip: bool) -> Self {
        self.skip_verify = skip;
        self
    }

    /// Trust one more DER-encoded CA certificate.
    #[must_use]
    pub fn trust(mut self, cert: CertificateDer<'static>) -> Self {
        self.ca_certificates.push(cert);
        self
    }

    /// Trust every certificate in a PEM bundle. A bundle without any
    /// certificate is an error.
    pub fn add_pem_certificates(mut self, pem: &[u8]) -> Result<Self, TlsError> {
        let certs = CertificateDer::pem_slice_iter(pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
        if certs.is_empty() {
            return Err(TlsError::InvalidCertificate(
                "no certificates in PEM input".into(),
            ));
        }
        self.ca_certificates.extend(certs);
        Ok(self)
    }

    /// Verify the certificate against `name`.
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Offer `tds/8.0` over ALPN.
    #[must_use]
    pub fn with_tds8_alpn(mut self) -> Self {
        self.tds8_alpn = true;
        self
    }

    /// ALPN protocols for the ClientHello.
    #[must_use]
    pub fn alpn_protocols(&self) -> Vec<Vec<u8>> {
        if self.tds8_alpn {
            vec![TDS8_ALPN.to_vec()]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_alpn_only_when_asked() {
        assert!(TlsConfig::new().alpn_protocols().is_empty());
        let strict = TlsConfig::new().with_tds8_alpn().with_tds8_alpn();
        assert_eq!(strict.alpn_protocols(), vec![b"tds/8.0".to_vec()]);
    }

    #[test]
    fn test_pem_without_certificates_is_rejected() {
        let err = TlsConfig::new()
            .add_pem_certificates(b"not a certificate")
            .unwrap_err();
        assert!(matches!(err, TlsError::InvalidCertificate(_)));
    }

    #[test]
    fn test_trust_accumulates() {
        let config = TlsConfig::new()
            .trust(CertificateDer::from(vec![0x30, 0x00]))
            .trust(CertificateDer::from(vec![0x30, 0x01]));
        assert_eq!(config.ca_certificates.len(), 2);
    }
}
