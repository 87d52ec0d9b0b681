use std::sync::Once;

static INIT: Once = Once::new();

/// rustls 0.23 selects a process-level CryptoProvider.
///
/// A QUIC endpoint plus any other TLS-using dependency can easily pull in
/// both `ring` and `aws-lc-rs`. We pick one up front to avoid runtime panics.
pub fn init_rustls_crypto_provider() {
    INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Build a TLS client config that works across desktop platforms without
/// requiring platform-specific initialization.
///
/// Strategy:
/// - Try OS/native roots via `rustls-native-certs`.
/// - If that yields 0 roots, fall back to `webpki-roots` (Mozilla bundle).
pub fn client_config() -> rustls::ClientConfig {
    init_rustls_crypto_provider();

    let mut roots = rustls::RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    for cert in native.certs {
        // Ignore individual bad certs; we only need a working store.
        let _ = roots.add(cert);
    }

    if roots.is_empty() {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

/// A TLS client config that skips server certificate verification.
///
/// Used only for local development relays (`moq-relay --tls-generate`)
/// whose self-signed certificate has no chain to a trusted root.
pub fn client_config_insecure_no_verify() -> rustls::ClientConfig {
    init_rustls_crypto_provider();

    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(std::sync::Arc::new(NoVerify))
        .with_no_client_auth()
}

#[derive(Debug)]
struct NoVerify;

impl rustls::client::danger::ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
