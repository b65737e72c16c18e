//! TLS upgrade (feature-gated).
//!
//! PostgreSQL TLS is negotiated in-band: the client sends an `SSLRequest`
//! on the plain socket and, if the server answers `'S'`, runs a rustls
//! handshake over that same socket.

use std::net::TcpStream;
use std::sync::Arc;

use micropg_core::Error;
use micropg_core::error::ConnectionErrorKind;

use crate::config::SslMode;

fn tls_error(message: impl Into<String>) -> Error {
    Error::connection(ConnectionErrorKind::Ssl, message)
}

/// Run the TLS handshake over an already-negotiated plain socket.
#[allow(clippy::result_large_err)]
pub(crate) fn upgrade(
    socket: TcpStream,
    host: &str,
    ssl_mode: SslMode,
) -> Result<rustls::StreamOwned<rustls::ClientConnection, TcpStream>, Error> {
    let config = build_client_config(ssl_mode)?;
    let server_name: rustls::pki_types::ServerName<'static> = host
        .to_string()
        .try_into()
        .map_err(|e| tls_error(format!("Invalid server name '{host}': {e}")))?;

    let conn = rustls::ClientConnection::new(Arc::new(config), server_name)
        .map_err(|e| tls_error(format!("Failed to create TLS connection: {e}")))?;

    let mut stream = rustls::StreamOwned::new(conn, socket);
    while stream.conn.is_handshaking() {
        stream
            .conn
            .complete_io(&mut stream.sock)
            .map_err(|e| tls_error(format!("TLS handshake failed: {e}")))?;
    }

    tracing::debug!(host, ?ssl_mode, "TLS handshake complete");
    Ok(stream)
}

/// Build a rustls ClientConfig based on PostgreSQL SSL mode.
///
/// - Prefer/Require: encrypt, do not verify certificates
/// - VerifyFull: verify against the webpki-roots CA bundle
#[allow(clippy::result_large_err)]
fn build_client_config(ssl_mode: SslMode) -> Result<rustls::ClientConfig, Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    match ssl_mode {
        SslMode::Disable => Err(tls_error("TLS config requested with SslMode::Disable")),
        SslMode::Prefer | SslMode::Require => build_no_verify_config(&provider),
        SslMode::VerifyFull => build_webpki_config(&provider),
    }
}

/// Build a ClientConfig that skips certificate verification.
#[allow(clippy::result_large_err)]
fn build_no_verify_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
) -> Result<rustls::ClientConfig, Error> {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error as RustlsError, SignatureScheme};

    #[derive(Debug)]
    struct AcceptAnyCert(Arc<rustls::crypto::CryptoProvider>);

    impl ServerCertVerifier for AcceptAnyCert {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, RustlsError> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, RustlsError> {
            rustls::crypto::verify_tls12_signature(
                message,
                cert,
                dss,
                &self.0.signature_verification_algorithms,
            )
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, RustlsError> {
            rustls::crypto::verify_tls13_signature(
                message,
                cert,
                dss,
                &self.0.signature_verification_algorithms,
            )
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }

    let config = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error(format!("Failed to set TLS versions: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider.clone())))
        .with_no_client_auth();

    Ok(config)
}

/// Build a ClientConfig using webpki-roots CA bundle.
#[allow(clippy::result_large_err)]
fn build_webpki_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
) -> Result<rustls::ClientConfig, Error> {
    use rustls::RootCertStore;

    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error(format!("Failed to set TLS versions: {e}")))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(config)
}
