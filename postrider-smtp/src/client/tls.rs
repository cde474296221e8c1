//! TLS upgrade support for STARTTLS.
//!
//! The courier needs to distinguish three outcomes for a connection:
//! no TLS, TLS with a certificate that validates for the server name,
//! and TLS with one that does not. Failing the handshake on an invalid
//! certificate would collapse the last two, so the verifier here always
//! lets the handshake complete and *records* the WebPKI verdict for the
//! caller to read back afterwards.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio_rustls::{
    TlsConnector,
    rustls::{
        ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
        client::{
            WebPkiServerVerifier,
            danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        },
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};

use super::error::{ClientError, Result};

/// Shared flag the verifier writes its verdict into.
pub(crate) type CertVerdict = Arc<AtomicBool>;

/// Build a TLS connector whose verifier records, rather than enforces,
/// certificate validity.
///
/// The trust store is the system's native roots plus `extra_roots`.
/// Returns the connector and the verdict flag; after a successful
/// handshake the flag holds whether the server certificate validated
/// for the server name.
pub(crate) fn connector(extra_roots: &[CertificateDer<'static>]) -> Result<(TlsConnector, CertVerdict)> {
    let mut root_store = RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    if !native.errors.is_empty() {
        tracing::warn!(?native.errors, "some native certificates could not be loaded");
    }
    let (added, ignored) = root_store.add_parsable_certificates(native.certs);
    tracing::trace!("native trust store: {added} roots added, {ignored} ignored");

    for cert in extra_roots {
        root_store
            .add(cert.clone())
            .map_err(|e| ClientError::Tls(format!("failed to add extra root: {e}")))?;
    }

    // An empty store makes the WebPKI verifier unbuildable; in that case
    // every certificate is recorded as invalid.
    let inner = WebPkiServerVerifier::builder(Arc::new(root_store.clone()))
        .build()
        .ok();

    let verdict: CertVerdict = Arc::new(AtomicBool::new(false));
    let verifier = Arc::new(RecordingVerifier {
        inner,
        valid: Arc::clone(&verdict),
    });

    let mut config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    config.dangerous().set_certificate_verifier(verifier);

    Ok((TlsConnector::from(Arc::new(config)), verdict))
}

/// A certificate verifier that completes every handshake and records
/// whether the certificate would have passed WebPKI validation.
#[derive(Debug)]
struct RecordingVerifier {
    inner: Option<Arc<WebPkiServerVerifier>>,
    valid: Arc<AtomicBool>,
}

impl ServerCertVerifier for RecordingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        let verdict = self.inner.as_ref().map_or_else(
            || Err(tokio_rustls::rustls::Error::NoCertificatesPresented),
            |v| v.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now),
        );

        match verdict {
            Ok(verified) => {
                self.valid.store(true, Ordering::Relaxed);
                Ok(verified)
            }
            Err(err) => {
                tracing::debug!(?server_name, "certificate did not validate: {err}");
                self.valid.store(false, Ordering::Relaxed);
                Ok(ServerCertVerified::assertion())
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        self.inner.as_ref().map_or_else(
            || Ok(HandshakeSignatureValid::assertion()),
            |v| v.verify_tls12_signature(message, cert, dss),
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        self.inner.as_ref().map_or_else(
            || Ok(HandshakeSignatureValid::assertion()),
            |v| v.verify_tls13_signature(message, cert, dss),
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.as_ref().map_or_else(
            || {
                vec![
                    SignatureScheme::RSA_PKCS1_SHA256,
                    SignatureScheme::ECDSA_NISTP256_SHA256,
                    SignatureScheme::ED25519,
                ]
            },
            |v| v.supported_verify_schemes(),
        )
    }
}
