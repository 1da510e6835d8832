//! rustls plumbing for the client upgrade and the server acceptor
use futures_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use futures_rustls::rustls::pki_types::{
    CertificateDer, PrivateKeyDer, ServerName, UnixTime,
};
use futures_rustls::rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use futures_rustls::{TlsAcceptor, TlsConnector};
use myrepl_core::error::{Error, Result};
use serde_derive::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::sync::Arc;

/// TLS configuration of the client side
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsOpts {
    /// PEM bundle with the trust anchor(s)
    pub ca_pem: Option<String>,
    /// PEM client certificate chain and key
    pub cert_pem: Option<String>,
    pub key_pem: Option<String>,
    /// name used for SNI and verification, defaults to the host
    pub server_name: Option<String>,
    /// trust any certificate, for test setups only
    pub skip_verify: bool,
}

fn tls_err<E: std::fmt::Display>(e: E) -> Error {
    Error::Tls(e.to_string())
}

fn parse_certs(pem: &str) -> Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(tls_err)
}

fn parse_key(pem: &str) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut pem.as_bytes())
        .map_err(tls_err)?
        .ok_or_else(|| Error::Tls("no private key in pem".to_owned()))
}

pub(crate) fn client_connector(opts: &TlsOpts) -> Result<TlsConnector> {
    let builder = ClientConfig::builder();
    let config = if opts.skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        if let Some(ca) = &opts.ca_pem {
            for cert in parse_certs(ca)? {
                roots.add(cert).map_err(tls_err)?;
            }
        }
        let builder = builder.with_root_certificates(roots);
        match (&opts.cert_pem, &opts.key_pem) {
            (Some(cert), Some(key)) => builder
                .with_client_auth_cert(parse_certs(cert)?, parse_key(key)?)
                .map_err(tls_err)?,
            _ => builder.with_no_client_auth(),
        }
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

/// server acceptor, generating an ephemeral self-signed identity
/// when no certificate is configured
pub(crate) fn server_acceptor(
    cert_pem: Option<&str>,
    key_pem: Option<&str>,
) -> Result<TlsAcceptor> {
    let (certs, key) = match (cert_pem, key_pem) {
        (Some(cert), Some(key)) => (parse_certs(cert)?, parse_key(key)?),
        _ => {
            let generated =
                rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).map_err(tls_err)?;
            let cert = generated.cert.der().clone();
            let key = PrivateKeyDer::try_from(generated.key_pair.serialize_der())
                .map_err(tls_err)?;
            (vec![cert], key)
        }
    };
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(tls_err)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

pub(crate) fn server_name(opts: &TlsOpts, host: &str) -> Result<ServerName<'static>> {
    let name = opts.server_name.clone().unwrap_or_else(|| host.to_owned());
    ServerName::try_from(name).map_err(tls_err)
}

/// accepts every certificate, only reachable through skip_verify
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, futures_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, futures_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, futures_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ephemeral_server_acceptor() {
        assert!(server_acceptor(None, None).is_ok());
    }

    #[test]
    fn test_skip_verify_connector() {
        let opts = TlsOpts {
            skip_verify: true,
            ..TlsOpts::default()
        };
        assert!(client_connector(&opts).is_ok());
    }

    #[test]
    fn test_server_name_fallback() {
        let opts = TlsOpts::default();
        assert!(server_name(&opts, "db.example.com").is_ok());
    }
}
