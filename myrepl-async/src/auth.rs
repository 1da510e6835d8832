//! client side auth plugin handling
use myrepl_core::error::{Error, Result};
use myrepl_core::scramble::{scramble_native, scramble_sha256, xor_rotating};
use rand::rngs::OsRng;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};

/// the auth plugins this client can answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPlugin {
    NativePassword,
    CachingSha2,
    Sha256,
}

impl AuthPlugin {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            // an empty name means a pre-plugin server, native applies
            "" | "mysql_native_password" => Ok(AuthPlugin::NativePassword),
            "caching_sha2_password" => Ok(AuthPlugin::CachingSha2),
            "sha256_password" => Ok(AuthPlugin::Sha256),
            other => Err(Error::UnsupportedAuthPlugin(other.to_owned())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AuthPlugin::NativePassword => "mysql_native_password",
            AuthPlugin::CachingSha2 => "caching_sha2_password",
            AuthPlugin::Sha256 => "sha256_password",
        }
    }

    /// the auth response placed in the handshake reply, or sent after
    /// an auth switch request
    pub fn initial_response(self, password: &str, seed: &[u8], tls: bool) -> Vec<u8> {
        match self {
            AuthPlugin::NativePassword => scramble_native(seed, password.as_bytes())
                .map(|r| r.to_vec())
                .unwrap_or_default(),
            AuthPlugin::CachingSha2 => scramble_sha256(seed, password.as_bytes())
                .map(|r| r.to_vec())
                .unwrap_or_default(),
            AuthPlugin::Sha256 => {
                if password.is_empty() {
                    Vec::new()
                } else if tls {
                    // cleartext over the encrypted channel
                    let mut out = password.as_bytes().to_vec();
                    out.push(0);
                    out
                } else {
                    // ask for the server's RSA public key
                    vec![0x01]
                }
            }
        }
    }

    /// the byte requesting the server's RSA public key on the
    /// full-auth path without TLS
    pub fn public_key_request(self) -> u8 {
        match self {
            AuthPlugin::Sha256 => 0x01,
            _ => 0x02,
        }
    }
}

/// encrypt XOR(password + NUL, seed) with the server's public key,
/// the payload the full-auth path sends without TLS
pub fn rsa_encrypt_password(pem: &str, password: &str, seed: &[u8]) -> Result<Vec<u8>> {
    let key = RsaPublicKey::from_public_key_pem(pem)
        .map_err(|e| Error::Auth(format!("invalid server rsa key: {}", e)))?;
    let plain = xor_rotating(password.as_bytes(), seed);
    key.encrypt(&mut OsRng, Oaep::new::<sha1::Sha1>(), &plain)
        .map_err(|e| Error::Auth(format!("rsa encryption failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_names() {
        assert_eq!(
            AuthPlugin::NativePassword,
            AuthPlugin::from_name("mysql_native_password").unwrap()
        );
        assert_eq!(
            AuthPlugin::CachingSha2,
            AuthPlugin::from_name("caching_sha2_password").unwrap()
        );
        assert_eq!(AuthPlugin::NativePassword, AuthPlugin::from_name("").unwrap());
        assert!(matches!(
            AuthPlugin::from_name("dialog"),
            Err(Error::UnsupportedAuthPlugin(_))
        ));
    }

    #[test]
    fn test_response_lengths() {
        let seed = b"01234567890123456789";
        assert_eq!(
            20,
            AuthPlugin::NativePassword
                .initial_response("secret", seed, false)
                .len()
        );
        assert_eq!(
            32,
            AuthPlugin::CachingSha2
                .initial_response("secret", seed, false)
                .len()
        );
        assert_eq!(
            vec![0x01],
            AuthPlugin::Sha256.initial_response("secret", seed, false)
        );
        assert_eq!(
            b"secret\0".to_vec(),
            AuthPlugin::Sha256.initial_response("secret", seed, true)
        );
    }

    #[test]
    fn test_empty_password_responses() {
        let seed = b"01234567890123456789";
        assert!(AuthPlugin::NativePassword
            .initial_response("", seed, false)
            .is_empty());
        assert!(AuthPlugin::CachingSha2
            .initial_response("", seed, false)
            .is_empty());
    }
}
