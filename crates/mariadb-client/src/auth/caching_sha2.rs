//! `caching_sha2_password`.
//!
//! The client first sends the fast scramble
//! `XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + seed))`. The
//! server answers `0x01 0x03` when the password hash is cached, or `0x01 0x04`
//! asking for full authentication. Without TLS the full exchange requests the
//! server RSA public key and sends the password encrypted with OAEP.

use mariadb_core::Result;
use mariadb_core::error::{ConnectionError, ConnectionErrorKind, Error};
use rand::rngs::OsRng;
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use super::{AuthenticationPlugin, plugins, send_auth_data, trim_seed};
use crate::config::MariaDbConfig;
use crate::context::Context;
use crate::protocol::{PacketReader, PacketWriter};

/// Leading byte of "more authentication data" packets.
const AUTH_MORE_DATA: u8 = 0x01;
const REQUEST_PUBLIC_KEY: u8 = 0x02;
const FAST_AUTH_SUCCESS: u8 = 0x03;
const PERFORM_FULL_AUTH: u8 = 0x04;

#[derive(Debug, Default)]
pub struct CachingSha2PasswordPlugin {
    password: Option<String>,
    seed: Vec<u8>,
}

impl AuthenticationPlugin for CachingSha2PasswordPlugin {
    fn name(&self) -> &'static str {
        plugins::CACHING_SHA2_PASSWORD
    }

    fn initialize(&mut self, password: Option<&str>, seed: &[u8], _config: &MariaDbConfig) {
        self.password = password.map(str::to_string);
        self.seed = trim_seed(seed).to_vec();
    }

    fn process(
        &mut self,
        writer: &mut PacketWriter,
        reader: &mut PacketReader,
        _context: &Context,
    ) -> Result<Vec<u8>> {
        let password = self.password.as_deref().unwrap_or_default();
        send_auth_data(writer, reader, &fast_scramble(password, &self.seed))?;

        loop {
            let packet = reader.read_packet()?;
            if packet.first() != Some(&AUTH_MORE_DATA) || packet.len() < 2 {
                return Ok(packet);
            }
            match packet[1] {
                FAST_AUTH_SUCCESS => {
                    tracing::debug!("caching_sha2_password fast authentication succeeded");
                }
                PERFORM_FULL_AUTH => {
                    tracing::debug!("caching_sha2_password requests full authentication");
                    send_auth_data(writer, reader, &[REQUEST_PUBLIC_KEY])?;
                    let key_packet = reader.read_packet()?;
                    let pem = match key_packet.split_first() {
                        Some((&AUTH_MORE_DATA, pem)) => pem,
                        _ => return Ok(key_packet),
                    };
                    let encrypted = encrypt_password(password, &self.seed, pem)?;
                    send_auth_data(writer, reader, &encrypted)?;
                }
                _ => return Ok(packet),
            }
        }
    }
}

/// Fast authentication scramble; empty without a password.
pub fn fast_scramble(password: &str, seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let password_hash: [u8; 32] = Sha256::digest(password.as_bytes()).into();
    let password_hash_hash: [u8; 32] = Sha256::digest(password_hash).into();

    let mut hasher = Sha256::new();
    hasher.update(password_hash_hash);
    hasher.update(seed);
    let scramble: [u8; 32] = hasher.finalize().into();

    password_hash
        .iter()
        .zip(scramble.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

fn auth_failure(message: String) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Authentication,
        message,
        sqlstate: Some("S1009".to_string()),
        code: None,
        source: None,
    })
}

/// RSA-OAEP encrypt the NUL terminated password XORed with the seed.
pub fn encrypt_password(password: &str, seed: &[u8], public_key_pem: &[u8]) -> Result<Vec<u8>> {
    if seed.is_empty() {
        return Err(auth_failure("authentication seed is empty".to_string()));
    }
    let mut data = password.as_bytes().to_vec();
    data.push(0);
    for (i, b) in data.iter_mut().enumerate() {
        *b ^= seed[i % seed.len()];
    }

    let pem = std::str::from_utf8(public_key_pem)
        .map_err(|e| auth_failure(format!("server RSA public key is not valid PEM: {e}")))?;
    let key = RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| auth_failure(format!("Could not read server RSA public key: {e}")))?;

    key.encrypt(&mut OsRng, rsa::Oaep::new::<Sha1>(), &data)
        .map_err(|e| auth_failure(format!("Could not encrypt password with server RSA key: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};

    #[test]
    fn test_fast_scramble() {
        assert!(fast_scramble("", &[0; 20]).is_empty());
        let seed = [3u8; 20];
        let a = fast_scramble("secret", &seed);
        assert_eq!(a.len(), 32);
        assert_eq!(a, fast_scramble("secret", &seed));
        assert_ne!(a, fast_scramble("secret", &[4u8; 20]));
    }

    #[test]
    fn test_seed_with_nul() {
        let mut plugin = CachingSha2PasswordPlugin::default();
        let mut seed = vec![9u8; 20];
        seed.push(0);
        plugin.initialize(Some("secret"), &seed, &MariaDbConfig::default());
        assert_eq!(
            fast_scramble("secret", &plugin.seed),
            fast_scramble("secret", &seed[..20])
        );
    }

    #[test]
    fn test_encrypt_password_round_trip() {
        let private = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let pem = RsaPublicKey::from(&private)
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        let seed = b"abcdefghijklmnopqrst";

        let encrypted = encrypt_password("secret", seed, pem.as_bytes()).unwrap();
        let decrypted = private.decrypt(rsa::Oaep::new::<Sha1>(), &encrypted).unwrap();
        let plain: Vec<u8> = decrypted
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ seed[i % seed.len()])
            .collect();
        assert_eq!(plain, b"secret\0");
    }

    #[test]
    fn test_encrypt_password_bad_key() {
        let err = encrypt_password("secret", b"seed", b"not a key").unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }
}
