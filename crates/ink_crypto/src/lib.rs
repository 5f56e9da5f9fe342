//! ink_crypto — envelope-encryption primitives for Inkbase
//!
//! # Encryption strategy
//! The local database and the key/value store never see plaintext secrets:
//! - Values are sealed with XChaCha20-Poly1305 under an [`EnvelopeKey`]
//!   before they reach any storage backend.
//! - The database key is derived from the account private key; SQLCipher
//!   consumes it as a raw hex key pragma (see [`keys`]).
//! - Key material is derived via Argon2id and zeroized on drop.

pub mod error;
pub mod kdf;
pub mod keys;

pub use error::CryptoError;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use zeroize::ZeroizeOnDrop;

/// A 32-byte envelope key. Zeroized on drop.
///
/// One instance encrypts every value of one store; the associated data
/// binds ciphertexts to the Inkbase envelope format version.
#[derive(ZeroizeOnDrop)]
pub struct EnvelopeKey([u8; 32]);

const ENVELOPE_AAD: &[u8] = b"ink-envelope-v1";
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

impl EnvelopeKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self(key)
    }

    /// Derive an envelope key from a password and stored salt.
    pub fn from_password(password: &[u8], salt: &[u8; 16]) -> Result<Self, CryptoError> {
        kdf::derive_key(password, salt).map(Self)
    }

    /// Seal `plaintext` into the envelope format: a fresh random 24-byte
    /// nonce followed by ciphertext and tag.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut sealed = vec![0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut sealed);

        let ciphertext = self
            .cipher()
            .encrypt(
                XNonce::from_slice(&sealed),
                Payload {
                    msg: plaintext,
                    aad: ENVELOPE_AAD,
                },
            )
            .map_err(|_| CryptoError::AeadEncrypt)?;

        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open a sealed envelope. Fails on the wrong key, a tampered
    /// ciphertext, or an envelope from a different format version.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::AeadDecrypt);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

        self.cipher()
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: ENVELOPE_AAD,
                },
            )
            .map_err(|_| CryptoError::AeadDecrypt)
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(&self.0))
    }
}
