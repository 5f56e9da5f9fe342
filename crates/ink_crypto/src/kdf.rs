//! Key derivation
//!
//! `derive_key` — Argon2id, derives the 32-byte key used for envelope
//! encryption and (hex-encoded) as the SQLCipher database key.

use argon2::{Argon2, Params, Version};
use rand::RngCore;

use crate::error::CryptoError;

/// Argon2id parameters — tuned for interactive (desktop) use.
fn argon2_params() -> Params {
    Params::new(
        64 * 1024, // m_cost: 64 MiB
        3,         // t_cost: 3 iterations
        1,         // p_cost: 1 thread
        Some(32),  // output len
    )
    .expect("static Argon2 params are always valid")
}

/// Derive a 32-byte key from a password + 16-byte salt.
/// The salt is stored alongside the encrypted data (not secret).
pub fn derive_key(password: &[u8], salt: &[u8; 16]) -> Result<[u8; 32], CryptoError> {
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, argon2_params());
    let mut output = [0u8; 32];
    argon2
        .hash_password_into(password, salt, &mut output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(output)
}

/// Generate a fresh random 16-byte salt (call once on first run; store it).
pub fn generate_salt() -> [u8; 16] {
    let mut salt = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_same_inputs() {
        let salt = [1u8; 16];
        let a = derive_key(b"password", &salt).unwrap();
        let b = derive_key(b"password", &salt).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn salt_changes_key() {
        let a = derive_key(b"password", &[1u8; 16]).unwrap();
        let b = derive_key(b"password", &[2u8; 16]).unwrap();
        assert_ne!(a, b);
    }
}
