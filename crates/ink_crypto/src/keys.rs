//! Database key encoding
//!
//! SQLCipher accepts raw key material as `PRAGMA key = "x'<hex>'"`. The
//! account's 32-byte key is hex-encoded here so the pragma bypasses
//! SQLCipher's own KDF (the key is already derived via Argon2id).

use crate::error::CryptoError;

/// Hex-encode a 32-byte key for use inside a raw-key pragma.
pub fn db_key_hex(key: &[u8; 32]) -> String {
    hex::encode(key)
}

/// Parse a hex-encoded database key back into raw bytes.
pub fn db_key_from_hex(s: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(CryptoError::InvalidKey(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}
