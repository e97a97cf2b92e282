//! Key derivation for Sync record crypto
//!
//! HKDF-SHA256 (RFC 5869) split into its extract and expand steps, and the
//! [`KeyBundle`] pair of AES/HMAC keys derived from an account master key.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};

use crate::error::SyncError;

/// Output size of SHA-256, and the size of both keys in a bundle
pub const KEY_SIZE: usize = 32;

/// Largest output `hkdf_expand` can produce (255 HMAC blocks)
pub const MAX_EXPAND_LENGTH: usize = 255 * KEY_SIZE;

/// HKDF info string for the account-level ("oldsync") key bundle
pub const OLDSYNC_INFO: &str = "identity.mozilla.com/picl/v1/oldsync";

/// HKDF extract step: `HMAC-SHA256(salt, secret)`.
///
/// A missing salt is replaced by 32 zero bytes.
pub fn hkdf_extract(salt: Option<&[u8]>, secret: &[u8]) -> [u8; KEY_SIZE] {
    let (prk, _) = Hkdf::<Sha256>::extract(salt, secret);
    let mut out = [0u8; KEY_SIZE];
    out.copy_from_slice(&prk);
    out
}

/// HKDF expand step.
///
/// Computes `T(i) = HMAC(prk, T(i-1) || info || i)` for as many blocks as
/// `length` needs and truncates the concatenation.
///
/// # Errors
///
/// Returns `SyncError::Crypto` when `length` exceeds [`MAX_EXPAND_LENGTH`]
/// or the PRK is shorter than a hash block.
pub fn hkdf_expand(prk: &[u8], info: &[u8], length: usize) -> Result<Vec<u8>, SyncError> {
    if length > MAX_EXPAND_LENGTH {
        return Err(SyncError::Crypto(format!(
            "HKDF expand length {} needs more than 255 blocks",
            length
        )));
    }
    let hkdf = Hkdf::<Sha256>::from_prk(prk)
        .map_err(|e| SyncError::Crypto(format!("Invalid PRK: {}", e)))?;
    let mut okm = vec![0u8; length];
    hkdf.expand(info, &mut okm)
        .map_err(|e| SyncError::Crypto(format!("HKDF expand failed: {}", e)))?;
    Ok(okm)
}

/// Extract-then-expand in one call.
pub fn hkdf(
    secret: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    length: usize,
) -> Result<Vec<u8>, SyncError> {
    let prk = hkdf_extract(salt, secret);
    hkdf_expand(&prk, info, length)
}

/// Token server client state for an account key: hex of the first 16 bytes
/// of `SHA-256(kB)`.
pub fn client_state(key_b: &[u8]) -> String {
    let digest = Sha256::digest(key_b);
    hex::encode(&digest[..16])
}

/// Symmetric key pair used for record payload crypto.
///
/// Bundles live for one session and are never persisted. `Debug` output
/// does not include key material.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyBundle {
    encryption_key: [u8; KEY_SIZE],
    hmac_key: [u8; KEY_SIZE],
}

impl KeyBundle {
    /// Create a bundle from raw keys.
    pub fn new(encryption_key: [u8; KEY_SIZE], hmac_key: [u8; KEY_SIZE]) -> Self {
        Self {
            encryption_key,
            hmac_key,
        }
    }

    /// Derive a bundle from a master key: 64 HKDF bytes (no salt), first
    /// half for encryption, second half for HMAC.
    pub fn from_master_key(master_key: &[u8], info: &str) -> Result<Self, SyncError> {
        let material = hkdf(master_key, None, info.as_bytes(), 2 * KEY_SIZE)?;
        let mut encryption_key = [0u8; KEY_SIZE];
        let mut hmac_key = [0u8; KEY_SIZE];
        encryption_key.copy_from_slice(&material[..KEY_SIZE]);
        hmac_key.copy_from_slice(&material[KEY_SIZE..]);
        Ok(Self::new(encryption_key, hmac_key))
    }

    /// Decode a bundle from the `[enc, hmac]` base64 pair stored in the
    /// `crypto/keys` record.
    pub fn from_base64_pair(encryption_key: &str, hmac_key: &str) -> Result<Self, SyncError> {
        Ok(Self::new(
            decode_key(encryption_key, "encryption")?,
            decode_key(hmac_key, "hmac")?,
        ))
    }

    /// Generate a random bundle.
    pub fn generate() -> Self {
        use rand::RngCore;

        let mut encryption_key = [0u8; KEY_SIZE];
        let mut hmac_key = [0u8; KEY_SIZE];
        rand::rng().fill_bytes(&mut encryption_key);
        rand::rng().fill_bytes(&mut hmac_key);
        Self::new(encryption_key, hmac_key)
    }

    /// AES-256 key
    pub fn encryption_key(&self) -> &[u8; KEY_SIZE] {
        &self.encryption_key
    }

    /// HMAC-SHA256 key
    pub fn hmac_key(&self) -> &[u8; KEY_SIZE] {
        &self.hmac_key
    }

    /// Encode as the `[enc, hmac]` base64 pair.
    pub fn to_base64_pair(&self) -> [String; 2] {
        [
            BASE64.encode(self.encryption_key),
            BASE64.encode(self.hmac_key),
        ]
    }
}

impl fmt::Debug for KeyBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyBundle")
            .field("encryption_key", &"<redacted>")
            .field("hmac_key", &"<redacted>")
            .finish()
    }
}

fn decode_key(encoded: &str, name: &str) -> Result<[u8; KEY_SIZE], SyncError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| SyncError::Crypto(format!("Invalid base64 {} key: {}", name, e)))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        SyncError::Crypto(format!(
            "{} key must be {} bytes (got {})",
            name,
            KEY_SIZE,
            b.len()
        ))
    })
}
