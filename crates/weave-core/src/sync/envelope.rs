//! Encrypted record envelopes
//!
//! Every BSO payload is a JSON-encoded [`Envelope`] holding the AES-256-CBC
//! ciphertext of the record's JSON, its IV, and an HMAC over the ciphertext.
//!
//! ## Security Model
//!
//! Uses **Encrypt-then-MAC**:
//! 1. Serialize the record to UTF-8 JSON and PKCS7-pad it
//! 2. Encrypt with the bundle's encryption key and a random 16-byte IV
//! 3. Base64 the ciphertext and HMAC-SHA256 the base64 text with the
//!    bundle's HMAC key
//!
//! The HMAC is always verified (in constant time) before any decryption.
//!
//! ## Wire Format
//!
//! ```text
//! {"ciphertext": "<base64>", "IV": "<base64, 16 bytes>", "hmac": "<hex>"}
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use weave_core::{Envelope, KeyBundle};
//!
//! let keys = KeyBundle::generate();
//! let envelope = Envelope::seal(&record, &keys)?;
//! let bso = envelope.into_bso(&record.id)?;
//!
//! // ... later, from the server
//! let record: HistoryRecord = Envelope::from_bso(&bso)?.open(&keys)?;
//! ```

use aes::Aes256;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use cbc::cipher::block_padding::{NoPadding, Pkcs7};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::crypto::KeyBundle;
use crate::error::SyncError;
use crate::types::{Bso, OutgoingBso};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// AES block size, also the IV size
pub const BLOCK_SIZE: usize = 16;

/// An encrypted record payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Base64 AES-256-CBC ciphertext
    pub ciphertext: String,

    /// Base64 initialization vector
    #[serde(rename = "IV")]
    pub iv: String,

    /// Hex HMAC-SHA256 of the base64 ciphertext text
    pub hmac: String,
}

impl Envelope {
    /// Encrypt a record.
    ///
    /// The plaintext is always padded, so a JSON body whose length is a
    /// multiple of 16 gets a full extra block.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Serialization` if the record cannot be encoded,
    /// or `SyncError::Crypto` if the cipher cannot be keyed.
    pub fn seal<T: Serialize>(record: &T, keys: &KeyBundle) -> Result<Self, SyncError> {
        let plaintext = serde_json::to_vec(record)
            .map_err(|e| SyncError::Serialization(format!("Failed to encode record: {}", e)))?;

        let iv = generate_iv();
        let cipher = Aes256CbcEnc::new_from_slices(keys.encryption_key(), &iv)
            .map_err(|e| SyncError::Crypto(format!("Invalid cipher key: {}", e)))?;
        let ciphertext = BASE64.encode(cipher.encrypt_padded_vec_mut::<Pkcs7>(&plaintext));
        let hmac = sign(&ciphertext, keys)?;

        Ok(Self {
            ciphertext,
            iv: BASE64.encode(iv),
            hmac,
        })
    }

    /// Verify and decrypt into a typed record.
    ///
    /// # Errors
    ///
    /// - `SyncError::Integrity` if the HMAC does not match or is not hex
    /// - `SyncError::MalformedRecord` for bad base64, a bad IV, misaligned
    ///   ciphertext, non-UTF-8 plaintext, or JSON that does not fit `T`
    pub fn open<T: DeserializeOwned>(&self, keys: &KeyBundle) -> Result<T, SyncError> {
        let value = self.open_value(keys)?;
        serde_json::from_value(value)
            .map_err(|e| SyncError::MalformedRecord(format!("Unexpected record shape: {}", e)))
    }

    /// Verify and decrypt into raw JSON.
    pub fn open_value(&self, keys: &KeyBundle) -> Result<serde_json::Value, SyncError> {
        self.verify(keys)?;

        let ciphertext = BASE64
            .decode(&self.ciphertext)
            .map_err(|e| SyncError::MalformedRecord(format!("Invalid ciphertext base64: {}", e)))?;
        let iv = BASE64
            .decode(&self.iv)
            .map_err(|e| SyncError::MalformedRecord(format!("Invalid IV base64: {}", e)))?;
        if iv.len() != BLOCK_SIZE {
            return Err(SyncError::MalformedRecord(format!(
                "IV must be {} bytes (got {})",
                BLOCK_SIZE,
                iv.len()
            )));
        }

        let cipher = Aes256CbcDec::new_from_slices(keys.encryption_key(), &iv)
            .map_err(|e| SyncError::Crypto(format!("Invalid cipher key: {}", e)))?;
        let mut plaintext = cipher
            .decrypt_padded_vec_mut::<NoPadding>(&ciphertext)
            .map_err(|_| {
                SyncError::MalformedRecord(format!(
                    "Ciphertext length {} is not a multiple of {}",
                    ciphertext.len(),
                    BLOCK_SIZE
                ))
            })?;
        strip_padding(&mut plaintext);

        let text = String::from_utf8(plaintext)
            .map_err(|e| SyncError::MalformedRecord(format!("Plaintext is not UTF-8: {}", e)))?;
        // Drop anything after the closing brace of the JSON object
        let end = text.rfind('}').map(|i| i + 1).unwrap_or(text.len());

        serde_json::from_str(&text[..end])
            .map_err(|e| SyncError::MalformedRecord(format!("Invalid record JSON: {}", e)))
    }

    /// Check the HMAC without decrypting.
    pub fn verify(&self, keys: &KeyBundle) -> Result<(), SyncError> {
        let expected = hex::decode(&self.hmac)
            .map_err(|e| SyncError::Integrity(format!("HMAC is not hex: {}", e)))?;
        let mut mac = new_mac(keys)?;
        mac.update(self.ciphertext.as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| SyncError::Integrity("HMAC mismatch".to_string()))
    }

    /// Parse the envelope carried in a BSO payload.
    pub fn from_bso(bso: &Bso) -> Result<Self, SyncError> {
        serde_json::from_str(&bso.payload).map_err(|e| {
            SyncError::MalformedRecord(format!("Record {} has no envelope: {}", bso.id, e))
        })
    }

    /// Wrap into an outgoing BSO stamped with the current time.
    pub fn into_bso(self, id: impl Into<String>) -> Result<OutgoingBso, SyncError> {
        let payload = serde_json::to_string(&self)?;
        Ok(OutgoingBso::new(id, payload))
    }
}

/// Hex HMAC-SHA256 of a base64 ciphertext.
pub(crate) fn sign(ciphertext: &str, keys: &KeyBundle) -> Result<String, SyncError> {
    let mut mac = new_mac(keys)?;
    mac.update(ciphertext.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn new_mac(keys: &KeyBundle) -> Result<HmacSha256, SyncError> {
    HmacSha256::new_from_slice(keys.hmac_key())
        .map_err(|e| SyncError::Crypto(format!("Invalid HMAC key: {}", e)))
}

fn generate_iv() -> [u8; BLOCK_SIZE] {
    use rand::RngCore;

    let mut iv = [0u8; BLOCK_SIZE];
    rand::rng().fill_bytes(&mut iv);
    iv
}

/// Remove PKCS7 padding when it is well formed, otherwise leave the bytes.
fn strip_padding(plaintext: &mut Vec<u8>) {
    let Some(&last) = plaintext.last() else {
        return;
    };
    let pad = last as usize;
    if pad == 0 || pad > BLOCK_SIZE || pad > plaintext.len() {
        return;
    }
    if plaintext[plaintext.len() - pad..].iter().all(|&b| b == last) {
        plaintext.truncate(plaintext.len() - pad);
    }
}
