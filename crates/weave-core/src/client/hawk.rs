//! Hawk request signing
//!
//! Storage requests carry an `Authorization: Hawk ...` header whose MAC is
//! an HMAC-SHA256 (keyed with the token server's `key`) over a normalized
//! description of the request:
//!
//! ```text
//! hawk.1.header
//! {ts}
//! {nonce}
//! {METHOD}
//! {path}?{query}
//! {host}
//! {port}
//! {payload hash}
//! {ext}
//! ```
//!
//! Requests with a body also carry a payload hash, a base64 SHA-256 over
//! `hawk.1.payload\n{mime type}\n{body}\n`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::{Digest, Sha256};

use crate::error::SyncError;
use crate::types::Credentials;

type HmacSha256 = Hmac<Sha256>;

/// The only MAC algorithm the storage servers use
pub const HAWK_ALGORITHM: &str = "sha256";

/// Request body to be covered by the payload hash
#[derive(Debug, Clone, Copy)]
pub struct HawkPayload<'a> {
    /// `Content-Type` header value (parameters are ignored)
    pub content_type: &'a str,
    /// Raw request body
    pub body: &'a [u8],
}

/// Signs storage requests with Hawk credentials.
#[derive(Clone)]
pub struct HawkAuth {
    id: String,
    key: Vec<u8>,
}

impl std::fmt::Debug for HawkAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HawkAuth")
            .field("id", &self.id)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl HawkAuth {
    /// Create a signer.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` for any algorithm other than sha256.
    pub fn new(id: impl Into<String>, key: impl AsRef<[u8]>, algorithm: &str) -> Result<Self, SyncError> {
        if !algorithm.eq_ignore_ascii_case(HAWK_ALGORITHM) {
            return Err(SyncError::Config(format!(
                "Unsupported Hawk algorithm '{}'",
                algorithm
            )));
        }
        Ok(Self {
            id: id.into(),
            key: key.as_ref().to_vec(),
        })
    }

    /// Signer for token server credentials
    pub fn from_credentials(credentials: &Credentials) -> Result<Self, SyncError> {
        Self::new(
            credentials.hmac_id.clone(),
            credentials.hmac_key.as_bytes(),
            &credentials.hmac_algorithm,
        )
    }

    /// `Authorization` header value for a request, using the current time
    /// and a fresh nonce.
    pub fn header(
        &self,
        method: &str,
        url: &Url,
        payload: Option<HawkPayload<'_>>,
    ) -> Result<String, SyncError> {
        let ts = chrono::Utc::now().timestamp();
        self.header_with(method, url, payload, ts, &generate_nonce(), None)
    }

    /// `Authorization` header value with explicit timestamp, nonce and ext.
    pub fn header_with(
        &self,
        method: &str,
        url: &Url,
        payload: Option<HawkPayload<'_>>,
        ts: i64,
        nonce: &str,
        ext: Option<&str>,
    ) -> Result<String, SyncError> {
        let hash = payload.map(|p| payload_hash(p.content_type, p.body));
        let mac = self.mac(method, url, ts, nonce, hash.as_deref(), ext)?;

        let mut header = format!("Hawk id=\"{}\", ts=\"{}\", nonce=\"{}\"", self.id, ts, nonce);
        if let Some(hash) = &hash {
            header.push_str(&format!(", hash=\"{}\"", hash));
        }
        if let Some(ext) = ext {
            header.push_str(&format!(", ext=\"{}\"", escape(ext)));
        }
        header.push_str(&format!(", mac=\"{}\"", mac));
        Ok(header)
    }

    /// Base64 request MAC
    pub fn mac(
        &self,
        method: &str,
        url: &Url,
        ts: i64,
        nonce: &str,
        hash: Option<&str>,
        ext: Option<&str>,
    ) -> Result<String, SyncError> {
        let normalized = normalized_string(method, url, ts, nonce, hash, ext)?;
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| SyncError::Crypto(format!("Invalid Hawk key: {}", e)))?;
        mac.update(normalized.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }
}

/// Base64 SHA-256 payload hash.
pub fn payload_hash(content_type: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"hawk.1.payload\n");
    hasher.update(mime_type(content_type).as_bytes());
    hasher.update(b"\n");
    hasher.update(body);
    hasher.update(b"\n");
    BASE64.encode(hasher.finalize())
}

fn normalized_string(
    method: &str,
    url: &Url,
    ts: i64,
    nonce: &str,
    hash: Option<&str>,
    ext: Option<&str>,
) -> Result<String, SyncError> {
    let host = url
        .host_str()
        .ok_or_else(|| SyncError::InvalidOperation(format!("URL has no host: {}", url)))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| SyncError::InvalidOperation(format!("URL has no port: {}", url)))?;
    let resource = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };

    Ok(format!(
        "hawk.1.header\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n",
        ts,
        nonce,
        method.to_ascii_uppercase(),
        resource,
        host.to_ascii_lowercase(),
        port,
        hash.unwrap_or_default(),
        ext.map(escape).unwrap_or_default(),
    ))
}

fn mime_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n")
}

fn generate_nonce() -> String {
    use rand::RngCore;

    let mut bytes = [0u8; 6];
    rand::rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}
