//! Sync session lifecycle
//!
//! ```text
//! NoSession ──session()──▶ KeyBundleReady ──check fails / invalidate()──▶ NoSession
//! ```
//!
//! Building a session walks the whole key chain:
//! 1. Check the identity session and get a BrowserID assertion plus kB
//! 2. Trade the assertion for Hawk credentials at the token server
//! 3. Derive the account bundle from kB and decrypt `crypto/keys` with it
//! 4. Decode the default bulk keys from that record
//!
//! The result is cached until the identity check fails or the session is
//! invalidated.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::{RemoteStore, StorageClient, TokenClient};
use crate::config::SyncConfig;
use crate::crypto::{client_state, KeyBundle, OLDSYNC_INFO};
use crate::error::{SyncError, SyncResult};
use crate::sync::envelope::Envelope;
use crate::types::{CryptoKeysRecord, OutgoingBso};

/// Collection and id of the bulk key record
pub const CRYPTO_COLLECTION: &str = "crypto";
/// Id of the bulk key record
pub const KEYS_RECORD_ID: &str = "keys";

/// Source of identity assertions and account key material.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Fail with `SyncError::Authentication` when the login session is gone
    async fn check_session(&self) -> SyncResult<()>;

    /// BrowserID assertion for `audience`
    async fn assertion(&self, audience: &str) -> SyncResult<String>;

    /// Account key kB
    fn key_b(&self) -> SyncResult<Vec<u8>>;
}

/// Credential bundle handed over by the login flow.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBundle {
    /// Account email
    pub email: String,
    /// Account uid
    pub uid: String,
    /// Login session token
    pub session_token: String,
    /// Base64 kB
    pub key_b: String,
    /// Signed BrowserID assertion for the token server
    #[serde(default)]
    pub assertion: Option<String>,
}

impl AccountBundle {
    /// Read a bundle from a JSON file.
    pub fn load(path: impl AsRef<std::path::Path>) -> SyncResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl fmt::Debug for AccountBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountBundle")
            .field("email", &self.email)
            .field("uid", &self.uid)
            .field("session_token", &"<redacted>")
            .field("key_b", &"<redacted>")
            .field("assertion", &self.assertion.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[async_trait]
impl IdentityProvider for AccountBundle {
    async fn check_session(&self) -> SyncResult<()> {
        if self.session_token.is_empty() {
            return Err(SyncError::Authentication(format!(
                "No login session for {}",
                self.email
            )));
        }
        Ok(())
    }

    async fn assertion(&self, audience: &str) -> SyncResult<String> {
        self.assertion.clone().ok_or_else(|| {
            SyncError::Authentication(format!("No assertion for {} available", audience))
        })
    }

    fn key_b(&self) -> SyncResult<Vec<u8>> {
        BASE64
            .decode(&self.key_b)
            .map_err(|e| SyncError::Authentication(format!("Invalid kB: {}", e)))
    }
}

/// A live session: where to sync and which keys to use.
#[derive(Clone)]
pub struct Session {
    /// Remote record store
    pub remote: Arc<dyn RemoteStore>,
    /// Bulk keys for record payloads
    pub keys: KeyBundle,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("keys", &self.keys).finish()
    }
}

/// Anything that can hand out sessions to the engine.
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// Current session, building one if needed
    async fn session(&self) -> SyncResult<Session>;

    /// Drop the cached session
    async fn invalidate(&self);
}

enum SessionState {
    NoSession,
    KeyBundleReady(Session),
}

/// Owns login state and the cached bulk keys.
pub struct SessionManager {
    identity: Arc<dyn IdentityProvider>,
    tokens: TokenClient,
    http: reqwest::Client,
    token_duration: Option<u64>,
    state: Mutex<SessionState>,
    status: AtomicBool,
}

impl SessionManager {
    /// Create a manager; nothing touches the network until [`SessionSource::session`].
    pub fn new(identity: Arc<dyn IdentityProvider>, config: &SyncConfig) -> SyncResult<Self> {
        let http = crate::client::http_client(config.request_timeout())?;
        Ok(Self {
            identity,
            tokens: TokenClient::with_client(config.token_server.clone(), http.clone()),
            http,
            token_duration: config.token_duration,
            state: Mutex::new(SessionState::NoSession),
            status: AtomicBool::new(false),
        })
    }

    /// True when the last session check succeeded
    pub fn status(&self) -> bool {
        self.status.load(Ordering::SeqCst)
    }

    /// True when bulk keys are cached
    pub async fn is_ready(&self) -> bool {
        matches!(*self.state.lock().await, SessionState::KeyBundleReady(_))
    }

    /// Bulk keys of the current session
    pub async fn bulk_keys(&self) -> SyncResult<KeyBundle> {
        Ok(self.session().await?.keys)
    }

    async fn connect(&self) -> SyncResult<Session> {
        let key_b = self.identity.key_b()?;
        let audience = self.tokens.endpoint()?.origin().ascii_serialization();
        let assertion = self.identity.assertion(&audience).await?;

        let credentials = self
            .tokens
            .get_credentials(&assertion, &client_state(&key_b), self.token_duration)
            .await?;
        let storage = StorageClient::new(&credentials, self.http.clone())?;

        let account = KeyBundle::from_master_key(&key_b, OLDSYNC_INFO)?;
        let keys = fetch_bulk_keys(&storage, &account).await?;
        info!(uid = %credentials.user_id, "Sync session ready");

        Ok(Session {
            remote: Arc::new(storage),
            keys,
        })
    }
}

#[async_trait]
impl SessionSource for SessionManager {
    async fn session(&self) -> SyncResult<Session> {
        let mut state = self.state.lock().await;

        if let Err(e) = self.identity.check_session().await {
            warn!(error = %e, "Identity session check failed");
            self.status.store(false, Ordering::SeqCst);
            *state = SessionState::NoSession;
            return Err(e);
        }
        if let SessionState::KeyBundleReady(session) = &*state {
            self.status.store(true, Ordering::SeqCst);
            return Ok(session.clone());
        }

        match self.connect().await {
            Ok(session) => {
                self.status.store(true, Ordering::SeqCst);
                *state = SessionState::KeyBundleReady(session.clone());
                Ok(session)
            }
            Err(e) => {
                self.status.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn invalidate(&self) {
        debug!("Dropping sync session");
        *self.state.lock().await = SessionState::NoSession;
    }
}

/// Fetch `crypto/keys` and decode the default bulk keys.
///
/// # Errors
///
/// - `SyncError::Integrity` if the record was not made with `account`
/// - `SyncError::UnsupportedKeyBundle` if per-collection bundles are set
pub async fn fetch_bulk_keys(
    remote: &dyn RemoteStore,
    account: &KeyBundle,
) -> SyncResult<KeyBundle> {
    let bso = remote.get_record(CRYPTO_COLLECTION, KEYS_RECORD_ID).await?;
    let record: CryptoKeysRecord = Envelope::from_bso(&bso)?.open(account)?;
    if !record.collections.is_empty() {
        return Err(SyncError::UnsupportedKeyBundle(record.collections.len()));
    }
    let [encryption_key, hmac_key] = &record.default;
    KeyBundle::from_base64_pair(encryption_key, hmac_key)
}

/// Build the `crypto/keys` record for `bulk`, encrypted with `account`.
pub fn seal_bulk_keys(account: &KeyBundle, bulk: &KeyBundle) -> SyncResult<OutgoingBso> {
    let record = CryptoKeysRecord {
        default: bulk.to_base64_pair(),
        collections: Default::default(),
    };
    Envelope::seal(&record, account)?.into_bso(KEYS_RECORD_ID)
}
