//! HTTP side of sync: token exchange and the storage API
//!
//! [`TokenClient`] trades an identity assertion for Hawk credentials,
//! [`StorageClient`] speaks the BSO REST API with them. The engine only sees
//! the [`RemoteStore`] trait so it can run against an in-memory remote.

mod hawk;
mod storage;
mod token;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{SyncError, SyncResult};
use crate::types::{Bso, OutgoingBso, RecordQuery};

pub use hawk::{payload_hash, HawkAuth, HawkPayload, HAWK_ALGORITHM};
pub use storage::{Quota, StorageClient};
pub use token::TokenClient;

/// The remote record operations the reconciliation engine needs.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Last modification time of every collection
    async fn info_collections(&self) -> SyncResult<BTreeMap<String, f64>>;

    /// List records of a collection
    async fn get_records(&self, collection: &str, query: &RecordQuery) -> SyncResult<Vec<Bso>>;

    /// Fetch one record
    async fn get_record(&self, collection: &str, id: &str) -> SyncResult<Bso>;

    /// Create or replace a record, returning the new collection time
    async fn put_record(&self, collection: &str, record: &OutgoingBso) -> SyncResult<f64>;

    /// Best-effort delete. Returns `false` (after logging) on failure; a
    /// record that is already gone counts as deleted.
    async fn delete_record(&self, collection: &str, id: &str) -> bool;
}

/// Build the shared HTTP client.
pub fn http_client(timeout: Duration) -> SyncResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("weave/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Turn a non-2xx (or 304) response into an error carrying status and body.
pub(crate) async fn error_for_status(response: reqwest::Response) -> SyncResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::from_status(status.as_u16(), body))
}
