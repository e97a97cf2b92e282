//! Bidirectional history and bookmark reconciliation
//!
//! One pass of [`ReconciliationEngine::sync`]:
//!
//! 1. Load the per-collection checkpoint and retry queued remote deletes.
//! 2. Ask the server for `info/collections`.
//! 3. For each collection, push local changes made after the checkpoint,
//!    then pull and merge when the server copy moved.
//! 4. Fetch `info/collections` again and persist it as the new checkpoint.
//!    Collections that failed keep their previous value so the next pass
//!    retries them.
//!
//! Authentication failures abort the pass. Anything else aborts only the
//! collection it happened in and is reported in [`SyncReport`].

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::session::Session;
use super::{bookmarks, history};
use crate::crypto::KeyBundle;
use crate::error::{ErrorKind, SyncResult};
use crate::places::{BookmarkStore, HistoryStore, RowId};
use crate::storage::Storage;
use crate::sync::envelope::Envelope;
use crate::types::{Bso, Collection, CollectionCheckpoint};

/// Per-collection counters for one pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    /// Remote records merged into the store
    pub applied: usize,
    /// Remote records left alone (stale, unsupported, incomplete)
    pub skipped: usize,
    /// Remote records that could not be decoded
    pub malformed: usize,
    /// Records uploaded
    pub pushed: usize,
    /// Local tombstones deleted on the server
    pub deleted_remote: usize,
    /// Local rows removed because the server dropped them
    pub deleted_local: usize,
    /// Remote deletes queued for retry
    pub failed_deletes: usize,
}

/// Outcome of one collection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionReport {
    /// Collection name
    pub collection: Collection,
    /// Counters, as far as the collection got
    pub stats: CollectionStats,
    /// Error that aborted the collection
    pub error: Option<String>,
}

impl CollectionReport {
    /// True when the collection finished without error
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of a full pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    /// One entry per collection, in sync order
    pub collections: Vec<CollectionReport>,
    /// Checkpoint persisted at the end of the pass
    pub checkpoint: CollectionCheckpoint,
    /// Queued deletes that went through this time
    pub retried_deletes: usize,
}

impl SyncReport {
    /// True when every collection synced
    pub fn is_success(&self) -> bool {
        self.collections.iter().all(CollectionReport::is_success)
    }

    /// Report for one collection
    pub fn collection(&self, collection: Collection) -> Option<&CollectionReport> {
        self.collections.iter().find(|r| r.collection == collection)
    }
}

/// Decrypt one server record.
///
/// A record that cannot be decoded is logged and yields `None`; an HMAC
/// mismatch is an error for the whole collection.
pub(crate) fn decode_record<T: DeserializeOwned>(
    bso: &Bso,
    keys: &KeyBundle,
    collection: &str,
) -> SyncResult<Option<T>> {
    let decoded = Envelope::from_bso(bso).and_then(|envelope| envelope.open::<T>(keys));
    match decoded {
        Ok(record) => Ok(Some(record)),
        Err(err) if err.kind() == ErrorKind::MalformedRecord => {
            warn!(collection, guid = %bso.id, error = %err, "Skipping malformed record");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Failed attempts after which a queued remote delete is dropped
pub const MAX_DELETE_ATTEMPTS: u32 = 5;

/// Guids of `collection` waiting in the remote delete queue.
///
/// Pulls skip them so a failed delete does not bring the record back.
pub(crate) fn queued_deletes(storage: &Storage, collection: &str) -> SyncResult<BTreeSet<String>> {
    Ok(storage
        .pending_deletes()?
        .into_iter()
        .filter(|entry| entry.collection == collection)
        .map(|entry| entry.guid)
        .collect())
}

/// Reconciles the local places stores with the server.
pub struct ReconciliationEngine {
    history: Arc<dyn HistoryStore>,
    bookmarks: Arc<dyn BookmarkStore>,
    storage: Storage,
}

impl ReconciliationEngine {
    /// Create an engine over the given stores and checkpoint storage.
    pub fn new(
        history: Arc<dyn HistoryStore>,
        bookmarks: Arc<dyn BookmarkStore>,
        storage: Storage,
    ) -> Self {
        Self {
            history,
            bookmarks,
            storage,
        }
    }

    /// Checkpoint storage
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Persisted checkpoint
    pub fn checkpoint(&self) -> SyncResult<CollectionCheckpoint> {
        self.storage.load_checkpoint()
    }

    /// Run one full pass.
    ///
    /// On a first sync no local bookmark is deleted.
    pub async fn sync(&self, session: &Session, first_sync: bool) -> SyncResult<SyncReport> {
        let previous = self.storage.load_checkpoint()?;
        let retried_deletes = self.retry_pending_deletes(session).await?;

        let remote = session.remote.info_collections().await?;
        info!(first_sync, collections = remote.len(), "Starting sync pass");

        let mut reports = Vec::with_capacity(Collection::ALL.len());
        for collection in Collection::ALL {
            let name = collection.as_str();
            let checkpoint = previous.get(name);
            let changed = remote
                .get(name)
                .is_some_and(|&modified| modified != checkpoint);

            let mut stats = CollectionStats::default();
            let result = self
                .sync_collection(session, collection, checkpoint, changed, first_sync, &mut stats)
                .await;

            let error = match result {
                Ok(()) => {
                    info!(collection = name, ?stats, "Collection synced");
                    None
                }
                Err(err) if err.kind() == ErrorKind::Authentication => return Err(err),
                Err(err) => {
                    warn!(collection = name, error = %err, "Collection sync failed");
                    Some(err.to_string())
                }
            };
            reports.push(CollectionReport {
                collection,
                stats,
                error,
            });
        }

        let fresh = session.remote.info_collections().await?;
        let mut checkpoint = CollectionCheckpoint::from_times(fresh);
        for report in reports.iter().filter(|r| !r.is_success()) {
            let name = report.collection.as_str();
            checkpoint.set(name, previous.get(name));
        }
        self.storage.save_checkpoint(&checkpoint)?;
        debug!(?checkpoint, "Checkpoint saved");

        Ok(SyncReport {
            collections: reports,
            checkpoint,
            retried_deletes,
        })
    }

    async fn sync_collection(
        &self,
        session: &Session,
        collection: Collection,
        checkpoint: f64,
        changed: bool,
        first_sync: bool,
        stats: &mut CollectionStats,
    ) -> SyncResult<()> {
        match collection {
            Collection::History => {
                history::push(self.history.as_ref(), session, checkpoint, stats).await?;
                if changed {
                    history::pull(
                        self.history.as_ref(),
                        session,
                        &self.storage,
                        checkpoint,
                        stats,
                    )
                    .await?;
                }
            }
            Collection::Bookmarks => {
                bookmarks::push(
                    self.bookmarks.as_ref(),
                    session,
                    &self.storage,
                    checkpoint,
                    stats,
                )
                .await?;
                if changed {
                    bookmarks::pull(
                        self.bookmarks.as_ref(),
                        session,
                        &self.storage,
                        first_sync,
                        stats,
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// Upload one history row right away.
    pub async fn push_history(&self, session: &Session, id: RowId) -> SyncResult<()> {
        history::push_one(self.history.as_ref(), session, id).await
    }

    /// Delete one history record on the server.
    ///
    /// Returns false when the delete failed and was queued for retry.
    pub async fn remove_from_history(&self, session: &Session, guid: &str) -> SyncResult<bool> {
        let collection = Collection::History.as_str();
        if session.remote.delete_record(collection, guid).await {
            debug!(guid, "History record deleted");
            return Ok(true);
        }
        let attempts = self.storage.queue_delete(collection, guid)?;
        warn!(guid, attempts, "Remote delete failed, queued for retry");
        Ok(false)
    }

    /// Retry queued remote deletes, returning how many went through.
    ///
    /// An entry is dropped once it has failed [`MAX_DELETE_ATTEMPTS`] times.
    pub async fn retry_pending_deletes(&self, session: &Session) -> SyncResult<usize> {
        let pending = self.storage.pending_deletes()?;
        if pending.is_empty() {
            return Ok(0);
        }
        info!(count = pending.len(), "Retrying queued deletes");

        let mut done = 0;
        for entry in pending {
            if session
                .remote
                .delete_record(&entry.collection, &entry.guid)
                .await
            {
                self.storage.clear_delete(&entry.collection, &entry.guid)?;
                done += 1;
            } else {
                let attempts = self.storage.queue_delete(&entry.collection, &entry.guid)?;
                if attempts >= MAX_DELETE_ATTEMPTS {
                    self.storage.clear_delete(&entry.collection, &entry.guid)?;
                    warn!(
                        collection = %entry.collection,
                        guid = %entry.guid,
                        attempts,
                        "Giving up on queued delete"
                    );
                } else {
                    warn!(
                        collection = %entry.collection,
                        guid = %entry.guid,
                        attempts,
                        "Queued delete failed again"
                    );
                }
            }
        }
        Ok(done)
    }
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine").finish_non_exhaustive()
    }
}
