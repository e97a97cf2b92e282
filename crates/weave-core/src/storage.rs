//! Persistent sync state using redb.
//!
//! This module provides ACID-compliant storage for:
//! - The collection checkpoint (last-synced server time per collection)
//! - The queue of remote deletions that failed and must be retried

use crate::error::SyncError;
use crate::types::CollectionCheckpoint;
use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

/// File name of the database inside the data directory
pub const DB_FILE_NAME: &str = "weave.redb";

// Table definitions
const CHECKPOINTS_TABLE: TableDefinition<&str, f64> = TableDefinition::new("checkpoints");
const PENDING_DELETES_TABLE: TableDefinition<(&str, &str), u32> =
    TableDefinition::new("pending_deletes");

/// A remote deletion waiting to be retried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelete {
    /// Collection name
    pub collection: String,
    /// Record guid
    pub guid: String,
    /// Failed attempts so far
    pub attempts: u32,
}

/// Storage layer using redb for ACID-compliant persistence
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// This will:
    /// - Create the database directory if it doesn't exist
    /// - Initialize the database file
    /// - Create all required tables
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(CHECKPOINTS_TABLE)?;
            let _ = write_txn.open_table(PENDING_DELETES_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    /// Open (or create) `weave.redb` inside a data directory.
    pub fn open_in(data_dir: impl AsRef<Path>) -> Result<Self, SyncError> {
        Self::new(data_dir.as_ref().join(DB_FILE_NAME))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Checkpoint Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Load the checkpoint.
    ///
    /// An empty table yields an empty checkpoint, which reads every
    /// collection as never synced.
    pub fn load_checkpoint(&self) -> Result<CollectionCheckpoint, SyncError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(CHECKPOINTS_TABLE)?;

        let mut checkpoint = CollectionCheckpoint::default();
        for entry in table.iter()? {
            let (name, time) = entry?;
            checkpoint.set(name.value(), time.value());
        }
        Ok(checkpoint)
    }

    /// Replace the stored checkpoint wholesale.
    pub fn save_checkpoint(&self, checkpoint: &CollectionCheckpoint) -> Result<(), SyncError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            write_txn.delete_table(CHECKPOINTS_TABLE)?;
            let mut table = write_txn.open_table(CHECKPOINTS_TABLE)?;
            for (name, time) in checkpoint.iter() {
                table.insert(name, time)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Forget every checkpoint so the next sync pulls everything.
    pub fn reset_checkpoint(&self) -> Result<(), SyncError> {
        self.save_checkpoint(&CollectionCheckpoint::default())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Pending Delete Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Record a failed remote deletion, bumping its attempt count.
    pub fn queue_delete(&self, collection: &str, guid: &str) -> Result<u32, SyncError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let attempts = {
            let mut table = write_txn.open_table(PENDING_DELETES_TABLE)?;
            let attempts = table
                .get((collection, guid))?
                .map(|v| v.value())
                .unwrap_or(0)
                + 1;
            table.insert((collection, guid), attempts)?;
            attempts
        };
        write_txn.commit()?;
        Ok(attempts)
    }

    /// Remove a deletion from the queue once it went through.
    pub fn clear_delete(&self, collection: &str, guid: &str) -> Result<(), SyncError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(PENDING_DELETES_TABLE)?;
            table.remove((collection, guid))?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// All queued deletions, ordered by collection then guid.
    pub fn pending_deletes(&self) -> Result<Vec<PendingDelete>, SyncError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(PENDING_DELETES_TABLE)?;

        let mut pending = Vec::new();
        for entry in table.iter()? {
            let (key, attempts) = entry?;
            let (collection, guid) = key.value();
            pending.push(PendingDelete {
                collection: collection.to_string(),
                guid: guid.to_string(),
                attempts: attempts.value(),
            });
        }
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NEVER_SYNCED;
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open_in(temp_dir.path()).unwrap();
        (storage, temp_dir)
    }

    #[test]
    fn test_storage_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/path/to/test.redb");
        let storage = Storage::new(&db_path);
        assert!(storage.is_ok());
        assert!(db_path.exists());
    }

    #[test]
    fn test_fresh_checkpoint_reads_never_synced() {
        let (storage, _temp) = create_test_storage();
        let checkpoint = storage.load_checkpoint().unwrap();
        assert!(checkpoint.is_empty());
        assert_eq!(checkpoint.get("history"), NEVER_SYNCED);
    }

    #[test]
    fn test_save_replaces_checkpoint() {
        let (storage, _temp) = create_test_storage();

        let mut first = CollectionCheckpoint::default();
        first.set("history", 100.5);
        first.set("tabs", 3.0);
        storage.save_checkpoint(&first).unwrap();

        let mut second = CollectionCheckpoint::default();
        second.set("history", 200.25);
        storage.save_checkpoint(&second).unwrap();

        let loaded = storage.load_checkpoint().unwrap();
        assert_eq!(loaded.get("history"), 200.25);
        assert_eq!(loaded.lookup("tabs"), None);
    }

    #[test]
    fn test_checkpoint_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        {
            let storage = Storage::open_in(temp_dir.path()).unwrap();
            let mut checkpoint = CollectionCheckpoint::default();
            checkpoint.set("bookmarks", 1500.75);
            storage.save_checkpoint(&checkpoint).unwrap();
        }
        {
            let storage = Storage::open_in(temp_dir.path()).unwrap();
            assert_eq!(storage.load_checkpoint().unwrap().get("bookmarks"), 1500.75);
        }
    }

    #[test]
    fn test_reset_checkpoint() {
        let (storage, _temp) = create_test_storage();
        let mut checkpoint = CollectionCheckpoint::default();
        checkpoint.set("history", 10.0);
        storage.save_checkpoint(&checkpoint).unwrap();

        storage.reset_checkpoint().unwrap();
        assert!(storage.load_checkpoint().unwrap().is_empty());
    }

    #[test]
    fn test_pending_delete_queue() {
        let (storage, _temp) = create_test_storage();

        assert_eq!(storage.queue_delete("bookmarks", "b1").unwrap(), 1);
        assert_eq!(storage.queue_delete("bookmarks", "b1").unwrap(), 2);
        storage.queue_delete("history", "h1").unwrap();

        let pending = storage.pending_deletes().unwrap();
        assert_eq!(
            pending,
            vec![
                PendingDelete {
                    collection: "bookmarks".into(),
                    guid: "b1".into(),
                    attempts: 2,
                },
                PendingDelete {
                    collection: "history".into(),
                    guid: "h1".into(),
                    attempts: 1,
                },
            ]
        );

        storage.clear_delete("bookmarks", "b1").unwrap();
        assert_eq!(storage.pending_deletes().unwrap().len(), 1);
    }
}
