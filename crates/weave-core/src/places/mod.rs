//! Local history and bookmark stores
//!
//! The engine reads and writes the host's places data only through the
//! [`HistoryStore`] and [`BookmarkStore`] traits. Stores serialize their own
//! writes; the engine brackets each pull with `begin_batch` / `end_batch` so
//! an implementation can hold one transaction across it.
//!
//! [`MemoryPlaces`] implements both traits in memory and is what the CLI and
//! the tests run against.

mod memory;

use serde::{Deserialize, Serialize};

use crate::error::SyncResult;

pub use memory::MemoryPlaces;

/// Local row id. Never sent to the server.
pub type RowId = i64;

/// A history row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Local row id
    pub id: RowId,
    /// Sync guid
    pub guid: String,
    /// Visited URI
    pub uri: String,
    /// Page title
    pub title: String,
    /// Last visit time (seconds)
    pub atime: f64,
    /// Last local or applied-remote modification (seconds)
    pub mtime: f64,
    /// Visit counter
    pub popularity: u32,
}

/// A bookmark row. Folders are rows whose `uri` is their own guid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookmarkEntry {
    /// Local row id
    pub id: RowId,
    /// Sync guid
    pub guid: String,
    /// Bookmarked URI
    pub uri: String,
    /// Title
    pub title: String,
    /// Last local or applied-remote modification (seconds)
    pub mtime: f64,
    /// Guid of the containing folder
    pub parent_guid: Option<String>,
    /// Title of the containing folder
    pub parent_name: Option<String>,
    /// Position inside the parent
    pub position: i64,
    /// Tag names
    pub tags: Vec<String>,
    /// Tombstone flag: deleted locally, not yet pushed
    pub deleted: bool,
}

impl BookmarkEntry {
    /// True for folder placeholder rows
    pub fn is_folder(&self) -> bool {
        self.uri == self.guid
    }
}

/// History storage used by the engine.
pub trait HistoryStore: Send + Sync {
    /// Start a batch of writes
    fn begin_batch(&self) -> SyncResult<()>;

    /// Finish a batch of writes
    fn end_batch(&self) -> SyncResult<()>;

    /// Row id for a guid
    fn id_by_guid(&self, guid: &str) -> SyncResult<Option<RowId>>;

    /// Row by id
    fn get(&self, id: RowId) -> SyncResult<Option<HistoryEntry>>;

    /// Ids of rows with `mtime` strictly after `mtime`
    fn ids_for_mtime(&self, mtime: f64) -> SyncResult<Vec<RowId>>;

    /// Insert a row, returning its id
    fn add(&self, title: &str, uri: &str, guid: &str, atime: f64, mtime: f64)
        -> SyncResult<RowId>;

    /// Update the title
    fn set_title(&self, id: RowId, title: &str) -> SyncResult<()>;

    /// Update the last visit time
    fn set_atime(&self, id: RowId, atime: f64) -> SyncResult<()>;

    /// Update the modification time
    fn set_mtime(&self, id: RowId, mtime: f64) -> SyncResult<()>;
}

/// Bookmark and tag storage used by the engine.
pub trait BookmarkStore: Send + Sync {
    /// Start a batch of writes
    fn begin_batch(&self) -> SyncResult<()>;

    /// Finish a batch of writes
    fn end_batch(&self) -> SyncResult<()>;

    /// Row id for a guid, tombstones included
    fn id_by_guid(&self, guid: &str) -> SyncResult<Option<RowId>>;

    /// Row by id
    fn get(&self, id: RowId) -> SyncResult<Option<BookmarkEntry>>;

    /// Guids of every live row
    fn guids(&self) -> SyncResult<Vec<String>>;

    /// Ids of live rows with `mtime` strictly after `mtime`
    fn ids_for_mtime(&self, mtime: f64) -> SyncResult<Vec<RowId>>;

    /// Ids of tombstoned rows
    fn deleted_ids(&self) -> SyncResult<Vec<RowId>>;

    /// Guids of the live children of a folder, in position order
    fn children(&self, parent_guid: &str) -> SyncResult<Vec<String>>;

    /// Insert a row with its tags, creating missing tags
    fn add(&self, title: &str, uri: &str, guid: &str, tags: &[String]) -> SyncResult<RowId>;

    /// Update the title
    fn set_title(&self, id: RowId, title: &str) -> SyncResult<()>;

    /// Update the URI
    fn set_uri(&self, id: RowId, uri: &str) -> SyncResult<()>;

    /// Update the position inside the parent
    fn set_position(&self, id: RowId, position: i64) -> SyncResult<()>;

    /// Update the modification time
    fn set_mtime(&self, id: RowId, mtime: f64) -> SyncResult<()>;

    /// Move under a folder
    fn set_parent(&self, id: RowId, parent_guid: Option<&str>, parent_name: &str)
        -> SyncResult<()>;

    /// Tag names of a row
    fn tags(&self, id: RowId) -> SyncResult<Vec<String>>;

    /// Id of a tag by name
    fn tag_id(&self, name: &str) -> SyncResult<Option<RowId>>;

    /// Create a tag
    fn add_tag(&self, name: &str) -> SyncResult<RowId>;

    /// Attach a tag to a row
    fn add_tag_to(&self, tag_id: RowId, id: RowId) -> SyncResult<()>;

    /// Detach a tag from a row
    fn del_tag_from(&self, tag_id: RowId, id: RowId) -> SyncResult<()>;

    /// Delete a row for good
    fn remove(&self, id: RowId) -> SyncResult<()>;

    /// Drop tags no live row uses, returning how many went
    fn clean_tags(&self) -> SyncResult<usize>;
}
