//! In-memory places store

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::RwLock;
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{BookmarkEntry, BookmarkStore, HistoryEntry, HistoryStore, RowId};
use crate::error::{SyncError, SyncResult};
use crate::types::now_seconds;

/// Length of generated guids
const GUID_LENGTH: usize = 12;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PlacesData {
    next_id: RowId,
    history: BTreeMap<RowId, HistoryEntry>,
    bookmarks: BTreeMap<RowId, BookmarkEntry>,
    tags: BTreeMap<RowId, String>,
    #[serde(skip)]
    batch_depth: u32,
    #[serde(skip)]
    batches: u32,
}

impl PlacesData {
    fn allocate_id(&mut self) -> RowId {
        self.next_id += 1;
        self.next_id
    }

    fn history_mut(&mut self, id: RowId) -> SyncResult<&mut HistoryEntry> {
        self.history
            .get_mut(&id)
            .ok_or_else(|| SyncError::Places(format!("No history row {}", id)))
    }

    fn bookmark_mut(&mut self, id: RowId) -> SyncResult<&mut BookmarkEntry> {
        self.bookmarks
            .get_mut(&id)
            .ok_or_else(|| SyncError::Places(format!("No bookmark row {}", id)))
    }

    fn tag_name(&self, tag_id: RowId) -> SyncResult<String> {
        self.tags
            .get(&tag_id)
            .cloned()
            .ok_or_else(|| SyncError::Places(format!("No tag {}", tag_id)))
    }

    fn ensure_tag(&mut self, name: &str) -> RowId {
        if let Some((&id, _)) = self.tags.iter().find(|(_, n)| n.as_str() == name) {
            return id;
        }
        let id = self.allocate_id();
        self.tags.insert(id, name.to_string());
        id
    }

    fn begin(&mut self) {
        self.batch_depth += 1;
    }

    fn end(&mut self) -> SyncResult<()> {
        if self.batch_depth == 0 {
            return Err(SyncError::InvalidOperation(
                "end_batch without begin_batch".to_string(),
            ));
        }
        self.batch_depth -= 1;
        if self.batch_depth == 0 {
            self.batches += 1;
        }
        Ok(())
    }
}

/// History and bookmarks held in memory, optionally persisted as JSON.
#[derive(Debug, Default)]
pub struct MemoryPlaces {
    data: RwLock<PlacesData>,
}

impl MemoryPlaces {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON snapshot; a missing file gives an empty store.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let bytes = std::fs::read(path)?;
        let data: PlacesData = serde_json::from_slice(&bytes)?;
        Ok(Self {
            data: RwLock::new(data),
        })
    }

    /// Write a JSON snapshot.
    pub fn save(&self, path: impl AsRef<Path>) -> SyncResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(&*self.data.read())?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Local edits
    // ═══════════════════════════════════════════════════════════════════════

    /// Record a visit, as the browser would.
    pub fn visit(&self, uri: &str, title: &str, atime: f64) -> SyncResult<RowId> {
        let guid = generate_guid();
        HistoryStore::add(self, title, uri, &guid, atime, atime)
    }

    /// Forget a history row locally, returning its guid.
    pub fn forget(&self, id: RowId) -> Option<String> {
        self.data.write().history.remove(&id).map(|row| row.guid)
    }

    /// Create a bookmark, as the browser would.
    pub fn bookmark(
        &self,
        uri: &str,
        title: &str,
        parent_guid: Option<&str>,
        tags: &[String],
    ) -> SyncResult<RowId> {
        let guid = generate_guid();
        let id = BookmarkStore::add(self, title, uri, &guid, tags)?;
        self.attach(id, parent_guid)?;
        Ok(id)
    }

    /// Create a folder placeholder row.
    pub fn folder(&self, title: &str, parent_guid: Option<&str>) -> SyncResult<RowId> {
        let guid = generate_guid();
        let id = BookmarkStore::add(self, title, &guid, &guid, &[])?;
        self.attach(id, parent_guid)?;
        Ok(id)
    }

    /// Tombstone a bookmark so the next sync deletes it remotely.
    pub fn mark_deleted(&self, id: RowId) -> SyncResult<()> {
        let mut data = self.data.write();
        let row = data.bookmark_mut(id)?;
        row.deleted = true;
        row.mtime = now_seconds();
        Ok(())
    }

    /// Every history row, in id order
    pub fn history_entries(&self) -> Vec<HistoryEntry> {
        self.data.read().history.values().cloned().collect()
    }

    /// Every bookmark row, tombstones included, in id order
    pub fn bookmark_entries(&self) -> Vec<BookmarkEntry> {
        self.data.read().bookmarks.values().cloned().collect()
    }

    /// Every tag name
    pub fn tag_names(&self) -> Vec<String> {
        self.data.read().tags.values().cloned().collect()
    }

    /// Number of completed outermost batches
    pub fn completed_batches(&self) -> u32 {
        self.data.read().batches
    }

    /// True while a batch is open
    pub fn in_batch(&self) -> bool {
        self.data.read().batch_depth > 0
    }

    fn attach(&self, id: RowId, parent_guid: Option<&str>) -> SyncResult<()> {
        let Some(parent_guid) = parent_guid else {
            return Ok(());
        };
        let mut data = self.data.write();
        let (parent_name, position) = {
            let name = data
                .bookmarks
                .values()
                .find(|b| b.guid == parent_guid)
                .map(|b| b.title.clone())
                .unwrap_or_default();
            let position = data
                .bookmarks
                .values()
                .filter(|b| b.parent_guid.as_deref() == Some(parent_guid))
                .count() as i64;
            (name, position)
        };
        let row = data.bookmark_mut(id)?;
        row.parent_guid = Some(parent_guid.to_string());
        row.parent_name = Some(parent_name);
        row.position = position;
        Ok(())
    }
}

fn generate_guid() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GUID_LENGTH)
        .map(char::from)
        .collect()
}

impl HistoryStore for MemoryPlaces {
    fn begin_batch(&self) -> SyncResult<()> {
        self.data.write().begin();
        Ok(())
    }

    fn end_batch(&self) -> SyncResult<()> {
        self.data.write().end()
    }

    fn id_by_guid(&self, guid: &str) -> SyncResult<Option<RowId>> {
        Ok(self
            .data
            .read()
            .history
            .values()
            .find(|h| h.guid == guid)
            .map(|h| h.id))
    }

    fn get(&self, id: RowId) -> SyncResult<Option<HistoryEntry>> {
        Ok(self.data.read().history.get(&id).cloned())
    }

    fn ids_for_mtime(&self, mtime: f64) -> SyncResult<Vec<RowId>> {
        Ok(self
            .data
            .read()
            .history
            .values()
            .filter(|h| h.mtime > mtime)
            .map(|h| h.id)
            .collect())
    }

    /// Rows are unique by URI (trailing slash ignored); adding a known URI
    /// updates it unless the stored visit is newer.
    fn add(
        &self,
        title: &str,
        uri: &str,
        guid: &str,
        atime: f64,
        mtime: f64,
    ) -> SyncResult<RowId> {
        let uri = uri.trim_end_matches('/');
        if uri.is_empty() {
            return Err(SyncError::Places("History URI is empty".to_string()));
        }
        let mut data = self.data.write();

        if let Some(row) = data.history.values_mut().find(|h| h.uri == uri) {
            if row.atime <= atime {
                row.atime = atime;
                row.mtime = mtime;
                row.title = title.to_string();
                row.guid = guid.to_string();
                row.popularity += 1;
            }
            return Ok(row.id);
        }

        let id = data.allocate_id();
        data.history.insert(
            id,
            HistoryEntry {
                id,
                guid: guid.to_string(),
                uri: uri.to_string(),
                title: title.to_string(),
                atime,
                mtime,
                popularity: 0,
            },
        );
        Ok(id)
    }

    fn set_title(&self, id: RowId, title: &str) -> SyncResult<()> {
        self.data.write().history_mut(id)?.title = title.to_string();
        Ok(())
    }

    fn set_atime(&self, id: RowId, atime: f64) -> SyncResult<()> {
        self.data.write().history_mut(id)?.atime = atime;
        Ok(())
    }

    fn set_mtime(&self, id: RowId, mtime: f64) -> SyncResult<()> {
        self.data.write().history_mut(id)?.mtime = mtime;
        Ok(())
    }
}

impl BookmarkStore for MemoryPlaces {
    fn begin_batch(&self) -> SyncResult<()> {
        self.data.write().begin();
        Ok(())
    }

    fn end_batch(&self) -> SyncResult<()> {
        self.data.write().end()
    }

    fn id_by_guid(&self, guid: &str) -> SyncResult<Option<RowId>> {
        Ok(self
            .data
            .read()
            .bookmarks
            .values()
            .find(|b| b.guid == guid)
            .map(|b| b.id))
    }

    fn get(&self, id: RowId) -> SyncResult<Option<BookmarkEntry>> {
        Ok(self.data.read().bookmarks.get(&id).cloned())
    }

    fn guids(&self) -> SyncResult<Vec<String>> {
        Ok(self
            .data
            .read()
            .bookmarks
            .values()
            .filter(|b| !b.deleted)
            .map(|b| b.guid.clone())
            .collect())
    }

    fn ids_for_mtime(&self, mtime: f64) -> SyncResult<Vec<RowId>> {
        Ok(self
            .data
            .read()
            .bookmarks
            .values()
            .filter(|b| !b.deleted && b.mtime > mtime)
            .map(|b| b.id)
            .collect())
    }

    fn deleted_ids(&self) -> SyncResult<Vec<RowId>> {
        Ok(self
            .data
            .read()
            .bookmarks
            .values()
            .filter(|b| b.deleted)
            .map(|b| b.id)
            .collect())
    }

    fn children(&self, parent_guid: &str) -> SyncResult<Vec<String>> {
        let data = self.data.read();
        let mut children: Vec<&BookmarkEntry> = data
            .bookmarks
            .values()
            .filter(|b| !b.deleted && b.parent_guid.as_deref() == Some(parent_guid))
            .collect();
        children.sort_by_key(|b| (b.position, b.id));
        Ok(children.into_iter().map(|b| b.guid.clone()).collect())
    }

    fn add(&self, title: &str, uri: &str, guid: &str, tags: &[String]) -> SyncResult<RowId> {
        let mut data = self.data.write();
        if data.bookmarks.values().any(|b| b.guid == guid) {
            return Err(SyncError::Places(format!("Duplicate bookmark guid {}", guid)));
        }
        for tag in tags {
            data.ensure_tag(tag);
        }
        let mut unique_tags: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags {
            if !unique_tags.contains(tag) {
                unique_tags.push(tag.clone());
            }
        }

        let id = data.allocate_id();
        data.bookmarks.insert(
            id,
            BookmarkEntry {
                id,
                guid: guid.to_string(),
                uri: uri.to_string(),
                title: title.to_string(),
                mtime: now_seconds(),
                parent_guid: None,
                parent_name: None,
                position: 0,
                tags: unique_tags,
                deleted: false,
            },
        );
        Ok(id)
    }

    fn set_title(&self, id: RowId, title: &str) -> SyncResult<()> {
        self.data.write().bookmark_mut(id)?.title = title.to_string();
        Ok(())
    }

    fn set_uri(&self, id: RowId, uri: &str) -> SyncResult<()> {
        self.data.write().bookmark_mut(id)?.uri = uri.to_string();
        Ok(())
    }

    fn set_position(&self, id: RowId, position: i64) -> SyncResult<()> {
        self.data.write().bookmark_mut(id)?.position = position;
        Ok(())
    }

    fn set_mtime(&self, id: RowId, mtime: f64) -> SyncResult<()> {
        self.data.write().bookmark_mut(id)?.mtime = mtime;
        Ok(())
    }

    fn set_parent(
        &self,
        id: RowId,
        parent_guid: Option<&str>,
        parent_name: &str,
    ) -> SyncResult<()> {
        let mut data = self.data.write();
        let row = data.bookmark_mut(id)?;
        row.parent_guid = parent_guid.map(str::to_string);
        row.parent_name = Some(parent_name.to_string());
        Ok(())
    }

    fn tags(&self, id: RowId) -> SyncResult<Vec<String>> {
        let data = self.data.read();
        data.bookmarks
            .get(&id)
            .map(|b| b.tags.clone())
            .ok_or_else(|| SyncError::Places(format!("No bookmark row {}", id)))
    }

    fn tag_id(&self, name: &str) -> SyncResult<Option<RowId>> {
        Ok(self
            .data
            .read()
            .tags
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(&id, _)| id))
    }

    fn add_tag(&self, name: &str) -> SyncResult<RowId> {
        Ok(self.data.write().ensure_tag(name))
    }

    fn add_tag_to(&self, tag_id: RowId, id: RowId) -> SyncResult<()> {
        let mut data = self.data.write();
        let name = data.tag_name(tag_id)?;
        let row = data.bookmark_mut(id)?;
        if !row.tags.contains(&name) {
            row.tags.push(name);
        }
        Ok(())
    }

    fn del_tag_from(&self, tag_id: RowId, id: RowId) -> SyncResult<()> {
        let mut data = self.data.write();
        let name = data.tag_name(tag_id)?;
        data.bookmark_mut(id)?.tags.retain(|t| *t != name);
        Ok(())
    }

    fn remove(&self, id: RowId) -> SyncResult<()> {
        self.data.write().bookmarks.remove(&id);
        Ok(())
    }

    fn clean_tags(&self) -> SyncResult<usize> {
        let mut data = self.data.write();
        let PlacesData {
            bookmarks, tags, ..
        } = &mut *data;
        let before = tags.len();
        tags.retain(|_, name| {
            bookmarks
                .values()
                .any(|b| !b.deleted && b.tags.iter().any(|t| t == name))
        });
        Ok(before - tags.len())
    }
}
