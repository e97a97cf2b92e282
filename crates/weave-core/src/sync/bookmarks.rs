//! Bookmark push and pull
//!
//! Bookmarks and folders share one local row type; a folder is a row whose
//! URI is its own guid. Pushing sends changed bookmarks, propagates
//! tombstones, then re-sends every affected folder with its current child
//! list (see [`super::folders`]). Pulling merges remote records by
//! last-writer-wins and deletes local rows the server no longer lists.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use super::folders;
use super::reconcile::{decode_record, queued_deletes, CollectionStats};
use super::session::Session;
use crate::error::SyncResult;
use crate::places::{BookmarkStore, RowId};
use crate::storage::Storage;
use crate::sync::envelope::Envelope;
use crate::types::{Bso, BookmarkRecord, Collection, RecordQuery, UNFILED_GUID};

const COLLECTION: &str = Collection::Bookmarks.as_str();

/// Parent of the well-known roots
pub const PLACES_ROOT_GUID: &str = "places";

/// Title of a well-known root folder
pub fn root_title(guid: &str) -> Option<&'static str> {
    match guid {
        "menu" => Some("Bookmarks Menu"),
        "toolbar" => Some("Bookmarks Toolbar"),
        "unfiled" => Some("Other Bookmarks"),
        "mobile" => Some("Mobile Bookmarks"),
        _ => None,
    }
}

/// Folders whose record must be re-sent, in discovery order
#[derive(Default)]
struct Parents(Vec<String>);

impl Parents {
    fn track(&mut self, guid: &str) {
        if !self.0.iter().any(|g| g == guid) {
            self.0.push(guid.to_string());
        }
    }
}

/// Upload local changes made after `checkpoint`.
pub async fn push(
    store: &dyn BookmarkStore,
    session: &Session,
    storage: &Storage,
    checkpoint: f64,
    stats: &mut CollectionStats,
) -> SyncResult<()> {
    let mut parents = Parents::default();

    let ids = store.ids_for_mtime(checkpoint)?;
    info!(count = ids.len(), checkpoint, "Pushing bookmarks");
    for id in ids {
        let Some(row) = store.get(id)? else {
            continue;
        };
        let parent_guid = row.parent_guid.clone().unwrap_or_else(|| UNFILED_GUID.to_string());
        parents.track(&parent_guid);
        if row.is_folder() {
            parents.track(&row.guid);
            continue;
        }

        let mut record =
            BookmarkRecord::bookmark(&row.guid, &row.uri, &row.title, row.tags, parent_guid);
        record.parent_name = row.parent_name;
        debug!(guid = %record.id, "Pushing bookmark");
        put(session, &record).await?;
        stats.pushed += 1;
    }

    for id in store.deleted_ids()? {
        let Some(row) = store.get(id)? else {
            continue;
        };
        parents.track(row.parent_guid.as_deref().unwrap_or(UNFILED_GUID));

        debug!(guid = %row.guid, "Deleting bookmark");
        if session.remote.delete_record(COLLECTION, &row.guid).await {
            stats.deleted_remote += 1;
        } else {
            let attempts = storage.queue_delete(COLLECTION, &row.guid)?;
            warn!(guid = %row.guid, attempts, "Remote delete failed, queued for retry");
            stats.failed_deletes += 1;
        }
        store.remove(id)?;
    }

    let plan = folders::plan(&parents.0, |guid| store.children(guid))?;
    for folder in plan.folders {
        let record = match store.id_by_guid(&folder.guid)? {
            Some(id) => match store.get(id)? {
                Some(row) => BookmarkRecord::folder(
                    &folder.guid,
                    &row.title,
                    row.parent_guid,
                    row.parent_name,
                    folder.children,
                ),
                None => continue,
            },
            None => match root_title(&folder.guid) {
                Some(title) => BookmarkRecord::folder(
                    &folder.guid,
                    title,
                    Some(PLACES_ROOT_GUID.to_string()),
                    Some(String::new()),
                    folder.children,
                ),
                None => {
                    warn!(guid = %folder.guid, "Unknown parent folder, not pushed");
                    continue;
                }
            },
        };
        debug!(guid = %record.id, children = ?record.children, "Pushing folder");
        put(session, &record).await?;
        stats.pushed += 1;
    }

    store.clean_tags()?;
    Ok(())
}

async fn put(session: &Session, record: &BookmarkRecord) -> SyncResult<()> {
    let bso = Envelope::seal(record, &session.keys)?.into_bso(record.id.clone())?;
    session.remote.put_record(COLLECTION, &bso).await?;
    Ok(())
}

/// Download the collection and merge it into the store.
///
/// On the first sync nothing is deleted locally. Records queued for remote
/// deletion are left out.
pub async fn pull(
    store: &dyn BookmarkStore,
    session: &Session,
    storage: &Storage,
    first_sync: bool,
    stats: &mut CollectionStats,
) -> SyncResult<()> {
    let records = session
        .remote
        .get_records(COLLECTION, &RecordQuery::default())
        .await?;
    let queued = queued_deletes(storage, COLLECTION)?;
    info!(count = records.len(), queued = queued.len(), first_sync, "Pulling bookmarks");

    store.begin_batch()?;
    let result = apply(store, session, &records, &queued, first_sync, stats);
    store.end_batch()?;
    result
}

fn apply(
    store: &dyn BookmarkStore,
    session: &Session,
    records: &[Bso],
    queued: &BTreeSet<String>,
    first_sync: bool,
    stats: &mut CollectionStats,
) -> SyncResult<()> {
    // Whatever the server no longer lists is deleted at the end
    let mut to_delete: BTreeSet<String> = if first_sync {
        BTreeSet::new()
    } else {
        store.guids()?.into_iter().collect()
    };

    for bso in records {
        if queued.contains(&bso.id) {
            stats.skipped += 1;
            continue;
        }
        let Some(record) = decode_record::<BookmarkRecord>(bso, &session.keys, COLLECTION)? else {
            // Still listed remotely, so not a deletion
            to_delete.remove(&bso.id);
            stats.malformed += 1;
            continue;
        };
        if !record.is_supported() {
            stats.skipped += 1;
            continue;
        }
        to_delete.remove(&record.id);
        if apply_one(store, bso, &record)? {
            stats.applied += 1;
        } else {
            stats.skipped += 1;
        }
    }

    for guid in to_delete {
        if let Some(id) = store.id_by_guid(&guid)? {
            debug!(guid = %guid, "Removing bookmark deleted remotely");
            store.remove(id)?;
            stats.deleted_local += 1;
        }
    }
    store.clean_tags()?;
    Ok(())
}

/// Merge one supported remote record. Returns false when it was skipped.
fn apply_one(store: &dyn BookmarkStore, bso: &Bso, record: &BookmarkRecord) -> SyncResult<bool> {
    let id = store.id_by_guid(&record.id)?;
    let local_mtime = match id {
        Some(id) => store.get(id)?.map(|row| row.mtime).unwrap_or(0.0),
        None => 0.0,
    };
    // Last writer wins
    if local_mtime >= bso.modified {
        return Ok(false);
    }

    debug!(guid = %record.id, modified = bso.modified, "Pulling bookmark");
    let title = record.title_or_default();
    let id = match id {
        None => match record.bmk_uri.as_deref() {
            Some(uri) => store.add(title, uri, &record.id, &initial_tags(record))?,
            // Folder placeholder
            None => store.add(title, &record.id, &record.id, &[])?,
        },
        Some(id) => {
            store.set_title(id, title)?;
            if let Some(uri) = record.bmk_uri.as_deref() {
                store.set_uri(id, uri)?;
            } else if let Some(children) = &record.children {
                for (position, child) in children.iter().enumerate() {
                    if let Some(child_id) = store.id_by_guid(child)? {
                        store.set_position(child_id, position as i64)?;
                    }
                }
            }
            reconcile_tags(store, id, record.tags.as_deref())?;
            id
        }
    };

    store.set_mtime(id, bso.modified)?;
    if let Some(parent_name) = record.parent_name.as_deref() {
        store.set_parent(id, record.parent_id.as_deref(), parent_name)?;
    }
    Ok(true)
}

/// Tags for a new bookmark: its own, else its folder name.
fn initial_tags(record: &BookmarkRecord) -> Vec<String> {
    match (&record.tags, record.parent_name.as_deref()) {
        (Some(tags), _) if !tags.is_empty() => tags.clone(),
        (_, Some(parent)) if !parent.is_empty() => vec![parent.to_string()],
        _ => Vec::new(),
    }
}

/// Make a row's tags match the remote list. `None` leaves them alone.
fn reconcile_tags(store: &dyn BookmarkStore, id: RowId, remote: Option<&[String]>) -> SyncResult<()> {
    let Some(remote) = remote else {
        return Ok(());
    };
    let current = store.tags(id)?;

    for tag in current.iter().filter(|t| !remote.contains(t)) {
        if let Some(tag_id) = store.tag_id(tag)? {
            store.del_tag_from(tag_id, id)?;
        }
    }
    for tag in remote.iter().filter(|t| !current.contains(t)) {
        let tag_id = match store.tag_id(tag)? {
            Some(tag_id) => tag_id,
            None => store.add_tag(tag)?,
        };
        store.add_tag_to(tag_id, id)?;
    }
    Ok(())
}
