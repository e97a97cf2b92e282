//! History push and pull

use std::collections::BTreeSet;

use tracing::{debug, info};

use super::reconcile::{decode_record, queued_deletes, CollectionStats};
use super::session::Session;
use crate::error::{SyncError, SyncResult};
use crate::places::{HistoryStore, RowId};
use crate::storage::Storage;
use crate::sync::envelope::Envelope;
use crate::types::{Bso, Collection, HistoryRecord, RecordQuery, Visit};

const COLLECTION: &str = Collection::History.as_str();

/// Wire record for a local row, `None` if the row is gone.
pub fn record_for(store: &dyn HistoryStore, id: RowId) -> SyncResult<Option<HistoryRecord>> {
    Ok(store.get(id)?.map(|row| HistoryRecord {
        id: row.guid,
        hist_uri: Some(row.uri),
        title: Some(row.title),
        visits: vec![Visit::at_seconds(row.atime)],
    }))
}

/// Upload one row.
pub async fn push_one(store: &dyn HistoryStore, session: &Session, id: RowId) -> SyncResult<()> {
    let record = record_for(store, id)?
        .ok_or_else(|| SyncError::InvalidOperation(format!("No history row {}", id)))?;
    debug!(guid = %record.id, "Pushing history item");
    let bso = Envelope::seal(&record, &session.keys)?.into_bso(record.id.clone())?;
    session.remote.put_record(COLLECTION, &bso).await?;
    Ok(())
}

/// Upload every row modified after `checkpoint`.
pub async fn push(
    store: &dyn HistoryStore,
    session: &Session,
    checkpoint: f64,
    stats: &mut CollectionStats,
) -> SyncResult<()> {
    let ids = store.ids_for_mtime(checkpoint)?;
    info!(count = ids.len(), checkpoint, "Pushing history");
    for id in ids {
        push_one(store, session, id).await?;
        stats.pushed += 1;
    }
    Ok(())
}

/// Download the collection and merge it into the store.
///
/// Records queued for remote deletion are left out.
pub async fn pull(
    store: &dyn HistoryStore,
    session: &Session,
    storage: &Storage,
    checkpoint: f64,
    stats: &mut CollectionStats,
) -> SyncResult<()> {
    let records = session
        .remote
        .get_records(COLLECTION, &RecordQuery::default())
        .await?;
    let queued = queued_deletes(storage, COLLECTION)?;
    info!(count = records.len(), queued = queued.len(), "Pulling history");

    store.begin_batch()?;
    let result = apply(store, session, &records, &queued, checkpoint, stats);
    store.end_batch()?;
    result
}

fn apply(
    store: &dyn HistoryStore,
    session: &Session,
    records: &[Bso],
    queued: &BTreeSet<String>,
    checkpoint: f64,
    stats: &mut CollectionStats,
) -> SyncResult<()> {
    for bso in records {
        if queued.contains(&bso.id) {
            stats.skipped += 1;
            continue;
        }
        let Some(record) = decode_record::<HistoryRecord>(bso, &session.keys, COLLECTION)? else {
            stats.malformed += 1;
            continue;
        };
        if apply_one(store, bso, record, checkpoint)? {
            stats.applied += 1;
        } else {
            stats.skipped += 1;
        }
    }
    Ok(())
}

/// Merge one remote record. Returns false when it was skipped.
fn apply_one(
    store: &dyn HistoryStore,
    bso: &Bso,
    record: HistoryRecord,
    checkpoint: f64,
) -> SyncResult<bool> {
    let Some(uri) = record.hist_uri.as_deref() else {
        return Ok(false);
    };
    let id = store.id_by_guid(&record.id)?;
    let local_mtime = match id {
        Some(id) => store.get(id)?.map(|row| row.mtime).unwrap_or(0.0),
        None => 0.0,
    };
    // Last writer wins
    if local_mtime >= bso.modified {
        return Ok(false);
    }
    let Some(atime) = record.last_visit() else {
        return Ok(false);
    };
    // Seen during an earlier sync
    if atime < checkpoint {
        return Ok(false);
    }
    let title = match record.title.as_deref() {
        Some(title) if !title.is_empty() => title.trim(),
        _ => return Ok(false),
    };

    debug!(guid = %record.id, modified = bso.modified, "Pulling history item");
    match id {
        None => {
            store.add(title, uri, &record.id, atime, bso.modified)?;
        }
        Some(id) => {
            store.set_title(id, title)?;
            store.set_atime(id, atime)?;
            store.set_mtime(id, bso.modified)?;
        }
    }
    Ok(true)
}
