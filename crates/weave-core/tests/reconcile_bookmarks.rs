//! Bookmark reconciliation against an in-memory server

mod common;

use std::sync::Arc;

use common::{Device, MemoryRemote};
use weave_core::sync::bookmarks;
use weave_core::sync::CollectionStats;
use serde_json::json;
use weave_core::{
    now_seconds, BookmarkRecord, BookmarkStore, Bso, Collection, KeyBundle, MemoryPlaces,
};

const BOOKMARKS: &str = "bookmarks";

fn guid_of(places: &MemoryPlaces, id: i64) -> String {
    places.get(id).unwrap().unwrap().guid
}

fn row_by_guid(places: &MemoryPlaces, guid: &str) -> weave_core::places::BookmarkEntry {
    let id = places.id_by_guid(guid).unwrap().unwrap();
    places.get(id).unwrap().unwrap()
}

// ============================================================================
// Pull
// ============================================================================

#[tokio::test]
async fn test_first_sync_builds_folder_and_child() {
    let remote = Arc::new(MemoryRemote::new());
    let keys = KeyBundle::generate();
    let device = Device::new(&remote, &keys);
    let now = now_seconds();

    remote.insert_record(
        BOOKMARKS,
        "folder1",
        &BookmarkRecord::folder(
            "folder1",
            "Work",
            Some("unfiled".into()),
            Some("Other Bookmarks".into()),
            vec!["bmk1".into()],
        ),
        &keys,
        now,
    );
    remote.insert_record(
        BOOKMARKS,
        "bmk1",
        &BookmarkRecord::bookmark("bmk1", "https://example.com", "Example", vec![], "folder1")
            .with_parent_name("Work"),
        &keys,
        now,
    );

    let report = device.engine.sync(&device.session, true).await.unwrap();
    assert!(report.is_success());
    let stats = &report.collection(Collection::Bookmarks).unwrap().stats;
    assert_eq!(stats.applied, 2);
    assert_eq!(stats.deleted_local, 0);

    let rows = device.places.bookmark_entries();
    assert_eq!(rows.len(), 2);

    let folder = row_by_guid(&device.places, "folder1");
    assert!(folder.is_folder());
    assert_eq!(folder.title, "Work");
    assert_eq!(folder.parent_guid.as_deref(), Some("unfiled"));

    let bookmark = row_by_guid(&device.places, "bmk1");
    assert_eq!(bookmark.uri, "https://example.com");
    assert_eq!(bookmark.parent_guid.as_deref(), Some("folder1"));
    assert_eq!(bookmark.parent_name.as_deref(), Some("Work"));
    assert_eq!(bookmark.tags, vec!["Work".to_string()]);
    assert_eq!(bookmark.mtime, now);
}

#[tokio::test]
async fn test_first_sync_keeps_unknown_local_rows() {
    let remote = Arc::new(MemoryRemote::new());
    let keys = KeyBundle::generate();
    let device = Device::new(&remote, &keys);
    let id = device
        .places
        .bookmark("https://local.example", "Local", Some("unfiled"), &[])
        .unwrap();
    // Older than any checkpoint, so it is not pushed either
    device.places.set_mtime(id, 0.05).unwrap();
    remote.insert_record(
        BOOKMARKS,
        "bmk1",
        &BookmarkRecord::bookmark("bmk1", "https://remote.example", "Remote", vec![], "unfiled"),
        &keys,
        now_seconds(),
    );

    let report = device.engine.sync(&device.session, true).await.unwrap();
    assert!(report.is_success());
    assert_eq!(
        report.collection(Collection::Bookmarks).unwrap().stats.deleted_local,
        0
    );
    assert!(device.places.get(id).unwrap().is_some());
    assert!(remote.bso(BOOKMARKS, &guid_of(&device.places, id)).is_none());
    assert_eq!(device.places.bookmark_entries().len(), 2);
}

#[tokio::test]
async fn test_malformed_record_keeps_local_row() {
    let remote = Arc::new(MemoryRemote::new());
    let keys = KeyBundle::generate();
    let device = Device::new(&remote, &keys);
    let now = now_seconds();
    remote.insert_record(
        BOOKMARKS,
        "bmk1",
        &BookmarkRecord::bookmark("bmk1", "https://example.com", "Example", vec![], "unfiled"),
        &keys,
        now,
    );
    device.engine.sync(&device.session, true).await.unwrap();
    assert!(device.places.id_by_guid("bmk1").unwrap().is_some());

    // Same guid, undecodable payload
    remote.insert(
        BOOKMARKS,
        Bso {
            id: "bmk1".into(),
            modified: now + 5.0,
            payload: "{garbage".into(),
            sortindex: None,
        },
    );
    let report = device.engine.sync(&device.session, false).await.unwrap();
    let stats = &report.collection(Collection::Bookmarks).unwrap().stats;
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.deleted_local, 0);

    let row = row_by_guid(&device.places, "bmk1");
    assert_eq!(row.uri, "https://example.com");
}

#[tokio::test]
async fn test_unsupported_records_are_skipped() {
    let remote = Arc::new(MemoryRemote::new());
    let keys = KeyBundle::generate();
    let device = Device::new(&remote, &keys);
    let now = now_seconds();
    remote.insert_record(
        BOOKMARKS,
        "keep",
        &BookmarkRecord::bookmark("keep", "https://keep.example", "Keep", vec![], "unfiled"),
        &keys,
        now,
    );
    let unsupported = [
        ("sep1", json!({"id": "sep1", "type": "separator", "parentid": "unfiled"})),
        ("query1", json!({"id": "query1", "type": "query", "bmkUri": "place:sort=8"})),
        ("notype", json!({"id": "notype", "title": "No type"})),
        ("gone", json!({"id": "gone", "deleted": true})),
    ];
    for (id, record) in &unsupported {
        remote.insert_record(BOOKMARKS, id, record, &keys, now);
    }

    let report = device.engine.sync(&device.session, true).await.unwrap();
    let stats = &report.collection(Collection::Bookmarks).unwrap().stats;
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.skipped, 4);
    assert_eq!(stats.malformed, 0);
    for (id, _) in &unsupported {
        assert!(device.places.id_by_guid(id).unwrap().is_none(), "{} pulled", id);
    }

    // Local rows under those guids are not protected by the listing
    let sep = device.places.add("Separator", "sep1", "sep1", &[]).unwrap();
    device.places.set_mtime(sep, 0.05).unwrap();
    let gone = device
        .places
        .add("Gone", "https://gone.example", "gone", &[])
        .unwrap();
    device.places.set_mtime(gone, 0.05).unwrap();
    remote.insert_record(
        BOOKMARKS,
        "keep",
        &BookmarkRecord::bookmark("keep", "https://keep.example", "Kept", vec![], "unfiled"),
        &keys,
        now + 5.0,
    );

    let report = device.engine.sync(&device.session, false).await.unwrap();
    let stats = &report.collection(Collection::Bookmarks).unwrap().stats;
    assert_eq!(stats.deleted_local, 2);
    assert!(device.places.get(sep).unwrap().is_none());
    assert!(device.places.get(gone).unwrap().is_none());
    assert_eq!(row_by_guid(&device.places, "keep").title, "Kept");
}

#[tokio::test]
async fn test_tombstone_converges_on_other_device() {
    let remote = Arc::new(MemoryRemote::new());
    let keys = KeyBundle::generate();
    let a = Device::new(&remote, &keys);
    let b = Device::new(&remote, &keys);

    let id = a
        .places
        .bookmark("https://gone.example", "Gone", Some("unfiled"), &[])
        .unwrap();
    let guid = guid_of(&a.places, id);
    a.engine.sync(&a.session, true).await.unwrap();
    b.engine.sync(&b.session, true).await.unwrap();
    assert!(b.places.id_by_guid(&guid).unwrap().is_some());

    a.places.mark_deleted(id).unwrap();
    let report = a.engine.sync(&a.session, false).await.unwrap();
    assert_eq!(
        report.collection(Collection::Bookmarks).unwrap().stats.deleted_remote,
        1
    );
    assert!(remote.bso(BOOKMARKS, &guid).is_none());
    assert!(a.places.get(id).unwrap().is_none());

    let report = b.engine.sync(&b.session, false).await.unwrap();
    assert_eq!(
        report.collection(Collection::Bookmarks).unwrap().stats.deleted_local,
        1
    );
    assert!(b.places.id_by_guid(&guid).unwrap().is_none());
    // The root placeholder is still listed remotely and survives
    assert!(b.places.id_by_guid("unfiled").unwrap().is_some());
}

#[tokio::test]
async fn test_remote_edit_updates_title_and_tags() {
    let remote = Arc::new(MemoryRemote::new());
    let keys = KeyBundle::generate();
    let a = Device::new(&remote, &keys);
    let b = Device::new(&remote, &keys);

    let id = a
        .places
        .bookmark("https://news.example", "News", Some("unfiled"), &["old".to_string()])
        .unwrap();
    let guid = guid_of(&a.places, id);
    a.engine.sync(&a.session, true).await.unwrap();
    b.engine.sync(&b.session, true).await.unwrap();

    let b_id = b.places.id_by_guid(&guid).unwrap().unwrap();
    b.places.set_title(b_id, "Daily News").unwrap();
    let old = b.places.tag_id("old").unwrap().unwrap();
    b.places.del_tag_from(old, b_id).unwrap();
    let tag = b.places.add_tag("daily").unwrap();
    b.places.add_tag_to(tag, b_id).unwrap();
    b.places.set_mtime(b_id, now_seconds() + 1.0).unwrap();
    b.engine.sync(&b.session, false).await.unwrap();

    a.engine.sync(&a.session, false).await.unwrap();
    let row = a.places.get(id).unwrap().unwrap();
    assert_eq!(row.title, "Daily News");
    assert_eq!(row.tags, vec!["daily".to_string()]);
    // Unused tags are pruned
    assert!(!a.places.tag_names().contains(&"old".to_string()));
}

// ============================================================================
// Push
// ============================================================================

#[tokio::test]
async fn test_parent_pushed_after_pending_child_folder() {
    let remote = Arc::new(MemoryRemote::new());
    let keys = KeyBundle::generate();
    let device = Device::new(&remote, &keys);
    let places = &device.places;

    let parent = places.folder("P", Some("unfiled")).unwrap();
    let parent_guid = guid_of(places, parent);
    let a = places
        .bookmark("https://a.example", "A", Some(parent_guid.as_str()), &[])
        .unwrap();
    let child_folder = places.folder("B", Some(parent_guid.as_str())).unwrap();
    let child_guid = guid_of(places, child_folder);
    let x = places
        .bookmark("https://x.example", "X", Some(child_guid.as_str()), &[])
        .unwrap();
    let (a_guid, x_guid) = (guid_of(places, a), guid_of(places, x));

    let mut stats = CollectionStats::default();
    bookmarks::push(
        places.as_ref(),
        &device.session,
        device.engine.storage(),
        0.1,
        &mut stats,
    )
    .await
    .unwrap();

    assert_eq!(
        remote.put_ids(BOOKMARKS),
        vec![
            a_guid.clone(),
            x_guid.clone(),
            child_guid.clone(),
            parent_guid.clone(),
            "unfiled".to_string(),
        ]
    );
    assert_eq!(stats.pushed, 5);

    let record: BookmarkRecord = remote.record(BOOKMARKS, &parent_guid, &keys).unwrap();
    assert_eq!(record.children, Some(vec![a_guid.clone(), child_guid.clone()]));
    assert_eq!(record.parent_id.as_deref(), Some("unfiled"));
    assert_eq!(record.title.as_deref(), Some("P"));

    let root: BookmarkRecord = remote.record(BOOKMARKS, "unfiled", &keys).unwrap();
    assert_eq!(root.parent_id.as_deref(), Some("places"));
    assert_eq!(root.title.as_deref(), Some("Other Bookmarks"));
    assert_eq!(root.children, Some(vec![parent_guid]));

    let bookmark: BookmarkRecord = remote.record(BOOKMARKS, &x_guid, &keys).unwrap();
    assert_eq!(bookmark.bmk_uri.as_deref(), Some("https://x.example"));
    assert_eq!(bookmark.parent_id.as_deref(), Some(child_guid.as_str()));
    assert_eq!(bookmark.parent_name.as_deref(), Some("B"));
}

#[tokio::test]
async fn test_failed_tombstone_delete_is_queued() {
    let remote = Arc::new(MemoryRemote::new());
    let keys = KeyBundle::generate();
    let device = Device::new(&remote, &keys);
    let id = device
        .places
        .bookmark("https://a.example", "A", Some("unfiled"), &[])
        .unwrap();
    let guid = guid_of(&device.places, id);
    device.engine.sync(&device.session, true).await.unwrap();

    device.places.mark_deleted(id).unwrap();
    remote.fail_deletes(true);
    let report = device.engine.sync(&device.session, false).await.unwrap();
    let stats = &report.collection(Collection::Bookmarks).unwrap().stats;
    assert_eq!(stats.failed_deletes, 1);
    assert!(device.places.get(id).unwrap().is_none());
    // Still listed remotely, but not pulled back in
    assert!(remote.bso(BOOKMARKS, &guid).is_some());
    assert!(device.places.id_by_guid(&guid).unwrap().is_none());

    let pending = device.engine.storage().pending_deletes().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].collection, BOOKMARKS);
    assert_eq!(pending[0].guid, guid);

    remote.fail_deletes(false);
    let report = device.engine.sync(&device.session, false).await.unwrap();
    assert_eq!(report.retried_deletes, 1);
    assert!(remote.bso(BOOKMARKS, &guid).is_none());
}
