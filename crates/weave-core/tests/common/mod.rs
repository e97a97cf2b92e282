//! Shared fixtures for integration tests: an in-memory server and a fixed
//! session source.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use weave_core::{
    now_seconds, round2, Bso, Envelope, KeyBundle, MemoryPlaces, OutgoingBso,
    ReconciliationEngine, RecordQuery, RemoteStore, Session, SessionSource, Storage, SyncError,
    SyncResult,
};

// ============================================================================
// In-memory server
// ============================================================================

#[derive(Default)]
struct RemoteState {
    clock: f64,
    collections: BTreeMap<String, BTreeMap<String, Bso>>,
    modified: BTreeMap<String, f64>,
    puts: Vec<(String, String)>,
    deletes: Vec<(String, String)>,
    fail_get: Option<String>,
    fail_deletes: bool,
    reject_auth: bool,
}

impl RemoteState {
    fn tick(&mut self) -> f64 {
        self.clock = round2(f64::max(self.clock + 0.01, now_seconds()));
        self.clock
    }

    fn check_auth(&self) -> SyncResult<()> {
        if self.reject_auth {
            return Err(SyncError::from_status(401, "invalid hawk credentials"));
        }
        Ok(())
    }
}

/// Sync storage server held in memory. Timestamps follow the wall clock and
/// strictly increase.
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw record with an explicit modification time.
    pub fn insert(&self, collection: &str, bso: Bso) {
        let mut state = self.state.lock();
        let modified = state.modified.entry(collection.to_string()).or_insert(0.0);
        *modified = f64::max(*modified, bso.modified);
        state.clock = f64::max(state.clock, bso.modified);
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(bso.id.clone(), bso);
    }

    /// Encrypt and store a record.
    pub fn insert_record<T: serde::Serialize>(
        &self,
        collection: &str,
        id: &str,
        record: &T,
        keys: &KeyBundle,
        modified: f64,
    ) {
        let outgoing = Envelope::seal(record, keys).unwrap().into_bso(id).unwrap();
        self.insert(
            collection,
            Bso {
                id: id.to_string(),
                modified,
                payload: outgoing.payload,
                sortindex: None,
            },
        );
    }

    /// Decrypt a stored record.
    pub fn record<T: serde::de::DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
        keys: &KeyBundle,
    ) -> Option<T> {
        let bso = self.bso(collection, id)?;
        Some(Envelope::from_bso(&bso).unwrap().open(keys).unwrap())
    }

    pub fn bso(&self, collection: &str, id: &str) -> Option<Bso> {
        self.state
            .lock()
            .collections
            .get(collection)
            .and_then(|records| records.get(id))
            .cloned()
    }

    pub fn ids(&self, collection: &str) -> Vec<String> {
        self.state
            .lock()
            .collections
            .get(collection)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// `(collection, id)` of every PUT, in order
    pub fn puts(&self) -> Vec<(String, String)> {
        self.state.lock().puts.clone()
    }

    /// Ids PUT into one collection, in order
    pub fn put_ids(&self, collection: &str) -> Vec<String> {
        self.puts()
            .into_iter()
            .filter(|(c, _)| c == collection)
            .map(|(_, id)| id)
            .collect()
    }

    pub fn deletes(&self) -> Vec<(String, String)> {
        self.state.lock().deletes.clone()
    }

    pub fn clear_log(&self) {
        let mut state = self.state.lock();
        state.puts.clear();
        state.deletes.clear();
    }

    /// Make listing `collection` fail with a 503.
    pub fn fail_get(&self, collection: Option<&str>) {
        self.state.lock().fail_get = collection.map(str::to_string);
    }

    /// Make every delete fail.
    pub fn fail_deletes(&self, fail: bool) {
        self.state.lock().fail_deletes = fail;
    }

    /// Answer every request with 401.
    pub fn reject_auth(&self, reject: bool) {
        self.state.lock().reject_auth = reject;
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn info_collections(&self) -> SyncResult<BTreeMap<String, f64>> {
        let state = self.state.lock();
        state.check_auth()?;
        Ok(state.modified.clone())
    }

    async fn get_records(&self, collection: &str, query: &RecordQuery) -> SyncResult<Vec<Bso>> {
        let state = self.state.lock();
        state.check_auth()?;
        if state.fail_get.as_deref() == Some(collection) {
            return Err(SyncError::from_status(503, "backend unavailable"));
        }
        Ok(state
            .collections
            .get(collection)
            .map(|records| {
                records
                    .values()
                    .filter(|bso| query.newer.map_or(true, |newer| bso.modified > newer))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_record(&self, collection: &str, id: &str) -> SyncResult<Bso> {
        let state = self.state.lock();
        state.check_auth()?;
        state
            .collections
            .get(collection)
            .and_then(|records| records.get(id))
            .cloned()
            .ok_or_else(|| SyncError::from_status(404, "not found"))
    }

    async fn put_record(&self, collection: &str, record: &OutgoingBso) -> SyncResult<f64> {
        let mut state = self.state.lock();
        state.check_auth()?;
        let modified = state.tick();
        state
            .puts
            .push((collection.to_string(), record.id.clone()));
        state.modified.insert(collection.to_string(), modified);
        state.collections.entry(collection.to_string()).or_default().insert(
            record.id.clone(),
            Bso {
                id: record.id.clone(),
                modified,
                payload: record.payload.clone(),
                sortindex: record.sortindex,
            },
        );
        Ok(modified)
    }

    async fn delete_record(&self, collection: &str, id: &str) -> bool {
        let mut state = self.state.lock();
        if state.reject_auth || state.fail_deletes {
            return false;
        }
        state
            .deletes
            .push((collection.to_string(), id.to_string()));
        let removed = state
            .collections
            .get_mut(collection)
            .and_then(|records| records.remove(id))
            .is_some();
        if removed {
            let modified = state.tick();
            state.modified.insert(collection.to_string(), modified);
        }
        true
    }
}

// ============================================================================
// Sessions
// ============================================================================

/// Hands out one fixed session. Optionally blocks until released.
pub struct StaticSession {
    session: Session,
    gate: Option<Arc<Semaphore>>,
    invalidations: AtomicUsize,
}

impl StaticSession {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            gate: None,
            invalidations: AtomicUsize::new(0),
        }
    }

    /// Block every `session()` call until a permit is added to `gate`.
    pub fn gated(session: Session, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(session)
        }
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionSource for StaticSession {
    async fn session(&self) -> SyncResult<Session> {
        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| SyncError::InvalidOperation(e.to_string()))?;
            permit.forget();
        }
        Ok(self.session.clone())
    }

    async fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Devices
// ============================================================================

/// One device: its own places, checkpoint storage and engine.
pub struct Device {
    pub places: Arc<MemoryPlaces>,
    pub engine: ReconciliationEngine,
    pub session: Session,
    _dir: TempDir,
}

impl Device {
    pub fn new(remote: &Arc<MemoryRemote>, keys: &KeyBundle) -> Self {
        let dir = TempDir::new().unwrap();
        let places = Arc::new(MemoryPlaces::new());
        let engine = ReconciliationEngine::new(
            places.clone(),
            places.clone(),
            Storage::open_in(dir.path()).unwrap(),
        );
        Self {
            places,
            engine,
            session: session(remote, keys),
            _dir: dir,
        }
    }
}

pub fn session(remote: &Arc<MemoryRemote>, keys: &KeyBundle) -> Session {
    Session {
        remote: remote.clone(),
        keys: keys.clone(),
    }
}
