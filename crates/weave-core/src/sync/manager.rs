//! Background sync worker
//!
//! The `SyncWorker` runs sync work on tokio tasks so callers never block on
//! the network, and reports progress on a broadcast channel.
//!
//! ## Features
//!
//! - At most one full sync in flight; a second request is accepted as a no-op
//! - Single-item history push and delete, each on its own task
//! - A connectivity gate and a stop flag checked before anything starts
//! - Status tracking (Idle, Syncing, Error) with change events
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncWorker                                                     │
//! │  ├── engine: ReconciliationEngine                               │
//! │  ├── sessions: Arc<dyn SessionSource>                           │
//! │  ├── in_flight: AtomicBool (released by InFlightGuard on drop)  │
//! │  ├── stopped: AtomicBool                                        │
//! │  ├── status: SyncStatus                                         │
//! │  └── event_tx: broadcast::Sender<SyncEvent>                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::events::{SyncEvent, SyncStatus};
use super::reconcile::{ReconciliationEngine, SyncReport};
use super::session::SessionSource;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::places::RowId;

/// Default capacity for the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Network availability check consulted before starting background work.
pub trait Connectivity: Send + Sync {
    /// True when the network is usable
    fn is_online(&self) -> bool;
}

/// Connectivity that always reports online
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Answer to a request for background work
#[derive(Debug)]
pub enum SyncRequest {
    /// A task was spawned
    Started(JoinHandle<()>),
    /// A full sync is already running; nothing was started
    AlreadySyncing,
    /// No network; nothing was started
    Offline,
    /// The worker is stopped; nothing was started
    Stopped,
}

impl SyncRequest {
    /// True for every answer except `Offline` and `Stopped`
    pub fn is_accepted(&self) -> bool {
        matches!(self, SyncRequest::Started(_) | SyncRequest::AlreadySyncing)
    }

    /// Wait for the spawned task, if any.
    pub async fn wait(self) {
        if let SyncRequest::Started(handle) = self {
            if let Err(err) = handle.await {
                warn!(error = %err, "Sync task did not complete");
            }
        }
    }
}

struct Shared {
    engine: ReconciliationEngine,
    sessions: Arc<dyn SessionSource>,
    connectivity: Arc<dyn Connectivity>,
    in_flight: AtomicBool,
    stopped: AtomicBool,
    status: RwLock<SyncStatus>,
    last_report: RwLock<Option<SyncReport>>,
    event_tx: broadcast::Sender<SyncEvent>,
}

impl Shared {
    fn emit(&self, event: SyncEvent) {
        let _ = self.event_tx.send(event);
    }

    fn set_status(&self, status: SyncStatus) {
        let mut current = self.status.write();
        if *current != status {
            *current = status.clone();
            drop(current);
            self.emit(SyncEvent::StatusChanged { status });
        }
    }

    /// Log a task failure, drop the session on authentication errors.
    async fn fail(&self, err: SyncError) {
        error!(error = %err, "Sync task failed");
        if err.kind() == ErrorKind::Authentication {
            self.sessions.invalidate().await;
        }
        let message = err.to_string();
        self.emit(SyncEvent::Failed {
            message: message.clone(),
        });
        self.set_status(SyncStatus::Error(message));
    }
}

/// Holds the in-flight flag; releases it on drop, unwinding included.
struct InFlightGuard {
    shared: Arc<Shared>,
}

impl InFlightGuard {
    fn acquire(shared: &Arc<Shared>) -> Option<Self> {
        shared
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                shared: shared.clone(),
            })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.shared.in_flight.store(false, Ordering::Release);
    }
}

/// Runs reconciliation in the background.
///
/// # Example
///
/// ```ignore
/// let worker = SyncWorker::new(engine, sessions);
/// let mut events = worker.subscribe();
///
/// worker.sync(true).wait().await;
///
/// while let Ok(event) = events.try_recv() {
///     println!("{:?}", event);
/// }
/// ```
pub struct SyncWorker {
    shared: Arc<Shared>,
}

impl SyncWorker {
    /// Create a worker that is always online.
    pub fn new(engine: ReconciliationEngine, sessions: Arc<dyn SessionSource>) -> Self {
        Self::with_connectivity(engine, sessions, Arc::new(AlwaysOnline))
    }

    /// Create a worker with a connectivity check.
    pub fn with_connectivity(
        engine: ReconciliationEngine,
        sessions: Arc<dyn SessionSource>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                engine,
                sessions,
                connectivity,
                in_flight: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                status: RwLock::new(SyncStatus::Idle),
                last_report: RwLock::new(None),
                event_tx,
            }),
        }
    }

    /// Subscribe to sync events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Current status
    pub fn status(&self) -> SyncStatus {
        self.shared.status.read().clone()
    }

    /// True while a full sync is running
    pub fn is_syncing(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// True after [`SyncWorker::stop`]
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Report of the last completed full sync
    pub fn last_report(&self) -> Option<SyncReport> {
        self.shared.last_report.read().clone()
    }

    /// The engine driven by this worker
    pub fn engine(&self) -> &ReconciliationEngine {
        &self.shared.engine
    }

    /// Refuse new work. Running tasks finish normally.
    pub fn stop(&self) {
        info!("Stopping sync worker");
        self.shared.stopped.store(true, Ordering::Release);
    }

    /// Accept new work again.
    pub fn resume(&self) {
        info!("Resuming sync worker");
        self.shared.stopped.store(false, Ordering::Release);
    }

    fn gate(&self) -> Option<SyncRequest> {
        if self.is_stopped() {
            debug!("Worker stopped, request refused");
            return Some(SyncRequest::Stopped);
        }
        if !self.shared.connectivity.is_online() {
            debug!("Offline, request refused");
            return Some(SyncRequest::Offline);
        }
        None
    }

    /// Start a full sync unless one is running.
    pub fn sync(&self, first_sync: bool) -> SyncRequest {
        if let Some(refused) = self.gate() {
            return refused;
        }
        let Some(guard) = InFlightGuard::acquire(&self.shared) else {
            debug!("Sync already in flight");
            return SyncRequest::AlreadySyncing;
        };

        let shared = self.shared.clone();
        SyncRequest::Started(tokio::spawn(async move {
            let _guard = guard;
            Self::sync_task(shared, first_sync).await;
        }))
    }

    async fn sync_task(shared: Arc<Shared>, first_sync: bool) {
        info!(first_sync, "Sync started");
        shared.set_status(SyncStatus::Syncing);
        shared.emit(SyncEvent::Started { first_sync });

        let result = async {
            let session = shared.sessions.session().await?;
            shared.engine.sync(&session, first_sync).await
        }
        .await;

        match result {
            Ok(report) => {
                for collection in &report.collections {
                    shared.emit(SyncEvent::CollectionSynced {
                        collection: collection.collection,
                        stats: collection.stats.clone(),
                        error: collection.error.clone(),
                    });
                }
                let success = report.is_success();
                let failed: Vec<String> = report
                    .collections
                    .iter()
                    .filter_map(|c| c.error.as_ref().map(|e| format!("{}: {}", c.collection, e)))
                    .collect();
                *shared.last_report.write() = Some(report);
                shared.emit(SyncEvent::Finished { success });

                if success {
                    info!("Sync finished");
                    shared.set_status(SyncStatus::Idle);
                } else {
                    warn!(failed = ?failed, "Sync finished with errors");
                    shared.set_status(SyncStatus::Error(failed.join("; ")));
                }
            }
            Err(err) => shared.fail(err).await,
        }
    }

    /// Upload one history row in the background.
    pub fn push_history(&self, id: RowId) -> SyncRequest {
        if let Some(refused) = self.gate() {
            return refused;
        }
        let shared = self.shared.clone();
        SyncRequest::Started(tokio::spawn(async move {
            let result = async {
                let session = shared.sessions.session().await?;
                shared.engine.push_history(&session, id).await
            }
            .await;
            match result {
                Ok(()) => debug!(id, "History row pushed"),
                Err(err) => shared.fail(err).await,
            }
        }))
    }

    /// Delete one history record on the server in the background.
    pub fn remove_from_history(&self, guid: impl Into<String>) -> SyncRequest {
        if let Some(refused) = self.gate() {
            return refused;
        }
        let guid = guid.into();
        let shared = self.shared.clone();
        SyncRequest::Started(tokio::spawn(async move {
            let result: SyncResult<bool> = async {
                let session = shared.sessions.session().await?;
                shared.engine.remove_from_history(&session, &guid).await
            }
            .await;
            match result {
                Ok(true) => debug!(guid = %guid, "History record removed"),
                Ok(false) => {}
                Err(err) => shared.fail(err).await,
            }
        }))
    }
}

impl std::fmt::Debug for SyncWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncWorker")
            .field("status", &self.status())
            .field("syncing", &self.is_syncing())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
