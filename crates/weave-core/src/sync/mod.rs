//! Reconciliation layer
//!
//! Everything that talks to the server on behalf of the local places data.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncWorker (background tasks, in-flight guard, events)         │
//! │  └── ReconciliationEngine                                       │
//! │      ├── history   (push rows, pull + merge records)            │
//! │      ├── bookmarks (push rows + tombstones, pull + merge)       │
//! │      │   └── folders (push order for folder records)            │
//! │      └── Storage   (checkpoint, pending deletes)                │
//! │                                                                 │
//! │  SessionManager (token exchange, bulk keys)                     │
//! │  └── Session { RemoteStore, KeyBundle }                         │
//! │                                                                 │
//! │  Envelope (AES-256-CBC + HMAC-SHA256 record crypto)             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let sessions = Arc::new(SessionManager::new(identity, &config)?);
//! let places = Arc::new(MemoryPlaces::load(&places_path)?);
//! let engine = ReconciliationEngine::new(places.clone(), places, Storage::open_in(&config.data_dir)?);
//!
//! let worker = SyncWorker::new(engine, sessions);
//! worker.sync(true).wait().await;
//! println!("{:?}", worker.last_report());
//! ```

pub mod bookmarks;
pub mod envelope;
pub mod events;
pub mod folders;
pub mod history;
pub mod manager;
pub mod reconcile;
pub mod session;

pub use envelope::Envelope;
pub use events::{SyncEvent, SyncStatus};
pub use folders::{FolderPlan, PlannedFolder};
pub use manager::{AlwaysOnline, Connectivity, SyncRequest, SyncWorker};
pub use reconcile::{
    CollectionReport, CollectionStats, ReconciliationEngine, SyncReport, MAX_DELETE_ATTEMPTS,
};
pub use session::{
    fetch_bulk_keys, seal_bulk_keys, AccountBundle, IdentityProvider, Session, SessionManager,
    SessionSource,
};
