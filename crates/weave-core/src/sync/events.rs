//! Sync event types and status tracking
//!
//! ## Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncStatus: Worker state                                       │
//! │  ├── Idle: No task running                                      │
//! │  ├── Syncing: A task holds the in-flight flag                   │
//! │  └── Error: Last task failed with error message                 │
//! │                                                                 │
//! │  SyncEvent: Notifications about sync activity                   │
//! │  ├── Started: A full pass began                                 │
//! │  ├── CollectionSynced: One collection finished                  │
//! │  ├── Finished: A full pass completed                            │
//! │  ├── Failed: A task failed                                      │
//! │  └── StatusChanged: Worker status moved                         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use super::reconcile::CollectionStats;
use crate::types::Collection;

/// Status of the sync worker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SyncStatus {
    /// No task running
    #[default]
    Idle,
    /// A task is running
    Syncing,
    /// The last task failed
    Error(String),
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Idle => write!(f, "Idle"),
            SyncStatus::Syncing => write!(f, "Syncing"),
            SyncStatus::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

/// Events emitted by the sync worker
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A full pass began
    Started {
        /// Whether this is the account's first sync on this device
        first_sync: bool,
    },
    /// One collection finished, successfully or not
    CollectionSynced {
        /// The collection
        collection: Collection,
        /// Counters for the collection
        stats: CollectionStats,
        /// Error that aborted it
        error: Option<String>,
    },
    /// A full pass completed
    Finished {
        /// True when every collection synced
        success: bool,
    },
    /// A task failed
    Failed {
        /// Error message
        message: String,
    },
    /// Worker status changed
    StatusChanged {
        /// The new status
        status: SyncStatus,
    },
}

impl SyncEvent {
    /// Collection this event is about, if any
    pub fn collection(&self) -> Option<Collection> {
        match self {
            SyncEvent::CollectionSynced { collection, .. } => Some(*collection),
            _ => None,
        }
    }
}
