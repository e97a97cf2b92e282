//! Weave Core Library
//!
//! Client engine for the Mozilla Sync 1.5 protocol: history and bookmark
//! reconciliation against a Sync storage server.
//!
//! ## Overview
//!
//! A device exchanges an identity assertion for short-lived storage
//! credentials, downloads the account's bulk keys, and then pushes and pulls
//! encrypted records. Every record on the server is an AES-256-CBC +
//! HMAC-SHA256 envelope; the server never sees plaintext.
//!
//! ## Core Pieces
//!
//! - **Key derivation**: HKDF-SHA256 from the account key kB
//! - **Record crypto**: [`sync::Envelope`]
//! - **Remote access**: [`client::TokenClient`], [`client::StorageClient`]
//!   (Hawk-signed), behind the [`client::RemoteStore`] trait
//! - **Reconciliation**: [`sync::ReconciliationEngine`] over the
//!   [`places::HistoryStore`] and [`places::BookmarkStore`] traits
//! - **Background work**: [`sync::SyncWorker`]
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use weave_core::{AccountBundle, MemoryPlaces, ReconciliationEngine, SessionManager, Storage, SyncConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::default();
//!     let identity = Arc::new(AccountBundle::load("account.json")?);
//!     let sessions = SessionManager::new(identity, &config)?;
//!
//!     let places = Arc::new(MemoryPlaces::new());
//!     let engine = ReconciliationEngine::new(places.clone(), places, Storage::open_in(&config.data_dir)?);
//!
//!     let session = sessions.session().await?;
//!     let report = engine.sync(&session, true).await?;
//!     println!("synced: {}", report.is_success());
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod places;
pub mod storage;
pub mod sync;
pub mod types;

// Re-exports
pub use client::{RemoteStore, StorageClient, TokenClient};
pub use config::SyncConfig;
pub use crypto::{client_state, hkdf, KeyBundle};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use places::{BookmarkStore, HistoryStore, MemoryPlaces};
pub use storage::Storage;
pub use sync::{
    AccountBundle, Envelope, IdentityProvider, ReconciliationEngine, Session, SessionManager,
    SessionSource, SyncEvent, SyncReport, SyncRequest, SyncStatus, SyncWorker,
};
pub use types::*;
