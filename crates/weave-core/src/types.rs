//! Core types for the weave sync engine

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

mod credentials;
mod records;

pub use credentials::Credentials;
pub use records::{BookmarkKind, BookmarkRecord, CryptoKeysRecord, HistoryRecord, Visit};

/// Checkpoint value meaning "never synced"
pub const NEVER_SYNCED: f64 = 0.1;

/// Guid of the well-known "unfiled bookmarks" root folder
pub const UNFILED_GUID: &str = "unfiled";

/// Collections this engine reconciles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    /// Browsing history
    History,
    /// Bookmarks, folders and their tags
    Bookmarks,
}

impl Collection {
    /// All collections in sync order
    pub const ALL: [Collection; 2] = [Collection::History, Collection::Bookmarks];

    /// Remote collection name
    pub const fn as_str(&self) -> &'static str {
        match self {
            Collection::History => "history",
            Collection::Bookmarks => "bookmarks",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Last-synced server modification time per collection.
///
/// Missing collections read as [`NEVER_SYNCED`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionCheckpoint(BTreeMap<String, f64>);

impl CollectionCheckpoint {
    /// Checkpoint with every engine collection at [`NEVER_SYNCED`]
    pub fn never_synced() -> Self {
        let mut checkpoint = Self::default();
        for collection in Collection::ALL {
            checkpoint.set(collection.as_str(), NEVER_SYNCED);
        }
        checkpoint
    }

    /// Build from a server `info/collections` response.
    pub fn from_times(times: BTreeMap<String, f64>) -> Self {
        Self(times)
    }

    /// Last-synced time for a collection
    pub fn get(&self, collection: &str) -> f64 {
        self.0.get(collection).copied().unwrap_or(NEVER_SYNCED)
    }

    /// Raw lookup, `None` when the collection is absent
    pub fn lookup(&self, collection: &str) -> Option<f64> {
        self.0.get(collection).copied()
    }

    /// Set the time for a collection
    pub fn set(&mut self, collection: impl Into<String>, time: f64) {
        self.0.insert(collection.into(), time);
    }

    /// Iterate over `(collection, time)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of collections recorded
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no collection is recorded
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Round a timestamp to the server's 2-decimal precision.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Current time in seconds, 2-decimal precision
pub fn now_seconds() -> f64 {
    round2(chrono::Utc::now().timestamp_millis() as f64 / 1000.0)
}

/// Basic Storage Object as returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bso {
    /// Record guid
    pub id: String,
    /// Server modification time (seconds)
    #[serde(default)]
    pub modified: f64,
    /// JSON-encoded encrypted envelope
    #[serde(default)]
    pub payload: String,
    /// Server-side sort weight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sortindex: Option<i64>,
}

/// Record written to the server. The `id` goes in the URL, not the body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingBso {
    /// Record guid
    #[serde(skip)]
    pub id: String,
    /// JSON-encoded encrypted envelope
    pub payload: String,
    /// Client modification time (seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<f64>,
    /// Server-side sort weight
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sortindex: Option<i64>,
    /// Time to live in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

impl OutgoingBso {
    /// New record stamped with the current client time
    pub fn new(id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            modified: Some(now_seconds()),
            sortindex: None,
            ttl: None,
        }
    }
}

/// Server-side ordering for collection listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Largest modification time first
    Newest,
    /// Highest sortindex first
    Index,
    /// Smallest modification time first
    Oldest,
}

impl SortOrder {
    /// Query parameter value
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Newest => "newest",
            SortOrder::Index => "index",
            SortOrder::Oldest => "oldest",
        }
    }
}

impl std::str::FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newest" => Ok(SortOrder::Newest),
            "index" => Ok(SortOrder::Index),
            "oldest" => Ok(SortOrder::Oldest),
            other => Err(format!(
                "Invalid sort '{}'. Must be one of: newest, index, oldest",
                other
            )),
        }
    }
}

/// Filters for a collection listing
#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery {
    /// Return full objects instead of ids
    pub full: bool,
    /// Only these ids (server limit is 100)
    pub ids: Option<Vec<String>>,
    /// Only objects modified strictly after this time
    pub newer: Option<f64>,
    /// At most this many objects
    pub limit: Option<u32>,
    /// Continuation token from `X-Weave-Next-Offset`
    pub offset: Option<String>,
    /// Ordering
    pub sort: Option<SortOrder>,
}

impl Default for RecordQuery {
    fn default() -> Self {
        Self {
            full: true,
            ids: None,
            newer: None,
            limit: None,
            offset: None,
            sort: None,
        }
    }
}

impl RecordQuery {
    /// Only objects modified after `time`
    pub fn newer(mut self, time: f64) -> Self {
        self.newer = Some(time);
        self
    }

    /// At most `limit` objects
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Server-side ordering
    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Only these ids
    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Query string pairs, in a stable order
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if self.full {
            params.push(("full", "1".to_string()));
        }
        if let Some(ids) = &self.ids {
            params.push(("ids", ids.join(",")));
        }
        if let Some(newer) = self.newer {
            params.push(("newer", format!("{:.2}", newer)));
        }
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(offset) = &self.offset {
            params.push(("offset", offset.clone()));
        }
        if let Some(sort) = self.sort {
            params.push(("sort", sort.as_str().to_string()));
        }
        params
    }
}
