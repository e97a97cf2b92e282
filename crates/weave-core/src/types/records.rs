//! Decrypted record payloads for the collections weave syncs
//!
//! Field names follow the Sync 1.5 wire format (`histUri`, `bmkUri`,
//! `parentid`, ...). Optional fields stay `Option` so that "absent" and
//! "empty" can be told apart during merges.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Visit type for a plain link visit
pub const VISIT_LINK: i32 = 1;

/// A single history visit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    /// Visit time in microseconds since the epoch
    #[serde(deserialize_with = "lenient_i64")]
    pub date: i64,
    /// Transition type
    #[serde(rename = "type", default = "default_visit_type")]
    pub kind: i32,
}

impl Visit {
    /// Link visit at `atime` seconds
    pub fn at_seconds(atime: f64) -> Self {
        Self {
            date: (atime * 1_000_000.0).round() as i64,
            kind: VISIT_LINK,
        }
    }

    /// Visit time in seconds, rounded to 2 decimals
    pub fn seconds(&self) -> f64 {
        crate::types::round2(self.date as f64 / 1_000_000.0)
    }
}

/// History record payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Record guid
    pub id: String,
    /// Visited URI
    #[serde(rename = "histUri", default, skip_serializing_if = "Option::is_none")]
    pub hist_uri: Option<String>,
    /// Page title
    #[serde(default)]
    pub title: Option<String>,
    /// Visits, most recent first
    #[serde(default)]
    pub visits: Vec<Visit>,
}

impl HistoryRecord {
    /// Record with a single link visit at `atime` seconds
    pub fn new(
        id: impl Into<String>,
        uri: impl Into<String>,
        title: impl Into<String>,
        atime: f64,
    ) -> Self {
        Self {
            id: id.into(),
            hist_uri: Some(uri.into()),
            title: Some(title.into()),
            visits: vec![Visit::at_seconds(atime)],
        }
    }

    /// Time of the most recent visit in seconds
    pub fn last_visit(&self) -> Option<f64> {
        self.visits.first().map(Visit::seconds)
    }
}

/// Kind of bookmark record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookmarkKind {
    /// A URL bookmark
    Bookmark,
    /// A folder of bookmarks
    Folder,
    /// Separators, queries, livemarks, tombstones and anything without a type
    #[default]
    #[serde(other)]
    Unsupported,
}

/// Bookmark or folder record payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookmarkRecord {
    /// Record type
    #[serde(rename = "type", default)]
    pub kind: BookmarkKind,
    /// Record guid
    pub id: String,
    /// Bookmarked URI
    #[serde(rename = "bmkUri", default, skip_serializing_if = "Option::is_none")]
    pub bmk_uri: Option<String>,
    /// Title
    #[serde(default)]
    pub title: Option<String>,
    /// Tag names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Parent folder guid
    #[serde(rename = "parentid", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Parent folder title
    #[serde(rename = "parentName", default, skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    /// Ordered child guids (folders only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<String>>,
}

impl BookmarkRecord {
    /// A "bookmark" record
    pub fn bookmark(
        id: impl Into<String>,
        uri: impl Into<String>,
        title: impl Into<String>,
        tags: Vec<String>,
        parent_id: impl Into<String>,
    ) -> Self {
        Self {
            kind: BookmarkKind::Bookmark,
            id: id.into(),
            bmk_uri: Some(uri.into()),
            title: Some(title.into()),
            tags: Some(tags),
            parent_id: Some(parent_id.into()),
            parent_name: None,
            children: None,
        }
    }

    /// A "folder" record
    pub fn folder(
        id: impl Into<String>,
        title: impl Into<String>,
        parent_id: Option<String>,
        parent_name: Option<String>,
        children: Vec<String>,
    ) -> Self {
        Self {
            kind: BookmarkKind::Folder,
            id: id.into(),
            bmk_uri: None,
            title: Some(title.into()),
            tags: None,
            parent_id,
            parent_name,
            children: Some(children),
        }
    }

    /// Set the parent folder title
    pub fn with_parent_name(mut self, name: impl Into<String>) -> Self {
        self.parent_name = Some(name.into());
        self
    }

    /// True for bookmark and folder records
    pub fn is_supported(&self) -> bool {
        self.kind != BookmarkKind::Unsupported
    }

    /// Title, or the empty string
    pub fn title_or_default(&self) -> &str {
        self.title.as_deref().unwrap_or_default()
    }
}

/// Payload of the `crypto/keys` record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CryptoKeysRecord {
    /// Base64 `[encryption, hmac]` default bulk keys
    pub default: [String; 2],
    /// Per-collection overrides
    #[serde(default)]
    pub collections: BTreeMap<String, [String; 2]>,
}

fn default_visit_type() -> i32 {
    VISIT_LINK
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Int(i64),
        Float(f64),
        Text(String),
    }

    match Number::deserialize(deserializer)? {
        Number::Int(n) => Ok(n),
        Number::Float(f) => Ok(f as i64),
        Number::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
