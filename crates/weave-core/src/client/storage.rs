//! Storage API client
//!
//! Hawk-signed requests against the user's storage node:
//!
//! | Operation            | Request                                  |
//! |----------------------|------------------------------------------|
//! | info_collections     | `GET /info/collections`                  |
//! | info_quota           | `GET /info/quota`                        |
//! | collection counts    | `GET /info/collection_counts`            |
//! | collection usage     | `GET /info/collection_usage`             |
//! | get_records          | `GET /storage/{collection}?full=1&...`   |
//! | get_record           | `GET /storage/{collection}/{id}`         |
//! | put_record           | `PUT /storage/{collection}/{id}`         |
//! | delete_record        | `DELETE /storage/{collection}/{id}`      |
//! | delete_all           | `DELETE /`                               |

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::hawk::{HawkAuth, HawkPayload};
use super::{error_for_status, RemoteStore};
use crate::error::{SyncError, SyncResult};
use crate::types::{Bso, Credentials, OutgoingBso, RecordQuery};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Usage and quota in KB. `quota` is `None` when the server enforces none.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quota {
    /// Current usage
    pub usage: f64,
    /// Quota, if any
    pub quota: Option<f64>,
}

/// Client for one user's storage node.
#[derive(Debug, Clone)]
pub struct StorageClient {
    user_id: String,
    endpoint: Url,
    auth: HawkAuth,
    client: reqwest::Client,
}

impl StorageClient {
    /// Build a client from token server credentials.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` for an unparsable endpoint or an
    /// unsupported MAC algorithm.
    pub fn new(credentials: &Credentials, client: reqwest::Client) -> SyncResult<Self> {
        let endpoint = Url::parse(&credentials.api_endpoint).map_err(|e| {
            SyncError::Config(format!(
                "Invalid API endpoint {}: {}",
                credentials.api_endpoint, e
            ))
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(SyncError::Config(format!(
                "API endpoint {} cannot be a base URL",
                endpoint
            )));
        }
        Ok(Self {
            user_id: credentials.user_id.clone(),
            endpoint,
            auth: HawkAuth::from_credentials(credentials)?,
            client,
        })
    }

    /// Storage user id
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Usage and quota
    pub async fn info_quota(&self) -> SyncResult<Quota> {
        let (usage, quota): (f64, Option<f64>) =
            self.get_json(self.url(&["info", "quota"])?).await?;
        Ok(Quota { usage, quota })
    }

    /// Number of records per collection
    pub async fn info_collection_counts(&self) -> SyncResult<BTreeMap<String, u64>> {
        self.get_json(self.url(&["info", "collection_counts"])?).await
    }

    /// Data volume per collection in KB
    pub async fn info_collection_usage(&self) -> SyncResult<BTreeMap<String, f64>> {
        self.get_json(self.url(&["info", "collection_usage"])?).await
    }

    /// Delete every record of the user.
    pub async fn delete_all(&self) -> SyncResult<()> {
        let mut url = self.endpoint.clone();
        if !url.path().ends_with('/') {
            url.set_path(&format!("{}/", url.path()));
        }
        self.send(Method::DELETE, url, None).await?;
        Ok(())
    }

    /// URL of `segments` below the endpoint. Segments are percent-encoded.
    pub(crate) fn url(&self, segments: &[&str]) -> SyncResult<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::Config(format!("Invalid API endpoint {}", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn collection_url(&self, collection: &str, id: Option<&str>) -> SyncResult<Url> {
        let collection = collection.to_lowercase();
        match id {
            Some(id) => self.url(&["storage", &collection, id]),
            None => self.url(&["storage", &collection]),
        }
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<String>,
    ) -> SyncResult<reqwest::Response> {
        let payload = body.as_deref().map(|b| HawkPayload {
            content_type: JSON_CONTENT_TYPE,
            body: b.as_bytes(),
        });
        let authorization = self.auth.header(method.as_str(), &url, payload)?;
        debug!(method = %method, url = %url, "Storage request");

        let mut request = self
            .client
            .request(method, url)
            .header(AUTHORIZATION, authorization);
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, JSON_CONTENT_TYPE).body(body);
        }
        error_for_status(request.send().await?).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> SyncResult<T> {
        let response = self.send(Method::GET, url, None).await?;
        response
            .json()
            .await
            .map_err(|e| SyncError::Serialization(format!("Invalid storage response: {}", e)))
    }
}

/// An entry of a collection listing: a full BSO, or just its id
#[derive(Deserialize)]
#[serde(untagged)]
enum Listed {
    Full(Bso),
    Id(String),
}

impl From<Listed> for Bso {
    fn from(listed: Listed) -> Self {
        match listed {
            Listed::Full(bso) => bso,
            Listed::Id(id) => Bso {
                id,
                modified: 0.0,
                payload: String::new(),
                sortindex: None,
            },
        }
    }
}

#[async_trait]
impl RemoteStore for StorageClient {
    async fn info_collections(&self) -> SyncResult<BTreeMap<String, f64>> {
        self.get_json(self.url(&["info", "collections"])?).await
    }

    async fn get_records(&self, collection: &str, query: &RecordQuery) -> SyncResult<Vec<Bso>> {
        let mut url = self.collection_url(collection, None)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query.to_params() {
                pairs.append_pair(name, &value);
            }
        }
        let listed: Vec<Listed> = self.get_json(url).await?;
        Ok(listed.into_iter().map(Bso::from).collect())
    }

    async fn get_record(&self, collection: &str, id: &str) -> SyncResult<Bso> {
        self.get_json(self.collection_url(collection, Some(id))?).await
    }

    async fn put_record(&self, collection: &str, record: &OutgoingBso) -> SyncResult<f64> {
        let url = self.collection_url(collection, Some(&record.id))?;
        let body = serde_json::to_string(record)?;
        let response = self.send(Method::PUT, url, Some(body)).await?;

        let header_time = response
            .headers()
            .get("X-Last-Modified")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<f64>().ok());
        let text = response.text().await?;
        match serde_json::from_str::<f64>(text.trim()) {
            Ok(modified) => Ok(modified),
            Err(e) => header_time.ok_or_else(|| {
                SyncError::Serialization(format!("Invalid PUT response '{}': {}", text, e))
            }),
        }
    }

    async fn delete_record(&self, collection: &str, id: &str) -> bool {
        let url = match self.collection_url(collection, Some(id)) {
            Ok(url) => url,
            Err(e) => {
                warn!(collection, id, error = %e, "Cannot build delete URL");
                return false;
            }
        };
        match self.send(Method::DELETE, url, None).await {
            Ok(_) => true,
            Err(SyncError::Http { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                debug!(collection, id, "Record already absent remotely");
                true
            }
            Err(e) => {
                warn!(collection, id, error = %e, "Remote delete failed");
                false
            }
        }
    }
}
