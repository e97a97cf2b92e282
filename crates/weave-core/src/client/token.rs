//! Token server client

use std::time::Duration;

use reqwest::Url;
use tracing::{debug, info};

use super::{error_for_status, http_client};
use crate::error::{SyncError, SyncResult};
use crate::types::Credentials;

/// Path of the sync 1.5 service on the token server
const TOKEN_PATH: &str = "1.0/sync/1.5";

/// Exchanges BrowserID assertions for storage credentials.
#[derive(Debug, Clone)]
pub struct TokenClient {
    server_url: String,
    client: reqwest::Client,
}

impl TokenClient {
    /// Client for `server_url` with its own HTTP client.
    pub fn new(server_url: impl Into<String>, timeout: Duration) -> SyncResult<Self> {
        Ok(Self::with_client(server_url, http_client(timeout)?))
    }

    /// Client sharing an existing HTTP client.
    pub fn with_client(server_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            server_url: server_url.into(),
            client,
        }
    }

    /// Token endpoint URL
    pub fn endpoint(&self) -> SyncResult<Url> {
        let url = format!("{}/{}", self.server_url.trim_end_matches('/'), TOKEN_PATH);
        Url::parse(&url)
            .map_err(|e| SyncError::Config(format!("Invalid token server URL {}: {}", url, e)))
    }

    /// Ask for temporary Hawk credentials.
    ///
    /// # Errors
    ///
    /// - `SyncError::Authentication` on 401/403
    /// - `SyncError::Http` for other non-2xx answers
    /// - `SyncError::Network` when the server cannot be reached
    pub async fn get_credentials(
        &self,
        assertion: &str,
        client_state: &str,
        duration: Option<u64>,
    ) -> SyncResult<Credentials> {
        let mut url = self.endpoint()?;
        if let Some(duration) = duration {
            url.query_pairs_mut()
                .append_pair("duration", &duration.to_string());
        }
        debug!(url = %url, "Requesting storage token");

        let response = self
            .client
            .get(url)
            .header("Authorization", format!("BrowserID {}", assertion))
            .header("X-Client-State", client_state)
            .send()
            .await?;
        let response = error_for_status(response).await?;

        let credentials: Credentials = response
            .json()
            .await
            .map_err(|e| SyncError::Serialization(format!("Invalid token response: {}", e)))?;
        info!(
            uid = %credentials.user_id,
            endpoint = %credentials.api_endpoint,
            "Obtained storage credentials"
        );
        Ok(credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_path() {
        let client = TokenClient::with_client("https://token.example.com/", reqwest::Client::new());
        assert_eq!(
            client.endpoint().unwrap().as_str(),
            "https://token.example.com/1.0/sync/1.5"
        );

        let client = TokenClient::with_client("https://token.example.com", reqwest::Client::new());
        assert_eq!(
            client.endpoint().unwrap().as_str(),
            "https://token.example.com/1.0/sync/1.5"
        );
    }

    #[test]
    fn test_invalid_server_url() {
        let client = TokenClient::with_client("not a url", reqwest::Client::new());
        assert!(matches!(client.endpoint(), Err(SyncError::Config(_))));
    }
}
