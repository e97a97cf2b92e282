//! Temporary storage credentials issued by the token server

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Hawk credentials for one sync session.
///
/// Held in memory only; `Debug` output does not include the key.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    /// Storage user id
    #[serde(rename = "uid", deserialize_with = "string_or_number")]
    pub user_id: String,
    /// Base URL of the user's storage node
    pub api_endpoint: String,
    /// MAC algorithm for request signing (always "sha256" in practice)
    #[serde(rename = "hashalg", default = "default_hashalg")]
    pub hmac_algorithm: String,
    /// Hawk key identifier
    #[serde(rename = "id")]
    pub hmac_id: String,
    /// Hawk key
    #[serde(rename = "key")]
    pub hmac_key: String,
    /// Lifetime of the credentials in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("api_endpoint", &self.api_endpoint)
            .field("hmac_algorithm", &self.hmac_algorithm)
            .field("hmac_id", &self.hmac_id)
            .field("hmac_key", &"<redacted>")
            .field("duration", &self.duration)
            .finish()
    }
}

fn default_hashalg() -> String {
    "sha256".to_string()
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Uid {
        Text(String),
        Number(u64),
    }

    Ok(match Uid::deserialize(deserializer)? {
        Uid::Text(s) => s,
        Uid::Number(n) => n.to_string(),
    })
}
