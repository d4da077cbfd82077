//! Outbound request: built from a chat query and the static relay config.

use crate::config::RelayConfig;
use serde::Serialize;
use std::collections::BTreeMap;

/// One `ask` invocation from chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub text: String,
    pub sender_id: String,
    pub channel_id: String,
}

/// JSON body POSTed upstream: `{ "query", "user_id", "channel_id" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayBody {
    pub query: String,
    pub user_id: String,
    pub channel_id: String,
}

/// Fully-resolved upstream request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    pub endpoint: String,
    pub headers: BTreeMap<String, String>,
    pub body: RelayBody,
}

impl RelayRequest {
    /// Content-Type is always set; Authorization only when an API key is configured.
    pub fn build(query: &Query, config: &RelayConfig) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        if let Some(ref key) = config.api_key {
            headers.insert("Authorization".to_string(), format!("Bearer {}", key));
        }
        Self {
            endpoint: config.endpoint.clone(),
            headers,
            body: RelayBody {
                query: query.text.clone(),
                user_id: query.sender_id.clone(),
                channel_id: query.channel_id.clone(),
            },
        }
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
