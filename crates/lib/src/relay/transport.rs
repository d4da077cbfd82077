//! Transport seam: the one place the relay touches the network.

use crate::relay::request::RelayRequest;
use crate::relay::response::{FailureKind, RelayResponse};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

/// Sends a relay request and reports the outcome as a value; never panics or errors out.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, request: &RelayRequest) -> RelayResponse;
}

/// reqwest-backed transport. The timeout covers connect, send, and reading the body.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

fn failure(kind: FailureKind, detail: String) -> RelayResponse {
    RelayResponse::TransportFailure { kind, detail }
}

/// reqwest's Display omits the cause (e.g. "connection refused"); append the source chain.
fn classify(e: reqwest::Error) -> RelayResponse {
    let kind = if e.is_timeout() {
        FailureKind::Timeout
    } else if e.is_connect() || e.is_request() || e.is_redirect() || e.is_builder() || e.is_body() {
        FailureKind::Connection
    } else {
        FailureKind::Other
    };
    failure(kind, format!("{:#}", anyhow::Error::from(e)))
}

fn header_map(request: &RelayRequest) -> Result<HeaderMap, String> {
    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| format!("invalid header name {:?}: {}", name, e))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| format!("invalid value for header {}: {}", name, e))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, request: &RelayRequest) -> RelayResponse {
        let headers = match header_map(request) {
            Ok(h) => h,
            Err(detail) => return failure(FailureKind::Other, detail),
        };
        let res = match self
            .client
            .post(&request.endpoint)
            .headers(headers)
            .json(&request.body)
            .send()
            .await
        {
            Ok(res) => res,
            Err(e) => return classify(e),
        };
        let status = res.status().as_u16();
        match res.text().await {
            Ok(body) => RelayResponse::Success { status, body },
            Err(e) => classify(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::relay::request::Query;

    #[test]
    fn invalid_api_key_is_rejected_before_sending() {
        let config = RelayConfig::new("http://127.0.0.1:1/", Some("bad\nkey".to_string()));
        let query = Query {
            text: "q".to_string(),
            sender_id: "1".to_string(),
            channel_id: "2".to_string(),
        };
        let request = RelayRequest::build(&query, &config);
        let err = header_map(&request).unwrap_err();
        assert!(err.contains("Authorization") || err.contains("authorization"));
    }
}
