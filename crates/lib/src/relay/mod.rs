//! Relay: forward a chat question to the upstream HTTP service and turn the outcome into chat messages.
//!
//! One request per invocation, no retries. Failures never escape: each is classified
//! into a [`RelayError`] and rendered as a single message.

mod error;
mod fragments;
mod request;
mod response;
mod transport;

pub use error::RelayError;
pub use fragments::{CharChunks, Fragments};
pub use request::{Query, RelayBody, RelayRequest};
pub use response::{extract_answer, FailureKind, RelayResponse, ANSWER_FIELDS};
pub use transport::{HttpTransport, Transport};

use crate::config::RelayConfig;
use std::sync::Arc;

/// Outcome of one relay invocation.
#[derive(Debug, Clone)]
pub struct Reply {
    outcome: Result<String, RelayError>,
    limit: usize,
}

impl Reply {
    pub fn answer(&self) -> Option<&str> {
        self.outcome.as_deref().ok()
    }

    pub fn error(&self) -> Option<&RelayError> {
        self.outcome.as_ref().err()
    }

    /// Messages to post, in order: the answer split at the limit, or one error notice.
    pub fn fragments(&self) -> Fragments<'_> {
        match &self.outcome {
            Ok(answer) => Fragments::Chunks(CharChunks::new(answer, self.limit)),
            Err(e) => Fragments::Notice(Some(e.user_message())),
        }
    }
}

/// Forwards queries upstream. Cheap to clone; shared by all in-flight invocations.
#[derive(Clone)]
pub struct Relay {
    config: Arc<RelayConfig>,
    transport: Arc<dyn Transport>,
}

impl Relay {
    pub fn new(config: RelayConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config: Arc::new(config),
            transport,
        }
    }

    /// Relay over HTTP with the configured timeout.
    pub fn with_http(config: RelayConfig) -> Result<Self, reqwest::Error> {
        let transport = HttpTransport::new(config.timeout)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Send the query upstream and classify the result.
    pub async fn handle(&self, query: &Query) -> Reply {
        let request = RelayRequest::build(query, &self.config);
        log::debug!(
            "relay: POST {} for user {} in channel {}",
            request.endpoint,
            query.sender_id,
            query.channel_id
        );
        let response = self.transport.post(&request).await;
        let outcome = Self::interpret(response);
        match &outcome {
            Ok(answer) => log::debug!("relay: answer of {} chars", answer.chars().count()),
            Err(e) => log::warn!("relay: {}", e),
        }
        Reply {
            outcome,
            limit: self.config.message_limit,
        }
    }

    /// Map a transport outcome to an answer or one of the four error classes.
    pub fn interpret(response: RelayResponse) -> Result<String, RelayError> {
        match response {
            RelayResponse::TransportFailure { kind, detail } => Err(match kind {
                FailureKind::Timeout => RelayError::Timeout,
                FailureKind::Connection => RelayError::Transport(detail),
                FailureKind::Other => RelayError::Unexpected(detail),
            }),
            RelayResponse::Success { status: 200, body } => extract_answer(&body),
            RelayResponse::Success { status, .. } => Err(RelayError::UpstreamStatus(status)),
        }
    }
}
