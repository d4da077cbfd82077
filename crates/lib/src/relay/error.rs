//! Relay failure classes and the chat text each one turns into.

/// Why a relay produced no answer. Every variant becomes a single user-visible message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// The upstream round trip exceeded the configured timeout.
    #[error("upstream request timed out")]
    Timeout,
    /// Connection-level failure before any HTTP response (DNS, refused, reset, TLS).
    #[error("upstream connection failed: {0}")]
    Transport(String),
    /// The upstream answered with a status other than 200.
    #[error("upstream returned status {0}")]
    UpstreamStatus(u16),
    /// Anything else: request construction, malformed JSON, missing answer.
    #[error("unexpected relay failure: {0}")]
    Unexpected(String),
}

impl RelayError {
    /// Text posted back into the conversation. Each class has its own prefix.
    pub fn user_message(&self) -> String {
        match self {
            RelayError::Timeout => "⏱️ Request timed out. Please try again.".to_string(),
            RelayError::Transport(detail) => format!("❌ Error connecting to chatbot: {}", detail),
            RelayError::UpstreamStatus(code) => {
                format!("❌ Error: API returned status code {}", code)
            }
            RelayError::Unexpected(detail) => format!("❌ An error occurred: {}", detail),
        }
    }
}
