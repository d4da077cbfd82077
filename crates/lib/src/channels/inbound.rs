//! Inbound message from a channel: handed to the bot for command handling.

/// A chat message that may carry a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Connector id (e.g. "discord").
    pub channel_id: String,
    /// Platform conversation the reply goes back to (e.g. a Discord channel id).
    pub conversation_id: String,
    /// Platform user id of the author.
    pub sender_id: String,
    pub text: String,
}
