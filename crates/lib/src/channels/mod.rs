//! Communication channels (Discord).
//!
//! Channel trait and registry so the bot can start/stop connectors and
//! deliver replies. Inbound messages are sent to the bot for command handling.

mod discord;
mod inbound;
mod registry;

pub use discord::{DiscordChannel, DiscordUser, GatewayFrame, MessageCreate, DISCORD_INTENTS};
pub use inbound::InboundMessage;
pub use registry::{ChannelHandle, ChannelRegistry};
