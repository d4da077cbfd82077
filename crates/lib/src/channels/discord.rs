//! Discord channel: gateway websocket for inbound messages, REST API for replies.
//!
//! The gateway session is the minimal v10 flow: Hello, Identify, heartbeats, dispatches.
//! Any failure (close, invalid session, missed heartbeat ACK) drops the session and a
//! fresh one is identified after a short delay. Resume is not attempted. Close codes that
//! mean the bot can never log in (bad token, disallowed intents) end the loop instead.

use crate::channels::inbound::InboundMessage;
use crate::channels::registry::ChannelHandle;
use crate::config::DiscordConfig;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";
const DISCORD_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
const USER_AGENT: &str = concat!("DiscordBot (askbot, ", env!("CARGO_PKG_VERSION"), ")");
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Extra attempts for a message answered with 429; after that the error is returned.
const RATE_LIMIT_RETRIES: usize = 3;
const RATE_LIMIT_FALLBACK: Duration = Duration::from_secs(1);
const RATE_LIMIT_MAX_WAIT: Duration = Duration::from_secs(60);

const INTENT_GUILDS: u64 = 1 << 0;
const INTENT_GUILD_MESSAGES: u64 = 1 << 9;
const INTENT_DIRECT_MESSAGES: u64 = 1 << 12;
const INTENT_MESSAGE_CONTENT: u64 = 1 << 15;

/// Gateway intents sent with Identify. MESSAGE_CONTENT is privileged and must be enabled for the bot.
pub const DISCORD_INTENTS: u64 =
    INTENT_GUILDS | INTENT_GUILD_MESSAGES | INTENT_DIRECT_MESSAGES | INTENT_MESSAGE_CONTENT;

mod op {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Gateway payload: `{ "op", "d", "s", "t" }`.
#[derive(Debug, Deserialize)]
pub struct GatewayFrame {
    pub op: u8,
    #[serde(default)]
    pub d: serde_json::Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Hello {
    heartbeat_interval: u64,
}

#[derive(Debug, Deserialize)]
struct Ready {
    user: DiscordUser,
    #[serde(default)]
    guilds: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

/// MESSAGE_CREATE dispatch payload (fields we use).
#[derive(Debug, Deserialize)]
pub struct MessageCreate {
    pub channel_id: String,
    pub author: DiscordUser,
    #[serde(default)]
    pub content: String,
}

impl MessageCreate {
    /// Messages from bots (including this one) are dropped.
    pub fn into_inbound(self, connector_id: &str) -> Option<InboundMessage> {
        if self.author.bot {
            return None;
        }
        Some(InboundMessage {
            channel_id: connector_id.to_string(),
            conversation_id: self.channel_id,
            sender_id: self.author.id,
            text: self.content,
        })
    }
}

/// What the session loop should do with one gateway frame.
#[derive(Debug)]
enum GatewayEvent {
    HeartbeatRequested,
    HeartbeatAck,
    Ready(Ready),
    Message(MessageCreate),
    Reconnect(&'static str),
    Ignored,
}

fn interpret_frame(frame: GatewayFrame) -> GatewayEvent {
    match frame.op {
        op::HEARTBEAT => GatewayEvent::HeartbeatRequested,
        op::HEARTBEAT_ACK => GatewayEvent::HeartbeatAck,
        op::RECONNECT => GatewayEvent::Reconnect("gateway requested reconnect"),
        op::INVALID_SESSION => GatewayEvent::Reconnect("gateway invalidated the session"),
        op::DISPATCH => match frame.t.as_deref() {
            Some("READY") => match serde_json::from_value(frame.d) {
                Ok(ready) => GatewayEvent::Ready(ready),
                Err(e) => {
                    log::debug!("discord: unparsable READY: {}", e);
                    GatewayEvent::Ignored
                }
            },
            Some("MESSAGE_CREATE") => match serde_json::from_value(frame.d) {
                Ok(msg) => GatewayEvent::Message(msg),
                Err(e) => {
                    log::debug!("discord: unparsable MESSAGE_CREATE: {}", e);
                    GatewayEvent::Ignored
                }
            },
            _ => GatewayEvent::Ignored,
        },
        _ => GatewayEvent::Ignored,
    }
}

/// Close codes after which identifying again cannot succeed.
fn fatal_close_reason(code: u16) -> Option<&'static str> {
    match code {
        4004 => Some("authentication failed (check DISCORD_TOKEN)"),
        4010 => Some("invalid shard"),
        4011 => Some("sharding required"),
        4012 => Some("invalid gateway API version"),
        4013 => Some("invalid intents"),
        4014 => Some("disallowed intents (enable the message content intent for the bot)"),
        _ => None,
    }
}

/// Why a gateway session ended.
#[derive(Debug, thiserror::Error)]
enum SessionError {
    #[error("{0}")]
    Retry(String),
    #[error("gateway closed with {code}: {reason}")]
    Fatal { code: u16, reason: &'static str },
}

impl From<String> for SessionError {
    fn from(s: String) -> Self {
        SessionError::Retry(s)
    }
}

/// How long to wait after a 429: `retry_after` (seconds) from the body, then the
/// `Retry-After` header, then a fallback. Capped at a minute.
fn rate_limit_delay(body: &str, header: Option<&str>) -> Duration {
    let from_body = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("retry_after").and_then(|r| r.as_f64()));
    let secs = from_body.or_else(|| header.and_then(|h| h.trim().parse::<f64>().ok()));
    match secs {
        Some(s) if s.is_finite() && s >= 0.0 => {
            Duration::from_secs_f64(s.min(RATE_LIMIT_MAX_WAIT.as_secs_f64()))
        }
        _ => RATE_LIMIT_FALLBACK,
    }
}

fn identify_payload(token: &str) -> serde_json::Value {
    json!({
        "op": op::IDENTIFY,
        "d": {
            "token": token,
            "intents": DISCORD_INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "askbot",
                "device": "askbot"
            }
        }
    })
}

fn heartbeat_payload(last_seq: Option<u64>) -> serde_json::Value {
    json!({ "op": op::HEARTBEAT, "d": last_seq })
}

/// Discord connector: gateway session for inbound messages, REST for replies and typing.
pub struct DiscordChannel {
    id: String,
    token: String,
    api_base: String,
    gateway_url: String,
    stopped: watch::Sender<bool>,
    client: reqwest::Client,
}

impl DiscordChannel {
    pub fn new(token: String, api_base: Option<String>, gateway_url: Option<String>) -> Self {
        let api_base = api_base
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DISCORD_API_BASE.to_string());
        let (stopped, _) = watch::channel(false);
        Self {
            id: "discord".to_string(),
            token,
            api_base,
            gateway_url: gateway_url.unwrap_or_else(|| DISCORD_GATEWAY_URL.to_string()),
            stopped,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &DiscordConfig, token: String) -> Self {
        Self::new(token, config.api_base.clone(), config.gateway_url.clone())
    }

    fn running(&self) -> bool {
        !*self.stopped.borrow()
    }

    /// Start the gateway loop and forward messages to the bot. Returns a handle to await on shutdown.
    /// The task ends with an error when Discord refuses the login for good.
    pub fn start_inbound(
        self: Arc<Self>,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> JoinHandle<Result<(), String>> {
        log::info!("discord channel: starting gateway loop");
        tokio::spawn(async move {
            run_gateway_loop(self, inbound_tx).await
        })
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
    }

    /// Post a text message to a channel via the REST API.
    /// A 429 is waited out and retried a few times before it is returned as an error.
    pub async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), String> {
        let url = format!("{}/channels/{}/messages", self.api_base, channel_id);
        let body = json!({ "content": text });
        let mut retries = 0;
        loop {
            let res = self
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| e.to_string())?;
            let status = res.status();
            if status.is_success() {
                return Ok(());
            }
            let retry_after = res
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            let detail = res.text().await.unwrap_or_default();
            if status != reqwest::StatusCode::TOO_MANY_REQUESTS || retries >= RATE_LIMIT_RETRIES {
                return Err(format!("create message failed: {} {}", status, detail));
            }
            retries += 1;
            let wait = rate_limit_delay(&detail, retry_after.as_deref());
            log::warn!(
                "discord: rate limited on channel {}, retrying in {:?} ({}/{})",
                channel_id,
                wait,
                retries,
                RATE_LIMIT_RETRIES
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Show "bot is typing" in a channel (lasts about 10 seconds or until the next message).
    pub async fn trigger_typing(&self, channel_id: &str) -> Result<(), String> {
        let url = format!("{}/channels/{}/typing", self.api_base, channel_id);
        let res = self
            .post(&url)
            .header(reqwest::header::CONTENT_LENGTH, "0")
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("trigger typing failed: {} {}", status, body));
        }
        Ok(())
    }
}

async fn run_gateway_loop(
    channel: Arc<DiscordChannel>,
    inbound_tx: mpsc::Sender<InboundMessage>,
) -> Result<(), String> {
    let mut stop_rx = channel.stopped.subscribe();
    while channel.running() {
        tokio::select! {
            res = run_session(&channel, &inbound_tx) => match res {
                Ok(()) => {
                    log::debug!("discord: inbound channel closed, stopping loop");
                    return Ok(());
                }
                Err(e @ SessionError::Fatal { .. }) => {
                    log::error!("discord gateway refused the session: {}", e);
                    return Err(e.to_string());
                }
                Err(e) => {
                    log::warn!(
                        "discord gateway session ended: {}; reconnecting in {}s",
                        e,
                        RECONNECT_DELAY.as_secs()
                    );
                }
            },
            _ = stop_rx.wait_for(|stopped| *stopped) => break,
        }
        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = stop_rx.wait_for(|stopped| *stopped) => break,
        }
    }
    log::info!("discord channel: gateway loop stopped");
    Ok(())
}

/// One gateway connection. Returns Ok only when the inbound receiver is gone.
async fn run_session(
    channel: &DiscordChannel,
    inbound_tx: &mpsc::Sender<InboundMessage>,
) -> Result<(), SessionError> {
    let (ws, _) = tokio_tungstenite::connect_async(channel.gateway_url.as_str())
        .await
        .map_err(|e| format!("connect: {}", e))?;
    let (mut sink, mut stream) = ws.split();

    let hello: Hello = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                let frame: GatewayFrame =
                    serde_json::from_str(&text).map_err(|e| format!("bad frame: {}", e))?;
                if frame.op == op::HELLO {
                    break serde_json::from_value(frame.d)
                        .map_err(|e| format!("bad hello: {}", e))?;
                }
            }
            Some(Ok(Message::Close(frame))) => return Err(close_error(frame)),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.to_string().into()),
            None => return Err("gateway closed before hello".to_string().into()),
        }
    };
    sink.send(Message::Text(identify_payload(&channel.token).to_string()))
        .await
        .map_err(|e| e.to_string())?;

    let period = Duration::from_millis(hello.heartbeat_interval.max(1));
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let mut last_seq: Option<u64> = None;
    let mut awaiting_ack = false;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if awaiting_ack {
                    return Err("heartbeat not acknowledged".to_string().into());
                }
                sink.send(Message::Text(heartbeat_payload(last_seq).to_string()))
                    .await
                    .map_err(|e| e.to_string())?;
                awaiting_ack = true;
            }
            msg = stream.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(frame))) => return Err(close_error(frame)),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.to_string().into()),
                    None => return Err("gateway stream ended".to_string().into()),
                };
                let frame: GatewayFrame = match serde_json::from_str(&text) {
                    Ok(f) => f,
                    Err(e) => {
                        log::debug!("discord: skipping unparsable frame: {}", e);
                        continue;
                    }
                };
                if frame.s.is_some() {
                    last_seq = frame.s;
                }
                match interpret_frame(frame) {
                    GatewayEvent::HeartbeatRequested => {
                        sink.send(Message::Text(heartbeat_payload(last_seq).to_string()))
                            .await
                            .map_err(|e| e.to_string())?;
                    }
                    GatewayEvent::HeartbeatAck => awaiting_ack = false,
                    GatewayEvent::Ready(ready) => {
                        log::info!("{} has connected to Discord!", ready.user.username);
                        log::info!("bot is in {} guilds", ready.guilds.len());
                    }
                    GatewayEvent::Message(msg) => {
                        if let Some(inbound) = msg.into_inbound(&channel.id) {
                            if inbound_tx.send(inbound).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                    GatewayEvent::Reconnect(reason) => return Err(reason.to_string().into()),
                    GatewayEvent::Ignored => {}
                }
            }
        }
    }
}

fn close_error(frame: Option<CloseFrame<'_>>) -> SessionError {
    let Some(frame) = frame else {
        return SessionError::Retry("gateway closed without a code".to_string());
    };
    let code = u16::from(frame.code);
    match fatal_close_reason(code) {
        Some(reason) => SessionError::Fatal { code, reason },
        None => SessionError::Retry(format!("gateway closed: {} {}", code, frame.reason)),
    }
}

#[async_trait]
impl ChannelHandle for DiscordChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.stopped.send_replace(true);
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), String> {
        DiscordChannel::send_message(self, conversation_id, text).await
    }

    async fn trigger_typing(&self, conversation_id: &str) -> Result<(), String> {
        DiscordChannel::trigger_typing(self, conversation_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(json: serde_json::Value) -> GatewayFrame {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn intents_cover_guild_and_dm_messages() {
        assert_eq!(DISCORD_INTENTS, 1 | 512 | 4096 | 32768);
    }

    #[test]
    fn identify_carries_token_and_intents() {
        let p = identify_payload("tok");
        assert_eq!(p["op"], 2);
        assert_eq!(p["d"]["token"], "tok");
        assert_eq!(p["d"]["intents"], DISCORD_INTENTS);
    }

    #[test]
    fn heartbeat_sends_last_sequence_or_null() {
        assert_eq!(heartbeat_payload(None), json!({ "op": 1, "d": null }));
        assert_eq!(heartbeat_payload(Some(42)), json!({ "op": 1, "d": 42 }));
    }

    #[test]
    fn message_create_becomes_inbound() {
        let f = frame(json!({
            "op": 0, "s": 3, "t": "MESSAGE_CREATE",
            "d": {
                "id": "9", "channel_id": "555",
                "author": { "id": "777", "username": "ferris" },
                "content": "!ask hi"
            }
        }));
        let GatewayEvent::Message(msg) = interpret_frame(f) else {
            panic!("expected message");
        };
        let inbound = msg.into_inbound("discord").unwrap();
        assert_eq!(
            inbound,
            InboundMessage {
                channel_id: "discord".to_string(),
                conversation_id: "555".to_string(),
                sender_id: "777".to_string(),
                text: "!ask hi".to_string(),
            }
        );
    }

    #[test]
    fn bot_authors_are_dropped() {
        let msg: MessageCreate = serde_json::from_value(json!({
            "channel_id": "1",
            "author": { "id": "2", "username": "askbot", "bot": true },
            "content": "!ask loop"
        }))
        .unwrap();
        assert!(msg.into_inbound("discord").is_none());
    }

    #[test]
    fn control_opcodes() {
        assert!(matches!(
            interpret_frame(frame(json!({ "op": 11 }))),
            GatewayEvent::HeartbeatAck
        ));
        assert!(matches!(
            interpret_frame(frame(json!({ "op": 1, "d": null }))),
            GatewayEvent::HeartbeatRequested
        ));
        assert!(matches!(
            interpret_frame(frame(json!({ "op": 7 }))),
            GatewayEvent::Reconnect(_)
        ));
        assert!(matches!(
            interpret_frame(frame(json!({ "op": 9, "d": false }))),
            GatewayEvent::Reconnect(_)
        ));
        assert!(matches!(
            interpret_frame(frame(json!({ "op": 0, "t": "GUILD_CREATE", "d": {} }))),
            GatewayEvent::Ignored
        ));
    }

    #[test]
    fn login_failures_are_fatal_close_codes() {
        assert!(fatal_close_reason(4004).is_some());
        assert!(fatal_close_reason(4014).is_some());
        assert!(fatal_close_reason(4000).is_none());
        assert!(fatal_close_reason(4009).is_none());
        assert!(fatal_close_reason(1000).is_none());
    }

    #[test]
    fn rate_limit_delay_prefers_body_then_header() {
        assert_eq!(
            rate_limit_delay(r#"{"retry_after": 0.25, "global": false}"#, Some("3")),
            Duration::from_millis(250)
        );
        assert_eq!(rate_limit_delay("", Some("2")), Duration::from_secs(2));
        assert_eq!(rate_limit_delay("not json", None), RATE_LIMIT_FALLBACK);
        assert_eq!(
            rate_limit_delay(r#"{"retry_after": 9999}"#, None),
            RATE_LIMIT_MAX_WAIT
        );
    }

    #[test]
    fn ready_reports_user_and_guilds() {
        let f = frame(json!({
            "op": 0, "s": 1, "t": "READY",
            "d": {
                "user": { "id": "1", "username": "askbot", "bot": true },
                "guilds": [{ "id": "10", "unavailable": true }, { "id": "11", "unavailable": true }]
            }
        }));
        let GatewayEvent::Ready(ready) = interpret_frame(f) else {
            panic!("expected ready");
        };
        assert_eq!(ready.user.username, "askbot");
        assert_eq!(ready.guilds.len(), 2);
    }
}
