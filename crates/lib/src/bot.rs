//! Bot runtime: connects the Discord channel to the relay.
//!
//! Each inbound command runs in its own task: typing indicator, one upstream call,
//! then the reply fragments are sent one after another to the originating conversation.

use crate::channels::{ChannelHandle, ChannelRegistry, DiscordChannel, InboundMessage};
use crate::command::Command;
use crate::config::{self, Config, RelayConfig};
use crate::relay::{Query, Relay, Reply};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Discord shows typing for about 10 seconds; refresh before it lapses.
const TYPING_REFRESH: Duration = Duration::from_secs(8);

/// Shared state for command handling (relay, command matcher, channels).
#[derive(Clone)]
pub struct BotState {
    pub relay: Relay,
    pub command: Command,
    pub channel_registry: Arc<ChannelRegistry>,
}

/// Keeps the typing indicator alive until dropped.
struct TypingIndicator {
    task: JoinHandle<()>,
}

impl TypingIndicator {
    fn start(handle: Arc<dyn ChannelHandle>, conversation_id: String) -> Self {
        let task = tokio::spawn(async move {
            loop {
                if let Err(e) = handle.trigger_typing(&conversation_id).await {
                    log::debug!("typing indicator failed: {}", e);
                }
                tokio::time::sleep(TYPING_REFRESH).await;
            }
        });
        Self { task }
    }
}

impl Drop for TypingIndicator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Send every fragment of `reply` to one conversation, in order. Stops at the first failed send.
/// Returns how many fragments were sent.
pub async fn deliver(
    reply: &Reply,
    handle: &dyn ChannelHandle,
    conversation_id: &str,
) -> Result<usize, String> {
    let mut sent = 0;
    for fragment in reply.fragments() {
        handle.send_message(conversation_id, &fragment).await?;
        sent += 1;
    }
    Ok(sent)
}

/// Handle one inbound message: ignore anything that is not the command, otherwise relay and reply.
pub async fn process_inbound_message(state: BotState, msg: InboundMessage) {
    let Some(question) = state.command.parse(&msg.text) else {
        return;
    };
    let Some(handle) = state.channel_registry.get(&msg.channel_id).await else {
        log::warn!("inbound: no channel registered for {}", msg.channel_id);
        return;
    };
    if question.is_empty() {
        if let Err(e) = handle
            .send_message(&msg.conversation_id, &state.command.usage())
            .await
        {
            log::warn!("inbound: sending usage failed: {}", e);
        }
        return;
    }

    let query = Query {
        text: question.to_string(),
        sender_id: msg.sender_id.clone(),
        channel_id: msg.conversation_id.clone(),
    };
    let typing = TypingIndicator::start(handle.clone(), msg.conversation_id.clone());
    let reply = state.relay.handle(&query).await;
    let delivered = deliver(&reply, handle.as_ref(), &msg.conversation_id).await;
    drop(typing);
    match delivered {
        Ok(n) => log::debug!("inbound: sent {} message(s) to {}", n, msg.conversation_id),
        Err(e) => log::warn!("inbound: send_message failed: {}", e),
    }
}

/// Run the bot until Ctrl+C / SIGTERM.
/// Fails at startup when the Discord token or the upstream URL is missing, and later if
/// Discord rejects the login (bad token, disallowed intents).
pub async fn run_bot(config: Config) -> Result<()> {
    let token = config::resolve_discord_token(&config).context(
        "discord token not configured (set DISCORD_TOKEN or discord.botToken in the config file)",
    )?;
    let relay_config = RelayConfig::from_config(&config)?;
    let command = Command::from_config(&config.discord);
    log::info!(
        "relaying {}{} to {} (timeout {}s, auth header {})",
        config.discord.command_prefix,
        config.discord.command_name,
        relay_config.endpoint,
        relay_config.timeout.as_secs(),
        if relay_config.api_key.is_some() { "on" } else { "off" }
    );
    let relay = Relay::with_http(relay_config).context("building upstream http client")?;

    let channel_registry = Arc::new(ChannelRegistry::new());
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(64);
    let discord = Arc::new(DiscordChannel::from_config(&config.discord, token));
    let mut channel_task = discord.clone().start_inbound(inbound_tx);
    channel_registry
        .register(discord.id().to_string(), discord)
        .await;
    log::info!("discord channel registered and gateway loop started");

    let state = BotState {
        relay,
        command,
        channel_registry: channel_registry.clone(),
    };
    let processor = tokio::spawn(async move {
        while let Some(msg) = inbound_rx.recv().await {
            tokio::spawn(process_inbound_message(state.clone(), msg));
        }
    });

    let gateway = tokio::select! {
        _ = shutdown_signal() => {
            log::info!("shutdown signal received, stopping channels");
            for id in channel_registry.ids().await {
                if let Some(handle) = channel_registry.get(&id).await {
                    handle.stop();
                }
            }
            channel_task.await
        }
        res = &mut channel_task => res,
    };
    let _ = processor.await;
    log::info!("bot stopped");
    match gateway.context("discord gateway task panicked")? {
        Ok(()) => Ok(()),
        Err(e) => Err(anyhow::anyhow!("discord login failed: {}", e)),
    }
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{RelayRequest, RelayResponse, Transport};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Query `c:n` answers with `c` repeated `n` times; anything else is echoed back.
    struct EchoTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for EchoTransport {
        async fn post(&self, request: &RelayRequest) -> RelayResponse {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            let q = &request.body.query;
            let answer = match q.split_once(':') {
                Some((c, n)) => c.repeat(n.parse().unwrap_or(1)),
                None => q.clone(),
            };
            RelayResponse::Success {
                status: 200,
                body: serde_json::json!({ "answer": answer }).to_string(),
            }
        }
    }

    /// Records (conversation, text) for every send.
    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<(String, String)>>,
        typing: AtomicUsize,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl ChannelHandle for RecordingChannel {
        fn id(&self) -> &str {
            "discord"
        }

        fn stop(&self) {}

        async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), String> {
            tokio::task::yield_now().await;
            let mut sent = self.sent.lock().unwrap();
            if self.fail_after.is_some_and(|n| sent.len() >= n) {
                return Err("rate limited".to_string());
            }
            sent.push((conversation_id.to_string(), text.to_string()));
            Ok(())
        }

        async fn trigger_typing(&self, _conversation_id: &str) -> Result<(), String> {
            self.typing.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn state_with(channel: Arc<RecordingChannel>) -> (BotState, Arc<EchoTransport>) {
        let transport = Arc::new(EchoTransport {
            calls: AtomicUsize::new(0),
        });
        let relay = Relay::new(
            RelayConfig::new("http://upstream.test/ask", None),
            transport.clone(),
        );
        let registry = Arc::new(ChannelRegistry::new());
        registry.register("discord".to_string(), channel).await;
        let state = BotState {
            relay,
            command: Command::default(),
            channel_registry: registry,
        };
        (state, transport)
    }

    fn inbound(conversation: &str, text: &str) -> InboundMessage {
        InboundMessage {
            channel_id: "discord".to_string(),
            conversation_id: conversation.to_string(),
            sender_id: "u1".to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn non_command_messages_are_ignored() {
        let channel = Arc::new(RecordingChannel::default());
        let (state, transport) = state_with(channel.clone()).await;
        process_inbound_message(state, inbound("c1", "just chatting")).await;
        assert!(channel.sent.lock().unwrap().is_empty());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_question_gets_usage_without_upstream_call() {
        let channel = Arc::new(RecordingChannel::default());
        let (state, transport) = state_with(channel.clone()).await;
        process_inbound_message(state, inbound("c1", "!ask   ")).await;
        assert_eq!(
            *channel.sent.lock().unwrap(),
            vec![("c1".to_string(), "Usage: !ask <your question>".to_string())]
        );
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn long_answer_is_sent_in_order() {
        let channel = Arc::new(RecordingChannel::default());
        let (state, _) = state_with(channel.clone()).await;
        process_inbound_message(state, inbound("c1", "!ask z:4100")).await;
        let sent = channel.sent.lock().unwrap();
        let lens: Vec<usize> = sent.iter().map(|(_, t)| t.len()).collect();
        assert_eq!(lens, vec![2000, 2000, 100]);
        assert!(sent.iter().all(|(c, _)| c == "c1"));
        assert!(channel.typing.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn delivery_stops_at_first_failure() {
        let channel = Arc::new(RecordingChannel {
            fail_after: Some(1),
            ..Default::default()
        });
        let (state, _) = state_with(channel.clone()).await;
        let query = Query {
            text: "y:4500".to_string(),
            sender_id: "u".to_string(),
            channel_id: "c".to_string(),
        };
        let reply = state.relay.handle(&query).await;
        let res = deliver(&reply, channel.as_ref(), "c").await;
        assert_eq!(res, Err("rate limited".to_string()));
        assert_eq!(channel.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_invocations_keep_per_conversation_order() {
        let channel = Arc::new(RecordingChannel::default());
        let (state, _) = state_with(channel.clone()).await;
        let a = tokio::spawn(process_inbound_message(state.clone(), inbound("A", "!ask a:6000")));
        let b = tokio::spawn(process_inbound_message(state.clone(), inbound("B", "!ask b:5000")));
        a.await.unwrap();
        b.await.unwrap();

        let sent = channel.sent.lock().unwrap();
        let for_conv = |conv: &str| -> Vec<String> {
            sent.iter()
                .filter(|(c, _)| c == conv)
                .map(|(_, t)| t.clone())
                .collect()
        };
        let a_parts = for_conv("A");
        let b_parts = for_conv("B");
        assert_eq!(a_parts.concat(), "a".repeat(6000));
        assert_eq!(b_parts.concat(), "b".repeat(5000));
        assert!(a_parts.iter().all(|t| t.chars().all(|c| c == 'a')));
        assert!(b_parts.iter().all(|t| t.chars().all(|c| c == 'b')));
        assert_eq!(a_parts.len(), 3);
        assert_eq!(b_parts.len(), 3);
    }
}
