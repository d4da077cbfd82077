//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.askbot/config.json`) and environment.
//! Environment variables (`DISCORD_TOKEN`, `CHATBOT_API_URL`, `CHATBOT_API_KEY`) override the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Discord caps a single message at 2000 characters.
pub const DEFAULT_MESSAGE_LIMIT: usize = 2000;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Discord connector settings.
    #[serde(default)]
    pub discord: DiscordConfig,

    /// Question-answering service the `ask` command is relayed to.
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

/// Discord bot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordConfig {
    /// Bot token from the Discord developer portal. Overridden by DISCORD_TOKEN env when set.
    pub bot_token: Option<String>,

    /// Command prefix (default "!").
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,

    /// Command name after the prefix (default "ask").
    #[serde(default = "default_command_name")]
    pub command_name: String,

    /// REST base URL override (tests, proxies).
    pub api_base: Option<String>,

    /// Gateway websocket URL override.
    pub gateway_url: Option<String>,
}

/// Upstream HTTP endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamConfig {
    /// Endpoint that receives the POST. Overridden by CHATBOT_API_URL env when set.
    pub url: Option<String>,

    /// Sent as `Authorization: Bearer <key>` when present. Overridden by CHATBOT_API_KEY env when set.
    pub api_key: Option<String>,

    /// Request timeout in seconds (default 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum characters per outbound message (default 2000).
    #[serde(default = "default_message_limit")]
    pub message_limit: usize,
}

fn default_command_prefix() -> String {
    "!".to_string()
}

fn default_command_name() -> String {
    "ask".to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_message_limit() -> usize {
    DEFAULT_MESSAGE_LIMIT
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            command_prefix: default_command_prefix(),
            command_name: default_command_name(),
            api_base: None,
            gateway_url: None,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            timeout_secs: default_timeout_secs(),
            message_limit: default_message_limit(),
        }
    }
}

/// Read-only settings the relay needs for every request. Built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub message_limit: usize,
}

impl RelayConfig {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            message_limit: DEFAULT_MESSAGE_LIMIT,
        }
    }

    /// Resolve endpoint and key (env over file) and validate them. Missing or unparsable URL is an error.
    pub fn from_config(config: &Config) -> Result<Self> {
        let endpoint = resolve_upstream_url(config).context(
            "upstream url not configured (set CHATBOT_API_URL or upstream.url in the config file)",
        )?;
        reqwest::Url::parse(&endpoint)
            .with_context(|| format!("invalid upstream url {:?}", endpoint))?;
        if config.upstream.message_limit == 0 {
            anyhow::bail!("upstream.messageLimit must be greater than zero");
        }
        Ok(Self {
            endpoint,
            api_key: resolve_api_key(config),
            timeout: Duration::from_secs(config.upstream.timeout_secs),
            message_limit: config.upstream.message_limit,
        })
    }
}

/// Trimmed, non-empty value from `primary`, else from `fallback`.
fn first_non_empty(primary: Option<String>, fallback: Option<&String>) -> Option<String> {
    primary
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            fallback
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve the Discord bot token: env DISCORD_TOKEN overrides config.
pub fn resolve_discord_token(config: &Config) -> Option<String> {
    first_non_empty(
        std::env::var("DISCORD_TOKEN").ok(),
        config.discord.bot_token.as_ref(),
    )
}

/// Resolve the upstream URL: env CHATBOT_API_URL overrides config.
pub fn resolve_upstream_url(config: &Config) -> Option<String> {
    first_non_empty(
        std::env::var("CHATBOT_API_URL").ok(),
        config.upstream.url.as_ref(),
    )
}

/// Resolve the upstream API key: env CHATBOT_API_KEY overrides config.
pub fn resolve_api_key(config: &Config) -> Option<String> {
    first_non_empty(
        std::env::var("CHATBOT_API_KEY").ok(),
        config.upstream.api_key.as_ref(),
    )
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("ASKBOT_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".askbot").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, ASKBOT_CONFIG_PATH, or the default. Missing file => default config.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
