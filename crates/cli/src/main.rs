use askbot::relay::{Query, Relay};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "askbot")]
#[command(about = "Relay Discord !ask commands to a chatbot HTTP API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Connect to Discord and answer `!ask` commands until Ctrl+C. Needs DISCORD_TOKEN and CHATBOT_API_URL (env, .env, or config file).
    Run {
        /// Config file path (default: ASKBOT_CONFIG_PATH or ~/.askbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Send one question to the chatbot API and print the reply exactly as it would be posted to Discord.
    Ask {
        /// Config file path (default: ASKBOT_CONFIG_PATH or ~/.askbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// The question.
        #[arg(required = true, trailing_var_arg = true)]
        question: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    // A missing .env is normal; variables may come from the real environment.
    let _ = dotenv::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("askbot {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Run { config }) => {
            if let Err(e) = run_bot(config).await {
                log::error!("bot failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Ask { config, question }) => match run_ask(config, question.join(" ")).await {
            Ok(true) => {}
            Ok(false) => std::process::exit(2),
            Err(e) => {
                log::error!("ask failed: {:#}", e);
                std::process::exit(1);
            }
        },
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_bot(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = askbot::config::load_config(config_path)?;
    log::info!("loaded config from {}", path.display());
    askbot::bot::run_bot(config).await
}

/// Prints each fragment separated by a blank line. Returns false when the relay reported an error.
async fn run_ask(config_path: Option<std::path::PathBuf>, question: String) -> anyhow::Result<bool> {
    let (config, _) = askbot::config::load_config(config_path)?;
    let relay_config = askbot::config::RelayConfig::from_config(&config)?;
    let relay = Relay::with_http(relay_config)?;
    let query = Query {
        text: question,
        sender_id: "cli".to_string(),
        channel_id: "cli".to_string(),
    };
    let reply = relay.handle(&query).await;
    for (i, fragment) in reply.fragments().enumerate() {
        if i > 0 {
            println!();
        }
        println!("{}", fragment);
    }
    Ok(reply.error().is_none())
}
