use std::io::{BufRead, Write as _};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use engram::topic::GENERAL_TOPIC;
use engram::{
    Config, Engine, Error, ExternalFragments, FactCategory, LexiconModel, LlmClient,
    OpenAiChatClient, Store, TopicClassifier, TopicModel, ZeroShotClient,
};

/// Engram - conversation memory and context engine
#[derive(Parser)]
#[command(name = "engram", version, about)]
struct Cli {
    /// Config file path (defaults to ~/.config/engram/config.toml)
    #[arg(short, long, env = "ENGRAM_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory override
    #[arg(long, env = "ENGRAM_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat against the current session (default)
    Chat {
        /// Resume a specific session instead of the current one
        #[arg(short, long)]
        session: Option<String>,
    },
    /// List sessions
    Sessions,
    /// Show a session's messages
    History {
        /// Session id
        #[arg(short, long)]
        session: String,
        /// Most recent N messages
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Delete a session and its messages
    Delete {
        /// Session id
        #[arg(short, long)]
        session: String,
    },
    /// Manage durable user facts
    Facts {
        #[command(subcommand)]
        command: FactsCommand,
    },
}

#[derive(Subcommand)]
enum FactsCommand {
    /// List all facts
    List,
    /// Add a fact
    Add {
        /// Fact text
        content: String,
        /// personal, preference, context, or other
        #[arg(short, long, default_value = "other")]
        category: String,
        /// Confidence in [0.0, 1.0]
        #[arg(long, default_value = "1.0")]
        confidence: f64,
    },
    /// Delete a fact by id
    Delete {
        /// Fact id
        id: String,
    },
    /// Delete all facts
    Clear,
}

/// Placeholder client used when no LLM endpoint is configured; chat turns
/// fail with a clear message, everything else still works
struct UnconfiguredLlm;

#[async_trait::async_trait]
impl LlmClient for UnconfiguredLlm {
    async fn complete(&self, _payload: &engram::ContextPayload) -> engram::Result<String> {
        Err(Error::Llm(
            "no LLM endpoint configured (set [llm] endpoint and model in config.toml)".to_string(),
        ))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,engram=info",
        1 => "info,engram=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    let store = Store::open(config.db_path())?;
    if store.degraded() {
        eprintln!("warning: database unavailable, running with reduced durability");
    }

    let model: Arc<dyn TopicModel> = match &config.classifier.endpoint {
        Some(endpoint) => Arc::new(ZeroShotClient::new(
            endpoint.clone(),
            config.classifier.api_key.clone(),
        )?),
        None => Arc::new(LexiconModel),
    };
    let classifier = TopicClassifier::new(model, config.classifier.confidence_threshold);

    let llm: Arc<dyn LlmClient> = match (&config.llm.endpoint, &config.llm.model) {
        (Some(endpoint), Some(model)) => Arc::new(OpenAiChatClient::new(
            endpoint.clone(),
            config.llm.api_key.clone(),
            model.clone(),
        )?),
        _ => Arc::new(UnconfiguredLlm),
    };

    let engine = Engine::new(store, &config, classifier, llm);

    match cli.command.unwrap_or(Command::Chat { session: None }) {
        Command::Chat { session } => chat_repl(&engine, session).await,
        Command::Sessions => {
            for session in engine.list_sessions()? {
                println!(
                    "{}  {:<40}  {} messages  (last active {})",
                    session.id,
                    session.title,
                    session.message_count,
                    session.last_message_at.format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        }
        Command::History { session, limit } => {
            let Some(messages) = engine.load_session(&session, limit)? else {
                println!("conversation not found, please try another");
                return Ok(());
            };
            for message in messages {
                println!("[{}] {}", message.role.as_str(), message.content);
            }
            Ok(())
        }
        Command::Delete { session } => {
            engine.delete_session(&session)?;
            println!("deleted {session}");
            Ok(())
        }
        Command::Facts { command } => run_facts(&engine, command),
    }
}

fn run_facts(engine: &Engine, command: FactsCommand) -> anyhow::Result<()> {
    match command {
        FactsCommand::List => {
            for fact in engine.list_facts()? {
                println!("{}  [{}]  {}", fact.id, fact.category, fact.content);
            }
        }
        FactsCommand::Add {
            content,
            category,
            confidence,
        } => {
            let category = FactCategory::from_str_value(&category)
                .with_context(|| format!("unknown category '{category}'"))?;
            let fact = engine.add_fact(&content, category, confidence)?;
            println!("added {}", fact.id);
        }
        FactsCommand::Delete { id } => {
            if engine.delete_fact(&id)? {
                println!("deleted {id}");
            } else {
                println!("no such fact");
            }
        }
        FactsCommand::Clear => {
            let removed = engine.clear_facts()?;
            println!("removed {removed} facts");
        }
    }
    Ok(())
}

async fn chat_repl(engine: &Engine, session: Option<String>) -> anyhow::Result<()> {
    let session_id = match session {
        Some(id) => {
            engine.session_manager().set_current(&id)?;
            id
        }
        None => engine.continue_or_create()?.id,
    };

    println!("session {session_id} — /new starts a fresh chat, /quit exits");

    let stdin = std::io::stdin();
    let mut session_id = session_id;
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            "/quit" | "/exit" => break,
            "/new" => {
                let session = engine.new_chat()?;
                session_id = session.id;
                println!("started {session_id}");
                continue;
            }
            "/reset" => {
                engine.reset_topic(&session_id)?;
                println!("topic cleared");
                continue;
            }
            _ => {}
        }

        match engine.send_turn(&session_id, line, &ExternalFragments::default()).await {
            Ok(outcome) => {
                if outcome.topic_changed
                    && let Some(topic) = &outcome.current_topic
                    && topic != GENERAL_TOPIC
                {
                    tracing::debug!(topic, "topic changed");
                }
                println!("{}", outcome.assistant_text);
            }
            Err(e) => eprintln!("error: {e}"),
        }
    }

    Ok(())
}
