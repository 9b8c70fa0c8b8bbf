use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use chatllm::budget::FileBudgetLedger;
use chatllm::chat::{ChatMediator, ConversationTurn, turns_from_json};
use chatllm::config::{Config, DEFAULT_CONFIG_PATH};
use chatllm::credentials::ConfigCredentials;
use chatllm::llm::{Provider, ProviderRegistry};
use chatllm::ui::TerminalSurface;

mod repl;

use repl::{Session, budget_summary};

const LOG_ENV: &str = "CHATLLM_LOG";

#[derive(Parser)]
#[command(name = "chatllm", version, about = "Chat with LLM providers from the terminal")]
struct Cli {
    /// Path to the config file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Provider to talk to (openai, anthropic, openrouter, groq, ollama)
    #[arg(short, long, global = true)]
    provider: Option<Provider>,

    /// Model name sent to the provider
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Ledger user charged for completions
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Do not show a spinner while waiting
    #[arg(long, global = true)]
    no_spinner: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start an interactive session (default)
    Chat {
        /// JSON array of turns to start the conversation from
        #[arg(long)]
        history: Option<PathBuf>,
    },
    /// Send a single prompt and print the answer
    Ask {
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },
    /// List supported providers
    Providers,
    /// Show spend and remaining budget for the user
    Budget,
    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let command = cli.command.unwrap_or(Command::Chat { history: None });
    if let Command::Completions { shell } = command {
        clap_complete::generate(shell, &mut Cli::command(), "chatllm", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = Config::load(&cli.config)
        .await
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    if let Some(provider) = cli.provider {
        config.provider = provider;
    }
    if let Some(model) = cli.model {
        config.model = model;
    }
    if let Some(user) = cli.user {
        config.budget_user = user;
    }
    if cli.no_spinner {
        config.show_spinner = false;
    }
    debug!(provider = %config.provider, model = %config.model, "Loaded config");

    match command {
        Command::Providers => {
            list_providers(&config)?;
            Ok(())
        }
        Command::Budget => {
            let ledger = FileBudgetLedger::from_config(&config.budget).await?;
            println!("{}", budget_summary(&ledger, &config.budget_user));
            Ok(())
        }
        Command::Ask { prompt } => {
            let mut session = build_session(config, Vec::new()).await?;
            let answered = session
                .send_interruptible(&prompt.join(" "))
                .await
                .is_some();
            session.shutdown().await;
            if !answered {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Chat { history } => {
            let seed = match history {
                Some(path) => load_history(&path).await?,
                None => Vec::new(),
            };
            let mut session = build_session(config, seed).await?;
            let result = session.run().await;
            session.shutdown().await;
            result
        }
        Command::Completions { .. } => Ok(()),
    }
}

async fn build_session(config: Config, mut seed: Vec<ConversationTurn>) -> Result<Session> {
    let providers = ProviderRegistry::from_config(&config).context("failed to build HTTP client")?;
    let ledger = Arc::new(
        FileBudgetLedger::from_config(&config.budget)
            .await
            .context("failed to open budget ledger")?,
    );
    let surface = Arc::new(TerminalSurface::new());
    let mediator = ChatMediator::new(
        providers,
        Arc::new(ConfigCredentials::new()),
        ledger.clone(),
        surface.clone(),
    );

    if let Some(system) = config.system_prompt.as_deref()
        && seed.first().is_none_or(|turn| turn.role != "system")
    {
        seed.insert(0, ConversationTurn::system(system));
    }
    info!(
        provider = %config.provider,
        model = %config.model,
        user = %config.budget_user,
        turns = seed.len(),
        "Starting chat session"
    );

    Ok(Session::new(config, mediator, ledger, surface, seed))
}

async fn load_history(path: &Path) -> Result<Vec<ConversationTurn>> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read history from {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_slice(&bytes)
        .with_context(|| format!("history in {} is not valid JSON", path.display()))?;
    Ok(turns_from_json(&value)?)
}

fn list_providers(config: &Config) -> Result<()> {
    let registry = ProviderRegistry::from_config(config)?;
    println!("{:<12} {:<40} {:<20} ASSISTANT PREFIX", "PROVIDER", "BASE URL", "KEY ENV");
    for (provider, capabilities) in registry.entries() {
        let marker = if provider == config.provider { "*" } else { " " };
        println!(
            "{marker}{:<11} {:<40} {:<20} {}",
            provider.as_str(),
            config.base_url(provider),
            provider.api_key_env().unwrap_or("-"),
            if capabilities.assistant_prefix { "yes" } else { "no" },
        );
    }
    Ok(())
}
