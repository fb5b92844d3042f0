use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use roundtable_agent::{ResearchWorkflow, StateSnapshot, WorkflowState};
use roundtable_core::config::{AppConfig, ModelConfig, SearchConfig};
use roundtable_core::event::EventBus;
use roundtable_core::types::{SessionId, WorkflowEvent};

#[derive(Parser)]
#[command(name = "roundtable", version, about = "Multi-analyst research reports with human review")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "roundtable.toml")]
    config: PathBuf,

    /// Session ID (auto-generated for `run` if not provided)
    #[arg(short, long)]
    session: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Research a topic interactively, reviewing the analyst panel
    Run {
        /// Number of analysts (defaults to workflow.max_analysts)
        #[arg(short = 'n', long)]
        analysts: Option<usize>,
        /// The research topic
        #[arg(trailing_var_arg = true)]
        topic: Vec<String>,
    },
    /// Send feedback on the analyst panel and regenerate it
    Feedback {
        #[arg(trailing_var_arg = true)]
        text: Vec<String>,
    },
    /// Approve the analyst panel and finish the report
    Approve,
    /// Continue a session from where it stopped
    Resume,
    /// Show where a session is
    Status,
    /// Print the finished report
    Report {
        /// Print the podcast script instead
        #[arg(long)]
        podcast: bool,
    },
    /// Manage stored sessions
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// List sessions, most recent first
    List,
    /// Delete a session
    Delete {
        /// Session ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("roundtable=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "roundtable", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;
    if let Commands::Config = &cli.command {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let event_bus = Arc::new(EventBus::default());
    let workflow = ResearchWorkflow::from_config(&config, Some(event_bus.clone()))?;
    let printer = spawn_event_printer(&event_bus);

    let result = match cli.command {
        Commands::Run { analysts, topic } => {
            let session_id = cli
                .session
                .clone()
                .unwrap_or_else(|| SessionId::new().to_string());
            run_interactive(&workflow, &session_id, topic.join(" "), analysts).await
        }
        Commands::Feedback { text } => {
            let session_id = require_session(&cli.session)?;
            let text = text.join(" ");
            workflow.submit_feedback(session_id, Some(&text)).await?;
            let snapshot = workflow.resume(session_id).await?;
            print_outcome(&snapshot)
        }
        Commands::Approve => {
            let session_id = require_session(&cli.session)?;
            workflow.submit_feedback(session_id, None).await?;
            let snapshot = workflow.resume(session_id).await?;
            print_outcome(&snapshot)
        }
        Commands::Resume => {
            let session_id = require_session(&cli.session)?;
            let snapshot = workflow.resume(session_id).await?;
            print_outcome(&snapshot)
        }
        Commands::Status => {
            let session_id = require_session(&cli.session)?;
            print_status(&workflow.snapshot(session_id).await?)
        }
        Commands::Report { podcast } => {
            let session_id = require_session(&cli.session)?;
            let state = workflow.state(session_id).await?;
            print_report(&state, podcast)
        }
        Commands::Sessions { action } => match action {
            SessionAction::List => {
                let sessions = workflow.sessions().await?;
                if sessions.is_empty() {
                    println!("No sessions.");
                }
                for id in sessions {
                    println!("{}", id);
                }
                Ok(())
            }
            SessionAction::Delete { id } => {
                if workflow.delete(&id).await? {
                    println!("Deleted session {}", id);
                } else {
                    println!("No session {}", id);
                }
                Ok(())
            }
        },
        Commands::Config | Commands::Completions { .. } => Ok(()),
    };

    printer.abort();
    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    result
}

fn require_session(session: &Option<String>) -> anyhow::Result<&str> {
    session
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("--session is required for this command"))
}

fn load_config(path: &PathBuf) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }

    let home_config = dirs_home().map(|h| h.join(".roundtable").join("config.toml"));
    if let Some(path) = home_config.filter(|p| p.exists()) {
        info!(path = %path.display(), "Loading config from home directory");
        return Ok(AppConfig::load(&path)?);
    }

    eprintln!("Warning: No config file found. Set OPENAI_API_KEY or create roundtable.toml");
    create_env_config()
}

/// Minimal config from the environment: an OpenAI key if set, otherwise a
/// local Ollama endpoint.
fn create_env_config() -> anyhow::Result<AppConfig> {
    let openai_key = std::env::var("OPENAI_API_KEY").ok();
    let (model_id, base_url) = match &openai_key {
        Some(_) => ("gpt-4o".to_string(), None),
        None => (
            "llama3.2".to_string(),
            Some("http://localhost:11434/v1/chat/completions".to_string()),
        ),
    };

    let model = ModelConfig {
        provider: if openai_key.is_some() { "openai" } else { "ollama" }.to_string(),
        model_id,
        api_key: openai_key,
        base_url,
        max_tokens: 4096,
        temperature: 0.0,
        request_timeout_secs: 120,
        retry: None,
    };

    let config = AppConfig {
        model,
        fallback_models: vec![],
        search: SearchConfig {
            tavily_api_key: std::env::var("TAVILY_API_KEY").ok(),
            news_api_key: std::env::var("NEWS_API_KEY").ok(),
            ..SearchConfig::default()
        },
        workflow: Default::default(),
        store: Default::default(),
    };
    config.validate()?;
    Ok(config)
}

fn spawn_event_printer(event_bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                WorkflowEvent::NodeStarted { session_id, node } if !session_id.contains('/') => {
                    eprintln!("[{}] ...", node);
                }
                WorkflowEvent::NodeCompleted {
                    session_id,
                    node,
                    elapsed_ms,
                } if !session_id.contains('/') => {
                    eprintln!("[{}: ok] {:.1}s", node, elapsed_ms as f64 / 1000.0);
                }
                WorkflowEvent::BranchFailed { branch, error, .. } => {
                    eprintln!("[{}: FAILED] {}", branch, truncate(&error, 200));
                }
                _ => {}
            }
        }
    })
}

async fn run_interactive(
    workflow: &ResearchWorkflow,
    session_id: &str,
    topic: String,
    analysts: Option<usize>,
) -> anyhow::Result<()> {
    let topic = if topic.trim().is_empty() {
        prompt("Research topic".to_string(), false).await?
    } else {
        topic
    };

    eprintln!("Session: {}", session_id);
    let mut snapshot = workflow.start(session_id, &topic, analysts).await?;

    while snapshot.paused_at.is_some() {
        print_analysts(&snapshot.typed::<WorkflowState>()?);
        let token = workflow.config().approval_token.clone();
        let feedback = prompt(
            format!("Feedback on the panel (empty or '{}' to approve)", token),
            true,
        )
        .await?;

        workflow.submit_feedback(session_id, Some(&feedback)).await?;
        snapshot = workflow.resume(session_id).await?;
    }

    print_outcome(&snapshot)
}

/// Read a line from the terminal without blocking the runtime.
async fn prompt(text: String, allow_empty: bool) -> anyhow::Result<String> {
    let answer = tokio::task::spawn_blocking(move || {
        dialoguer::Input::<String>::new()
            .with_prompt(text)
            .allow_empty(allow_empty)
            .interact_text()
    })
    .await??;
    Ok(answer)
}

fn print_analysts(state: &WorkflowState) {
    println!("\nAnalysts for \"{}\":", state.topic);
    for analyst in &state.analysts {
        println!("\n  {}", analyst.label());
        println!("    Affiliation: {}", analyst.affiliation);
        println!("    Focus: {}", analyst.description);
    }
    println!();
}

fn print_outcome(snapshot: &StateSnapshot) -> anyhow::Result<()> {
    let state: WorkflowState = snapshot.typed()?;
    if snapshot.paused_at.is_some() {
        print_analysts(&state);
        println!(
            "Awaiting review. Use `roundtable -s {} approve` or `feedback <text>`.",
            snapshot.session_id
        );
        return Ok(());
    }
    if !snapshot.failures.is_empty() {
        eprintln!("{} interview(s) failed:", snapshot.failures.len());
        for failure in &snapshot.failures {
            eprintln!("  {}: {}", failure.branch, truncate(&failure.error, 200));
        }
    }
    print_report(&state, false)
}

fn print_status(snapshot: &StateSnapshot) -> anyhow::Result<()> {
    let state: WorkflowState = snapshot.typed()?;
    println!("Session:   {}", snapshot.session_id);
    println!("Topic:     {}", state.topic);
    let position = match (&snapshot.paused_at, snapshot.is_complete()) {
        (Some(node), _) => format!("paused before {}", node),
        (None, true) => "complete".to_string(),
        (None, false) => format!("pending {}", snapshot.next.join(", ")),
    };
    println!("Status:    {}", position);
    println!("Analysts:  {}", state.analysts.len());
    println!("Sections:  {}", state.sections.len());
    println!("Failures:  {}", snapshot.failures.len());
    println!("Version:   {}", snapshot.version);
    if let Some(error) = &state.podcast_error {
        println!("Podcast:   unavailable ({})", truncate(error, 120));
    }
    Ok(())
}

fn print_report(state: &WorkflowState, podcast: bool) -> anyhow::Result<()> {
    if podcast {
        match (&state.podcast_script, &state.podcast_error) {
            (Some(script), _) => println!("{}", script),
            (None, Some(error)) => anyhow::bail!("podcast script failed: {}", error),
            (None, None) => anyhow::bail!("no podcast script yet"),
        }
        return Ok(());
    }
    match &state.final_report {
        Some(report) => {
            println!("{}", report);
            Ok(())
        }
        None => anyhow::bail!("the report is not finished yet"),
    }
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
