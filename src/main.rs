// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Scriptorium: batch OCR and book-marketing reports from the command line

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use scriptorium::config::{check_file_size_limit, AppConfig};
use scriptorium::gemini::{ApiKey, GeminiClient};
use scriptorium::history::History;
use scriptorium::inputs::collect_inputs;
use scriptorium::model::{validate_model_name, KNOWN_MODELS};
use scriptorium::progress::ProgressRenderer;
use scriptorium::runner::{self, RunSettings};
use scriptorium::tasks::marketing::MarketingTask;
use scriptorium::tasks::transcribe::TranscribeTask;
use scriptorium::tasks::Task;
use scriptorium::validation::{display_name, redact, validate_output_directory};
use scriptorium::{Result, ScriptoriumError};

/// Scriptorium CLI - Gemini-powered OCR and book marketing
#[derive(Parser, Debug)]
#[command(name = "scriptorium")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version = "1.0.0")]
#[command(about = "Batch OCR and book-marketing reports using the Gemini API", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "scriptorium.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by both processing commands
#[derive(Args, Debug)]
struct RunArgs {
    /// Files, directories or glob patterns to process
    #[arg(required = true)]
    files: Vec<String>,

    /// Output directory (overrides config)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Gemini model to use (overrides config)
    #[arg(short, long)]
    model: Option<String>,

    /// Descend into subdirectories
    #[arg(short, long)]
    recursive: bool,

    /// Leave inputs alone when their output file already exists
    #[arg(long)]
    skip_existing: bool,

    /// Google API key
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Transcribe images and PDFs to Markdown text
    Transcribe {
        #[command(flatten)]
        run: RunArgs,

        /// Maximum size of a single input in MB (1-500)
        #[arg(long)]
        max_size_mb: Option<u64>,

        /// Prompt sent with every file (overrides config)
        #[arg(long)]
        prompt: Option<String>,
    },

    /// Generate a marketing report for each manuscript
    Marketing {
        #[command(flatten)]
        run: RunArgs,
    },

    /// List known model names
    Models,

    /// Check that the API is reachable with the given key
    Status {
        /// Google API key
        #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Run ledger operations
    History {
        #[command(subcommand)]
        action: HistoryCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "scriptorium.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[derive(Subcommand, Debug)]
enum HistoryCommands {
    /// List recent ledger entries
    List {
        /// Number of entries to show
        #[arg(short, long, default_value = "10")]
        count: usize,
    },

    /// Clear the ledger
    Clear {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Transcribe { run, max_size_mb, prompt } => {
            let max_mb = max_size_mb.unwrap_or(config.limits.max_file_size_mb);
            check_file_size_limit(max_mb)?;
            let prompt = prompt.unwrap_or_else(|| config.prompts.transcribe.clone());
            if prompt.trim().is_empty() {
                return Err(ScriptoriumError::Config("Prompt cannot be empty".to_string()));
            }
            let task = Arc::new(TranscribeTask::new(&prompt, max_mb));
            let model = run.model.clone().unwrap_or_else(|| config.models.transcribe.clone());
            run_task(&config, task, run, model, max_mb, cli.quiet).await
        }
        Commands::Marketing { run } => {
            let task = Arc::new(MarketingTask::new(
                &config.prompts.marketing_preamble,
                &config.prompts.marketing_tasks,
                config.limits.max_content_chars,
            ));
            let model = run.model.clone().unwrap_or_else(|| config.models.marketing.clone());
            let max_mb = config.limits.max_file_size_mb;
            run_task(&config, task, run, model, max_mb, cli.quiet).await
        }
        Commands::Models => {
            run_models(&config);
            Ok(())
        }
        Commands::Status { api_key } => run_status(&config, api_key).await,
        Commands::Config { action } => run_config_command(config, action, &cli.config),
        Commands::History { action } => run_history_command(&config, action),
    }
}

/// Validate everything up front, then hand the inputs to a worker
async fn run_task(
    config: &AppConfig,
    task: Arc<dyn Task>,
    args: RunArgs,
    model: String,
    max_file_size_mb: u64,
    quiet: bool,
) -> Result<()> {
    validate_model_name(&model)?;
    let api_key = ApiKey::parse(args.api_key.as_deref().unwrap_or_default())?;

    let output_dir = args.output.unwrap_or_else(|| config.output.directory.clone());
    let output_dir = validate_output_directory(&output_dir)?;

    let selection = collect_inputs(&args.files, args.recursive, task.as_ref(), max_file_size_mb)?;
    if selection.accepted.is_empty() {
        return Err(ScriptoriumError::NoInputs);
    }

    let client = GeminiClient::new(
        &config.api.base_url,
        api_key,
        Duration::from_secs(config.api.timeout_secs),
    )?;

    let settings = RunSettings {
        model,
        retry: config.api.retry_policy(),
        output_dir: output_dir.clone(),
        skip_existing: args.skip_existing,
        history: config
            .history
            .enabled
            .then(|| History::new(config.history.path.clone())),
    };

    let (cancel_tx, cancel_rx) = watch::channel(false);
    spawn_signal_handler(cancel_tx);

    let total = selection.accepted.len();
    let handle = runner::start(task, selection.accepted, Arc::new(client), settings, cancel_rx);

    let renderer = ProgressRenderer::new(quiet);
    let summary = handle.wait(|event| renderer.handle(event)).await?;
    renderer.finish();

    println!("\n{}", summary.render(&output_dir));

    if summary.is_success() {
        Ok(())
    } else {
        Err(ScriptoriumError::RunIncomplete {
            failed: summary.failures.len(),
            total,
        })
    }
}

/// Exit status after a second Ctrl+C
const FORCE_QUIT_EXIT_CODE: i32 = 130;

/// Request cancellation on Ctrl+C or SIGTERM; a second Ctrl+C exits at once
fn spawn_signal_handler(cancel_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let first = async {
            let ctrl_c = async {
                if let Err(e) = signal::ctrl_c().await {
                    error!("Failed to install Ctrl+C handler: {}", e);
                    std::future::pending::<()>().await;
                }
            };

            #[cfg(unix)]
            let terminate = async {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sig) => {
                        sig.recv().await;
                    }
                    Err(e) => {
                        error!("Failed to install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => warn!("Received Ctrl+C, cancelling after the current request (Ctrl+C again to quit)..."),
                _ = terminate => warn!("Received SIGTERM, cancelling after the current request..."),
            }
        };

        let second = async {
            if signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
            warn!("Received second Ctrl+C, exiting");
        };

        cancel_on_signals(first, second, cancel_tx).await;
        std::process::exit(FORCE_QUIT_EXIT_CODE);
    });
}

/// Set the cancel flag when `first` fires, then return once `second` fires
async fn cancel_on_signals<A, B>(first: A, second: B, cancel_tx: watch::Sender<bool>)
where
    A: std::future::Future<Output = ()>,
    B: std::future::Future<Output = ()>,
{
    first.await;
    let _ = cancel_tx.send(true);
    second.await;
}

fn run_models(config: &AppConfig) {
    println!("Known models:");
    for model in KNOWN_MODELS {
        let mut uses = Vec::new();
        if *model == config.models.transcribe {
            uses.push("transcribe");
        }
        if *model == config.models.marketing {
            uses.push("marketing");
        }
        if uses.is_empty() {
            println!("    {}", model);
        } else {
            println!("  * {} (default for {})", model, uses.join(", "));
        }
    }
}

async fn run_status(config: &AppConfig, api_key: Option<String>) -> Result<()> {
    println!("Scriptorium v1.0.0 Status");
    println!("=========================");
    println!("API: {}", config.api.base_url);

    let api_key = ApiKey::parse(api_key.as_deref().unwrap_or_default())?;
    let client = GeminiClient::new(
        &config.api.base_url,
        api_key,
        Duration::from_secs(config.api.timeout_secs),
    )?;

    match client.list_models().await {
        Ok(models) => {
            println!("Connection: ✓ OK");
            println!("\nAvailable models:");
            for m in &models {
                let marker = if *m == config.models.transcribe || *m == config.models.marketing {
                    "*"
                } else {
                    " "
                };
                println!("  {} {}", marker, m);
            }
        }
        Err(e) => println!("Connection: ✗ Error - {}", redact(&e.to_string())),
    }

    println!("\nConfiguration:");
    println!("  Transcribe model: {}", config.models.transcribe);
    println!("  Marketing model: {}", config.models.marketing);
    println!("  Output folder: {}", config.output.directory.display());

    Ok(())
}

fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Transcribe model: {}", config.models.transcribe);
            println!("  Marketing model: {}", config.models.marketing);
            println!("  Max file size: {} MB", config.limits.max_file_size_mb);
            println!("  Marketing prompts: {}", config.prompts.marketing_tasks.len());
        }
    }
    Ok(())
}

fn run_history_command(config: &AppConfig, action: HistoryCommands) -> Result<()> {
    let history = History::new(config.history.path.clone());

    match action {
        HistoryCommands::List { count } => {
            let entries = history.get_recent(count)?;
            println!("Recent history ({} entries):", entries.len());
            for entry in entries {
                let status = serde_json::to_value(entry.status)?;
                println!(
                    "  {} [{}] {} {} -> {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.task,
                    status.as_str().unwrap_or("?"),
                    display_name(&entry.input_path),
                    entry
                        .output_path
                        .as_deref()
                        .map(display_name)
                        .or(entry.error)
                        .unwrap_or_default()
                );
            }
        }
        HistoryCommands::Clear { force } => {
            if !force {
                eprintln!("Use --force to confirm clearing history");
                return Ok(());
            }
            history.clear()?;
            info!("Cleared {}", history.path().display());
            println!("History cleared");
        }
    }
    Ok(())
}
