use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use fleet_lite::accounts::{Account, AccountStore, DEFAULT_ACCOUNTS_FILE};
use fleet_lite::config::{RuntimeConfig, DEFAULT_CONFIG_FILE};
use fleet_lite::scheduler::ActionKind;
use fleet_lite::shutdown::install_shutdown_handler;
use fleet_lite::status::{StatusEvent, StatusSubscription};
use fleet_lite::worker::DriverExecutor;
use fleet_lite::{BatchSummary, Orchestrator};

#[derive(Parser, Debug)]
#[command(name = "fleet-lite")]
#[command(version)]
#[command(about = "Run social account actions across many accounts")]
#[command(propagate_version = true)]
struct Args {
    /// Runtime configuration file (created with defaults if missing)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Account file
    #[arg(long, global = true, default_value = DEFAULT_ACCOUNTS_FILE)]
    accounts_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run one action for every (or selected) account
    Run(RunArgs),

    /// Account management commands
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

// =============================================================================
// Run Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct RunArgs {
    /// Action to perform (login, like, comment, follow, share)
    #[arg(long)]
    action: ActionKind,

    /// Post URL or username, depending on the action
    #[arg(long, default_value = "")]
    target: String,

    /// Comment text
    #[arg(long)]
    payload: Option<String>,

    /// Only run for these accounts (comma-separated usernames)
    #[arg(long, value_delimiter = ',')]
    only: Vec<String>,

    /// Override max_workers from the config file
    #[arg(long)]
    max_workers: Option<usize>,

    /// Override min_interval_ms from the config file
    #[arg(long)]
    min_interval_ms: Option<u64>,

    /// Force headless browser mode
    #[arg(long)]
    headless: bool,

    /// Output format for status events
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Account / Config Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum AccountCommands {
    /// Add an account
    Add {
        username: String,
        password: String,
        #[arg(long)]
        proxy: Option<String>,
    },
    /// Replace an account's password and proxy
    Update {
        username: String,
        password: String,
        #[arg(long)]
        proxy: Option<String>,
    },
    /// Remove an account
    Remove { username: String },
    /// List accounts (passwords are not shown)
    List,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write the default configuration if no file exists
    Init,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct SummaryOutput {
    accepted: usize,
    rejected: usize,
    succeeded: usize,
    failed: usize,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn print_event(event: &StatusEvent, format: &OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!(error = %e, "Failed to encode status event"),
        },
        OutputFormat::Table => {
            println!(
                "{:<10} {:<20} {:<8} {:<10} {}",
                event.timestamp.format("%H:%M:%S"),
                event.account,
                event.action.to_string(),
                event.status.to_string(),
                event.message.as_deref().unwrap_or("")
            );
        }
    }
}

/// Print events until `stop` fires, then flush whatever is still buffered.
async fn print_events(
    mut events: StatusSubscription,
    format: OutputFormat,
    stop: CancellationToken,
) {
    if matches!(format, OutputFormat::Table) {
        println!(
            "{:<10} {:<20} {:<8} {:<10} MESSAGE",
            "TIME", "ACCOUNT", "ACTION", "STATUS"
        );
        println!("{}", "-".repeat(70));
    }

    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => print_event(&event, &format),
                None => break,
            },
            _ = stop.cancelled() => {
                while let Some(event) = events.try_recv() {
                    print_event(&event, &format);
                }
                break;
            }
        }
    }

    if events.dropped() > 0 {
        eprintln!("Warning: {} status events were dropped", events.dropped());
    }
}

fn print_summary(accepted: usize, rejected: usize, summary: &BatchSummary, format: &OutputFormat) {
    match format {
        OutputFormat::Json => {
            let output = SummaryOutput {
                accepted,
                rejected,
                succeeded: summary.succeeded,
                failed: summary.failed,
            };
            match serde_json::to_string(&output) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!(error = %e, "Failed to encode summary"),
            }
        }
        OutputFormat::Table => {
            println!();
            println!(
                "{} accepted, {} rejected: {} succeeded, {} failed",
                accepted, rejected, summary.succeeded, summary.failed
            );
        }
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn handle_run(
    args: RunArgs,
    config_path: PathBuf,
    accounts_path: PathBuf,
) -> Result<bool, Box<dyn std::error::Error>> {
    let mut config = RuntimeConfig::load_or_init(&config_path);
    if let Some(max_workers) = args.max_workers {
        config.max_workers = max_workers;
    }
    if let Some(interval) = args.min_interval_ms {
        config.min_interval_ms = interval;
    }
    if args.headless {
        config.headless_mode = true;
    }

    let store = AccountStore::load(&accounts_path)?;
    if store.accounts().is_empty() {
        eprintln!("No accounts in {}", accounts_path.display());
        return Ok(false);
    }

    let executor = Arc::new(DriverExecutor::new(
        config.driver.clone(),
        config.headless_mode,
    ));
    let orchestrator = Orchestrator::start(config, store.table(), executor)?;

    let stop_printer = CancellationToken::new();
    let printer = tokio::spawn(print_events(
        orchestrator.subscribe(),
        args.output.clone(),
        stop_printer.clone(),
    ));
    let signal = install_shutdown_handler();

    let payload = args.payload.as_deref();
    let receipt = if args.only.is_empty() {
        orchestrator
            .submit_all(args.action, &args.target, payload)
            .await
    } else {
        orchestrator
            .submit_selected(&args.only, args.action, &args.target, payload)
            .await
    };
    for rejection in &receipt.rejected {
        eprintln!("Rejected {}: {}", rejection.job.account, rejection.error);
    }

    tokio::select! {
        _ = orchestrator.wait_for(&receipt.accepted) => {}
        _ = signal.cancelled() => {
            eprintln!("Cancelling, waiting for running actions to finish...");
        }
    }
    orchestrator.shutdown().await;
    let summary = orchestrator.wait_for(&receipt.accepted).await;

    stop_printer.cancel();
    if let Err(e) = printer.await {
        tracing::warn!(error = %e, "Status printer failed");
    }

    print_summary(
        receipt.accepted.len(),
        receipt.rejected.len(),
        &summary,
        &args.output,
    );
    Ok(summary.failed == 0 && receipt.rejected.is_empty())
}

fn handle_account(
    command: AccountCommands,
    accounts_path: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = AccountStore::load(&accounts_path)?;
    match command {
        AccountCommands::Add {
            username,
            password,
            proxy,
        } => {
            let mut account = Account::new(username, password);
            account.proxy = proxy;
            store.add(account)?;
            println!("Account added.");
        }
        AccountCommands::Update {
            username,
            password,
            proxy,
        } => {
            let mut account = Account::new(username, password);
            account.proxy = proxy;
            store.update(account)?;
            println!("Account updated.");
        }
        AccountCommands::Remove { username } => {
            store.remove(&username)?;
            println!("Account {} removed.", username);
        }
        AccountCommands::List => {
            if store.accounts().is_empty() {
                println!("No accounts found.");
            } else {
                println!("{:<24} PROXY", "USERNAME");
                println!("{}", "-".repeat(40));
                for account in store.accounts() {
                    println!(
                        "{:<24} {}",
                        account.username,
                        account.proxy.as_deref().unwrap_or("-")
                    );
                }
            }
        }
    }
    Ok(())
}

fn handle_config(
    command: ConfigCommands,
    config_path: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = RuntimeConfig::load_or_init(&config_path);
    match command {
        ConfigCommands::Show => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommands::Init => {
            println!("Config at {}", config_path.display());
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Run(run_args) => {
            let clean = handle_run(run_args, args.config, args.accounts_file).await?;
            if !clean {
                std::process::exit(1);
            }
        }
        Commands::Account { command } => handle_account(command, args.accounts_file)?,
        Commands::Config { command } => handle_config(command, args.config)?,
    }

    Ok(())
}
