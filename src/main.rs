//! Custodial hot-wallet service entry point.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use hotwallet::config::schema::{DATABASE_URL_ENV_VAR, MASTER_PASSWORD_ENV_VAR};
use hotwallet::config::{load_config, WalletConfig};
use hotwallet::custody::{SecretKind, SecretStore};
use hotwallet::derivation;
use hotwallet::ledger::LedgerStore;
use hotwallet::observability::init_logging;
use hotwallet::AppContext;

#[derive(Parser)]
#[command(name = "hotwallet", about = "Custodial hot-wallet service", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "hotwallet.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the wallet service (default).
    Run,
    /// Apply database schema migrations and exit.
    Migrate,
    /// Trigger one consolidation sweep and exit.
    Sweep,
    /// Issue (or show) a user's deposit address.
    Address {
        /// External user identifier.
        user_id: String,
    },
    /// Provision the custody store with a master seed and treasury key.
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    init_logging(&config.observability.log_level);
    tracing::info!(config_path = %cli.config.display(), "hotwallet v0.1.0 starting");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => cmd_run(config).await,
        Command::Migrate => cmd_migrate(&config).await,
        Command::Sweep => cmd_sweep(config).await,
        Command::Address { user_id } => cmd_address(config, &user_id).await,
        Command::Init => cmd_init(&config),
    }
}

async fn cmd_run(config: WalletConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (context, queue_rx) = AppContext::initialize(config).await?;
    context.ledger.migrate().await?;

    let handles = context.spawn_workers(queue_rx);
    tracing::info!(
        network = %context.config.withdrawal.network,
        chain_id = context.config.chain.chain_id,
        "service started"
    );

    context.shutdown.trigger_on_interrupt().await?;
    context.teardown(handles).await;

    Ok(())
}

async fn cmd_migrate(config: &WalletConfig) -> Result<(), Box<dyn std::error::Error>> {
    let database_url = std::env::var(DATABASE_URL_ENV_VAR)
        .map_err(|_| format!("{} not set", DATABASE_URL_ENV_VAR))?;
    let ledger = LedgerStore::connect(&database_url, &config.database).await?;
    ledger.migrate().await?;
    println!("migrations applied");
    Ok(())
}

async fn cmd_sweep(config: WalletConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (context, _queue_rx) = AppContext::initialize(config).await?;
    let summary = context.consolidator.run_once().await?;
    println!(
        "sweep finished: {} swept, {} below threshold, {} failed",
        summary.swept, summary.skipped, summary.failed
    );
    context.custody.flush_audit()?;
    Ok(())
}

async fn cmd_address(
    config: WalletConfig,
    user_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let (context, _queue_rx) = AppContext::initialize(config).await?;
    context.ledger.migrate().await?;
    let address = context.deposit_address(user_id).await?;
    println!("{}", address);
    context.custody.flush_audit()?;
    Ok(())
}

fn cmd_init(config: &WalletConfig) -> Result<(), Box<dyn std::error::Error>> {
    let master_password = std::env::var(MASTER_PASSWORD_ENV_VAR)
        .map_err(|_| format!("{} not set", MASTER_PASSWORD_ENV_VAR))?;

    let custody = SecretStore::from_config(&config.custody)?;
    if custody.is_initialized() {
        return Err("custody store is already initialized".into());
    }

    let seed_phrase = prompt_line("Seed phrase (BIP-39): ")?;
    // Reject a corrupt seed before anything is persisted.
    derivation::derive(&seed_phrase, 0)?;

    let treasury_key = prompt_line("Treasury private key (hex): ")?;
    let treasury = derivation::signer_from_hex(&treasury_key)?;

    custody.store_secret(
        SecretKind::MasterSeed,
        seed_phrase.trim().as_bytes(),
        &master_password,
    )?;
    custody.store_secret(
        SecretKind::TreasuryKey,
        treasury_key.trim().as_bytes(),
        &master_password,
    )?;
    custody.flush_audit()?;

    println!(
        "custody store initialized at {} (treasury {})",
        config.custody.secrets_path,
        treasury.address()
    );
    Ok(())
}

/// Read one secret line from stdin; prompts go to stderr so stdout stays
/// clean for scripting.
fn prompt_line(prompt: &str) -> Result<String, Box<dyn std::error::Error>> {
    eprint!("{}", prompt);
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let trimmed = line.trim().to_string();
    if trimmed.is_empty() {
        return Err("empty input".into());
    }
    Ok(trimmed)
}
