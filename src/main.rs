// src/main.rs
//! Relay manager maintenance tool
//!
//! Validates the manager configuration and inspects or repairs the transaction
//! ledger. The chain-facing scheduler embeds the library directly.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ethers::types::Address;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_manager::threshold::format_amount;
use relay_manager::{ManagerConfig, ServerAction, SqliteTxStore, TxStore};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(short, long, value_parser, default_value = "relay-manager.toml")]
    config: PathBuf,

    #[clap(short, long)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the configuration
    CheckConfig,

    /// Inspect or repair the transaction ledger
    #[clap(subcommand)]
    Ledger(LedgerCommand),
}

#[derive(Subcommand, Debug)]
enum LedgerCommand {
    /// Print stored transactions ordered by nonce
    List {
        #[clap(long, value_parser = parse_address)]
        signer: Option<Address>,
    },

    /// Report whether an unmined transaction exists for an action
    Pending {
        #[clap(long)]
        action: ServerAction,

        #[clap(long, value_parser = parse_address)]
        destination: Option<Address>,
    },

    /// Remove every record of a signer up to and including a nonce
    Prune {
        #[clap(long, value_parser = parse_address)]
        signer: Address,

        #[clap(long)]
        nonce: u64,
    },

    /// Delete every record
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    info!("Relay manager v{}", relay_manager::VERSION);

    let config = ManagerConfig::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {:?}", args.config))?;
    info!("✓ Configuration loaded");

    match args.command {
        Command::CheckConfig => check_config(&config),
        Command::Ledger(command) => run_ledger(&config, command).await,
    }
}

fn check_config(config: &ManagerConfig) -> Result<()> {
    info!("  Registration URL: {}", config.app.registration_url());
    info!("  Relay hub: {:#x}", config.contracts.relay_hub_address);
    info!(
        "  Manager balance: min {} / target {}",
        format_amount(config.blockchain.manager_min_balance),
        format_amount(config.blockchain.manager_target_balance)
    );
    info!(
        "  Manager stake: min {}",
        format_amount(config.blockchain.manager_min_stake)
    );
    info!(
        "  Worker balance: target {}",
        format_amount(config.blockchain.worker_target_balance)
    );
    info!(
        "  Chain id: {}, min tx gas: {}",
        config.environment.chain_id, config.environment.min_tx_gas_cost
    );
    if config.app.in_memory {
        info!("  Ledger: in memory");
    } else {
        info!("  Ledger: {:?}", config.app.workdir);
    }
    Ok(())
}

async fn run_ledger(config: &ManagerConfig, command: LedgerCommand) -> Result<()> {
    if config.app.in_memory {
        warn!("Ledger is configured in memory; nothing persisted to inspect");
    }

    let store = SqliteTxStore::open(&config.app)
        .await
        .context("Failed to open transaction ledger")?;

    match command {
        LedgerCommand::List { signer } => {
            let records = match signer {
                Some(signer) => store.get_all_by_signer(signer).await?,
                None => store.get_all().await?,
            };
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        LedgerCommand::Pending {
            action,
            destination,
        } => {
            let pending = store.is_action_pending(action, destination).await?;
            println!("{}", pending);
        }
        LedgerCommand::Prune { signer, nonce } => {
            let removed = store.remove_txs_until_nonce(signer, nonce).await?;
            info!("✓ Removed {} records of {:#x} up to nonce {}", removed, signer, nonce);
        }
        LedgerCommand::Clear => {
            store.clear_all().await?;
            info!("✓ Ledger cleared");
        }
    }

    Ok(())
}

fn parse_address(value: &str) -> std::result::Result<Address, String> {
    value
        .parse::<Address>()
        .map_err(|e| format!("invalid address {}: {}", value, e))
}

fn init_tracing(verbose: bool) -> Result<()> {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("relay_manager={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
