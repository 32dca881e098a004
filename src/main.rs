mod main_runtime;

use binopt::adapters::PaperBroker;
use binopt::cli::{self, Cli, Commands};
use binopt::config::AppConfig;
use binopt::coordinator::{BotService, StopOutcome};
use binopt::domain::{Clock, SystemClock};
use binopt::error::Result;
use binopt::persistence::StateStore;
use clap::Parser;
use main_runtime::{init_logging, init_logging_simple, shutdown_signal};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::State { raw }) => {
            init_logging_simple();
            let store = state_store(&cli)?;
            cli::show_state(&store, *raw).await?;
        }
        Some(Commands::ResetLosses) => {
            init_logging_simple();
            let store = state_store(&cli)?;
            if cli::reset_consecutive_losses(&store).await? {
                println!("Consecutive losses and daily lockouts cleared");
            } else {
                println!("No state file at {}", store.path().display());
            }
        }
        Some(Commands::ResetStopLoss) => {
            init_logging_simple();
            let store = state_store(&cli)?;
            if cli::reset_stop_loss(&store).await? {
                println!("Stop-loss flags cleared");
            } else {
                println!("No state file at {}", store.path().display());
            }
        }
        Some(Commands::Run {
            balance,
            seed,
            status_secs,
        }) => {
            let config = load_config(&cli)?;
            init_logging(&config.logging);
            run_bot(config, *balance, *seed, *status_secs).await?;
        }
        None => {
            let config = load_config(&cli)?;
            init_logging(&config.logging);
            run_bot(config, Decimal::from(100_000), 42, 60).await?;
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = AppConfig::load_validated(&cli.config)?;
    if let Some(path) = &cli.state_file {
        config.persistence.state_file = path.clone();
    }
    Ok(config)
}

fn state_store(cli: &Cli) -> Result<StateStore> {
    let path: PathBuf = match &cli.state_file {
        Some(p) => p.clone(),
        None => load_config(cli)?.persistence.state_file,
    };
    Ok(StateStore::new(path))
}

/// Dry run against the paper broker until Ctrl+C / SIGTERM
async fn run_bot(config: AppConfig, balance: Decimal, seed: u64, status_secs: u64) -> Result<()> {
    info!(
        account = %config.broker.account_type,
        state_file = %config.persistence.state_file.display(),
        "starting binopt (paper broker)"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let assets = config
        .instruments
        .pairs
        .iter()
        .map(|p| format!("{p}-OTC"))
        .collect();
    let broker = Arc::new(PaperBroker::new(
        balance,
        assets,
        config.resolution.default_payout_pct,
        seed,
        clock.clone(),
    ));

    let mut service = BotService::start(config, broker, clock).await?;
    let handle = service.handle();

    let mut status_tick = tokio::time::interval(Duration::from_secs(status_secs.max(1)));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            _ = status_tick.tick() => {
                let snap = handle.snapshot();
                info!(
                    status = ?snap.status,
                    balance = ?snap.balance,
                    total_profit = %snap.total_profit,
                    trades = snap.total_trades,
                    win_rate = %snap.win_rate,
                    open_orders = snap.open_orders.len(),
                    valid_pairs = snap.valid_pairs.len(),
                    stop_loss = snap.stop_loss_active,
                    "status"
                );
            }
        }
    }

    match service.stop().await {
        StopOutcome::Stopped | StopOutcome::NotRunning => info!("shutdown complete"),
        StopOutcome::Requested => {
            warn!("scheduler did not exit in time, waiting once more");
            if service.stop().await == StopOutcome::Requested {
                error!("scheduler still busy, exiting anyway");
            }
        }
    }
    Ok(())
}
