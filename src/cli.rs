use chrono::Utc;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;

use crate::config::RiskConfig;
use crate::domain::StrategyState;
use crate::error::Result;
use crate::persistence::{PersistedState, StateStore};
use crate::strategy::RiskManager;

#[derive(Parser)]
#[command(name = "binopt")]
#[command(version = "0.1.0")]
#[command(about = "FX binary-option momentum bot", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config directory (default.toml, <BINOPT_ENV>.toml)
    #[arg(short, long, default_value = "config", env = "BINOPT_CONFIG_DIR")]
    pub config: String,

    /// Override the state file location
    #[arg(long)]
    pub state_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the trading loop against the paper broker
    Run {
        /// Starting paper balance
        #[arg(long, default_value = "100000")]
        balance: Decimal,
        /// Seed for the simulated price feed
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Seconds between status lines
        #[arg(long, default_value = "60")]
        status_secs: u64,
    },
    /// Print the persisted strategy state
    State {
        /// Dump the raw JSON instead of the summary
        #[arg(long)]
        raw: bool,
    },
    /// Clear loss streaks and daily lockouts in the state file
    ResetLosses,
    /// Clear the absolute and monthly stop-loss flags in the state file
    ResetStopLoss,
}

/// Print a summary of the state file
pub async fn show_state(store: &StateStore, raw: bool) -> Result<()> {
    let Some(persisted) = store.read().await? else {
        println!("No state file at {}", store.path().display());
        return Ok(());
    };

    if raw {
        println!("{}", serde_json::to_string_pretty(&persisted)?);
        return Ok(());
    }

    let (state, open_orders) = persisted.into_state(Decimal::ZERO, Utc::now());
    let (wins, losses, ties) = state.totals();

    println!("\n\x1b[36m═══ Strategy State ({}) ═══\x1b[0m", store.path().display());
    println!("  Initial capital:   {}", state.initial_capital);
    println!("  Total profit:      {}", state.total_profit);
    println!("  Daily profit:      {}", state.daily_profit);
    println!("  Month ({}):   {}", state.current_month, state.current_month_profit());
    println!("  Trades:            {} (W {} / L {} / T {})", wins + losses + ties, wins, losses, ties);
    println!("  Win rate:          {}%", state.win_rate());
    println!(
        "  Stop loss:         absolute={} monthly={}",
        state.absolute_stop_loss_activated, state.monthly_stop_loss
    );
    if let Some(at) = state.last_checkpoint {
        println!("  Last checkpoint:   {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    if !state.pairs.is_empty() {
        println!("\n  {:<10} {:>5} {:>5} {:>5} {:>7} {:>8}", "PAIR", "W", "L", "T", "STREAK", "LOCKED");
        for (pair, p) in &state.pairs {
            println!(
                "  {:<10} {:>5} {:>5} {:>5} {:>7} {:>8}",
                pair, p.wins, p.losses, p.ties, p.consecutive_losses, p.daily_lockout
            );
        }
    }

    if !open_orders.is_empty() {
        println!("\n  Open orders:");
        for o in &open_orders {
            println!(
                "  {} {} {} stake={} expires={}",
                o.id,
                o.asset,
                o.direction,
                o.stake,
                o.expiry_time.format("%H:%M:%S")
            );
        }
    }
    println!();
    Ok(())
}

/// Rewrite the state file with the given adjustment. Returns false when
/// there is no file to adjust.
async fn rewrite_state<F>(store: &StateStore, adjust: F) -> Result<bool>
where
    F: FnOnce(&RiskManager, &mut StrategyState),
{
    let Some(persisted) = store.read().await? else {
        return Ok(false);
    };
    let recorded_capital = persisted.initial_capital;
    let now = Utc::now();
    let (mut state, open_orders) = persisted.into_state(Decimal::ZERO, now);

    adjust(&RiskManager::new(RiskConfig::default()), &mut state);

    let mut out = PersistedState::capture(&state, &open_orders, now);
    // Leave an unrecorded capital for the next live start to fill in
    out.initial_capital = recorded_capital;
    store.write(&out).await?;
    Ok(true)
}

pub async fn reset_consecutive_losses(store: &StateStore) -> Result<bool> {
    rewrite_state(store, |risk, state| risk.reset_consecutive_losses(state)).await
}

pub async fn reset_stop_loss(store: &StateStore) -> Result<bool> {
    rewrite_state(store, |risk, state| risk.reset_stop_loss(state)).await
}
