//! Read-only views of the scheduler's state for external readers

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{Direction, Order, OrderState, StrategyState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotStatus {
    Stopped,
    Running,
    Stopping,
}

/// Per-instrument counters as shown to readers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairStatsView {
    pub instrument: String,
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
    pub consecutive_losses: u32,
    pub daily_lockout: bool,
    pub last_signal_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrderView {
    pub id: String,
    pub instrument: String,
    pub asset: String,
    pub direction: Direction,
    pub stake: Decimal,
    pub entry_time: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
    pub indicator: f64,
    pub state: OrderState,
}

impl From<&Order> for OpenOrderView {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id.clone(),
            instrument: order.instrument.clone(),
            asset: order.asset.clone(),
            direction: order.direction,
            stake: order.stake,
            entry_time: order.entry_time,
            expiry_time: order.expiry_time,
            indicator: order.indicator,
            state: order.state,
        }
    }
}

/// Copy of everything a control surface may display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: BotStatus,
    /// Last balance observed from the broker
    pub balance: Option<Decimal>,
    pub initial_capital: Decimal,
    pub total_profit: Decimal,
    pub daily_profit: Decimal,
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
    /// wins / (wins + losses) in percent
    pub win_rate: Decimal,
    pub pairs: Vec<PairStatsView>,
    pub open_orders: Vec<OpenOrderView>,
    pub valid_pairs: Vec<String>,
    pub stop_loss_active: bool,
    pub timestamp: DateTime<Utc>,
}

impl StatusSnapshot {
    /// Placeholder published before the first tick
    pub fn idle(now: DateTime<Utc>) -> Self {
        Self {
            status: BotStatus::Stopped,
            balance: None,
            initial_capital: Decimal::ZERO,
            total_profit: Decimal::ZERO,
            daily_profit: Decimal::ZERO,
            total_trades: 0,
            wins: 0,
            losses: 0,
            ties: 0,
            win_rate: Decimal::ZERO,
            pairs: Vec::new(),
            open_orders: Vec::new(),
            valid_pairs: Vec::new(),
            stop_loss_active: false,
            timestamp: now,
        }
    }

    pub fn build<'a>(
        status: BotStatus,
        state: &StrategyState,
        open_orders: impl Iterator<Item = &'a Order>,
        valid_pairs: Vec<String>,
        balance: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Self {
        let (wins, losses, ties) = state.totals();
        let pairs = state
            .pairs
            .iter()
            .map(|(instrument, p)| PairStatsView {
                instrument: instrument.clone(),
                wins: p.wins,
                losses: p.losses,
                ties: p.ties,
                consecutive_losses: p.consecutive_losses,
                daily_lockout: p.daily_lockout,
                last_signal_time: p.last_signal_time,
            })
            .collect();

        Self {
            status,
            balance,
            initial_capital: state.initial_capital,
            total_profit: state.total_profit,
            daily_profit: state.daily_profit,
            total_trades: wins + losses + ties,
            wins,
            losses,
            ties,
            win_rate: state.win_rate(),
            pairs,
            open_orders: open_orders.map(OpenOrderView::from).collect(),
            valid_pairs,
            stop_loss_active: state.stop_loss_active(),
            timestamp: now,
        }
    }
}
