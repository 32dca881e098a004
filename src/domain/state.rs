use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Month key used for the monthly maps ("2026-10")
pub fn month_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// Per-instrument counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairStatistics {
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
    pub consecutive_losses: u32,
    pub last_signal_time: Option<DateTime<Utc>>,
    pub daily_lockout: bool,
}

impl PairStatistics {
    pub fn resolved(&self) -> u32 {
        self.wins + self.losses + self.ties
    }
}

/// Process-wide strategy accounting
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyState {
    pub initial_capital: Decimal,
    pub total_profit: Decimal,
    pub daily_profit: Decimal,
    pub monthly_profits: BTreeMap<String, Decimal>,
    pub monthly_starting_capital: BTreeMap<String, Decimal>,
    /// Sticky: only an explicit reset clears it
    pub absolute_stop_loss_activated: bool,
    pub monthly_stop_loss: bool,
    pub stop_loss_triggered_month: Option<String>,
    pub current_month: String,
    pub last_date: NaiveDate,
    pub last_checkpoint: Option<DateTime<Utc>>,
    pub pairs: BTreeMap<String, PairStatistics>,
}

impl StrategyState {
    /// Fresh state anchored at the given capital
    pub fn fresh(initial_capital: Decimal, now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        let month = month_key(today);
        let mut monthly_starting_capital = BTreeMap::new();
        monthly_starting_capital.insert(month.clone(), initial_capital);
        let mut monthly_profits = BTreeMap::new();
        monthly_profits.insert(month.clone(), Decimal::ZERO);

        Self {
            initial_capital,
            total_profit: Decimal::ZERO,
            daily_profit: Decimal::ZERO,
            monthly_profits,
            monthly_starting_capital,
            absolute_stop_loss_activated: false,
            monthly_stop_loss: false,
            stop_loss_triggered_month: None,
            current_month: month,
            last_date: today,
            last_checkpoint: None,
            pairs: BTreeMap::new(),
        }
    }

    pub fn pair(&self, instrument: &str) -> Option<&PairStatistics> {
        self.pairs.get(instrument)
    }

    pub fn pair_mut(&mut self, instrument: &str) -> &mut PairStatistics {
        self.pairs.entry(instrument.to_string()).or_default()
    }

    /// Accounting equity: initial capital plus everything realized since
    pub fn equity(&self) -> Decimal {
        self.initial_capital + self.total_profit
    }

    pub fn current_month_profit(&self) -> Decimal {
        self.monthly_profits
            .get(&self.current_month)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn current_month_starting_capital(&self) -> Option<Decimal> {
        self.monthly_starting_capital.get(&self.current_month).copied()
    }

    /// Either stop-loss layer is engaged
    pub fn stop_loss_active(&self) -> bool {
        self.absolute_stop_loss_activated || self.monthly_stop_loss
    }

    /// (wins, losses, ties) across all instruments
    pub fn totals(&self) -> (u32, u32, u32) {
        self.pairs.values().fold((0, 0, 0), |(w, l, t), p| {
            (w + p.wins, l + p.losses, t + p.ties)
        })
    }

    /// Win rate in percent, ties excluded, rounded to 2 dp
    pub fn win_rate(&self) -> Decimal {
        let (wins, losses, _) = self.totals();
        let decided = wins + losses;
        if decided == 0 {
            return Decimal::ZERO;
        }
        (Decimal::from(wins) * Decimal::ONE_HUNDRED / Decimal::from(decided)).round_dp(2)
    }
}
