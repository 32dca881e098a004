//! Durable strategy state
//!
//! The state file is a flat JSON object so that it stays readable by hand
//! and by the reporting tools that consume it. Every key is optional on
//! load; a missing key takes its default. Writes go to a sibling temp file
//! that is then renamed over the target.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::domain::{month_key, timestamp, Order, PairStatistics, StrategyState};
use crate::error::{BotError, Result};
use crate::strategy::RiskManager;

/// On-disk layout. Per-pair counters are stored as one map per counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub initial_capital: Option<Decimal>,
    pub wins: BTreeMap<String, u32>,
    pub losses: BTreeMap<String, u32>,
    pub ties: BTreeMap<String, u32>,
    pub consecutive_losses: BTreeMap<String, u32>,
    pub daily_lockouts: BTreeMap<String, bool>,
    #[serde(deserialize_with = "timestamp::deserialize_map")]
    pub last_signal_time: BTreeMap<String, DateTime<Utc>>,
    pub total_profit: Decimal,
    pub daily_profit: Decimal,
    pub monthly_profits: BTreeMap<String, Decimal>,
    pub monthly_starting_capital: BTreeMap<String, Decimal>,
    pub absolute_stop_loss_activated: bool,
    pub monthly_stop_loss: bool,
    pub stop_loss_triggered_month: Option<String>,
    pub current_month: Option<String>,
    pub last_date: Option<NaiveDate>,
    #[serde(deserialize_with = "timestamp::deserialize_option")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "decode_open_orders")]
    pub open_orders: Vec<Order>,
}

/// Decode open orders one by one so a single bad entry only loses itself
fn decode_open_orders<'de, D>(deserializer: D) -> std::result::Result<Vec<Order>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value::<Order>(item) {
            Ok(mut order) => {
                if order.asset.is_empty() {
                    order.asset = order.instrument.clone();
                }
                Some(order)
            }
            Err(e) => {
                warn!(index, error = %e, "dropping unreadable persisted order");
                None
            }
        })
        .collect())
}

impl PersistedState {
    pub fn capture(state: &StrategyState, open_orders: &[Order], now: DateTime<Utc>) -> Self {
        let mut out = Self {
            initial_capital: Some(state.initial_capital),
            total_profit: state.total_profit,
            daily_profit: state.daily_profit,
            monthly_profits: state.monthly_profits.clone(),
            monthly_starting_capital: state.monthly_starting_capital.clone(),
            absolute_stop_loss_activated: state.absolute_stop_loss_activated,
            monthly_stop_loss: state.monthly_stop_loss,
            stop_loss_triggered_month: state.stop_loss_triggered_month.clone(),
            current_month: Some(state.current_month.clone()),
            last_date: Some(state.last_date),
            timestamp: Some(now),
            open_orders: open_orders.to_vec(),
            ..Default::default()
        };

        for (pair, stats) in &state.pairs {
            out.wins.insert(pair.clone(), stats.wins);
            out.losses.insert(pair.clone(), stats.losses);
            out.ties.insert(pair.clone(), stats.ties);
            out.consecutive_losses
                .insert(pair.clone(), stats.consecutive_losses);
            out.daily_lockouts.insert(pair.clone(), stats.daily_lockout);
            if let Some(at) = stats.last_signal_time {
                out.last_signal_time.insert(pair.clone(), at);
            }
        }
        out
    }

    /// Rebuild in-memory state. `fallback_capital` anchors a file that
    /// never recorded its initial capital.
    pub fn into_state(self, fallback_capital: Decimal, now: DateTime<Utc>) -> (StrategyState, Vec<Order>) {
        let initial_capital = self.initial_capital.unwrap_or(fallback_capital);
        let mut state = StrategyState::fresh(initial_capital, now);

        state.total_profit = self.total_profit;
        state.daily_profit = self.daily_profit;
        if !self.monthly_profits.is_empty() {
            state.monthly_profits = self.monthly_profits;
        }
        state.absolute_stop_loss_activated = self.absolute_stop_loss_activated;
        state.monthly_stop_loss = self.monthly_stop_loss;
        state.stop_loss_triggered_month = self.stop_loss_triggered_month;
        if let Some(month) = self.current_month {
            state.current_month = month;
        }
        // Without a recorded anchor the month is measured from current equity
        state.monthly_starting_capital = self.monthly_starting_capital;
        let equity = state.equity();
        state
            .monthly_starting_capital
            .entry(state.current_month.clone())
            .or_insert(equity);
        if let Some(date) = self.last_date {
            state.last_date = date;
        }
        state.last_checkpoint = self.timestamp;

        let pairs = self
            .wins
            .keys()
            .chain(self.losses.keys())
            .chain(self.ties.keys())
            .chain(self.consecutive_losses.keys())
            .chain(self.daily_lockouts.keys())
            .chain(self.last_signal_time.keys())
            .cloned()
            .collect::<std::collections::BTreeSet<_>>();

        for pair in pairs {
            let stats = PairStatistics {
                wins: self.wins.get(&pair).copied().unwrap_or(0),
                losses: self.losses.get(&pair).copied().unwrap_or(0),
                ties: self.ties.get(&pair).copied().unwrap_or(0),
                consecutive_losses: self.consecutive_losses.get(&pair).copied().unwrap_or(0),
                last_signal_time: self.last_signal_time.get(&pair).copied(),
                daily_lockout: self.daily_lockouts.get(&pair).copied().unwrap_or(false),
            };
            state.pairs.insert(pair, stats);
        }

        (state, self.open_orders)
    }
}

/// JSON file store for [`StrategyState`] and the orders still open
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_body(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BotError::Io(e)),
        }
    }

    /// Raw file contents, `None` when the file does not exist
    pub async fn read(&self) -> Result<Option<PersistedState>> {
        match self.read_body().await? {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    /// Load state for a trading session. A missing file yields fresh state
    /// anchored at `broker_balance`. An unparsable file is moved aside and
    /// only its initial capital and absolute stop are recovered.
    pub async fn load(
        &self,
        broker_balance: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(StrategyState, Vec<Order>)> {
        let Some(body) = self.read_body().await? else {
            info!(
                path = %self.path.display(),
                initial_capital = %broker_balance,
                "no state file, starting fresh"
            );
            return Ok((StrategyState::fresh(broker_balance, now), Vec::new()));
        };

        match serde_json::from_str::<PersistedState>(&body) {
            Ok(persisted) => {
                let (state, orders) = persisted.into_state(broker_balance, now);
                info!(
                    path = %self.path.display(),
                    initial_capital = %state.initial_capital,
                    total_profit = %state.total_profit,
                    open_orders = orders.len(),
                    "strategy state loaded"
                );
                Ok((state, orders))
            }
            Err(e) => {
                let aside = sibling(&self.path, ".corrupt");
                warn!(
                    path = %self.path.display(),
                    moved_to = %aside.display(),
                    error = %e,
                    "state file unreadable, starting fresh"
                );
                if let Err(e) = tokio::fs::rename(&self.path, &aside).await {
                    warn!(error = %e, "could not move corrupt state file aside");
                }
                Ok((salvage(&body, broker_balance, now), Vec::new()))
            }
        }
    }

    /// Atomic write: temp file in the same directory, then rename
    pub async fn write(&self, persisted: &PersistedState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = sibling(&self.path, ".tmp");
        let body = serde_json::to_string_pretty(persisted)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Checkpoint the running state. Stamps `last_checkpoint` on success.
    pub async fn save(
        &self,
        state: &mut StrategyState,
        open_orders: &[Order],
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.write(&PersistedState::capture(state, open_orders, now))
            .await?;
        state.last_checkpoint = Some(now);
        debug!(path = %self.path.display(), open_orders = open_orders.len(), "state saved");
        Ok(())
    }
}

/// Fresh state that keeps the capital anchor and the sticky absolute stop
/// from a file that no longer decodes as a whole
fn salvage(body: &str, broker_balance: Decimal, now: DateTime<Utc>) -> StrategyState {
    let raw = serde_json::from_str::<Value>(body).unwrap_or(Value::Null);
    let initial_capital = raw
        .get("initial_capital")
        .and_then(|v| serde_json::from_value::<Decimal>(v.clone()).ok())
        .unwrap_or(broker_balance);
    let mut state = StrategyState::fresh(initial_capital, now);
    if raw.get("absolute_stop_loss_activated").and_then(Value::as_bool) == Some(true) {
        warn!("absolute stop-loss was active in the unreadable file, keeping it");
        state.absolute_stop_loss_activated = true;
    }
    state
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

// ==================== Rollovers ====================

/// New day: clear loss streaks, lockouts and the daily profit.
/// Returns true when a rollover happened.
pub fn roll_daily(state: &mut StrategyState, today: NaiveDate) -> bool {
    if state.last_date >= today {
        return false;
    }
    for pair in state.pairs.values_mut() {
        pair.consecutive_losses = 0;
        pair.daily_lockout = false;
    }
    info!(
        from = %state.last_date,
        to = %today,
        daily_profit = %state.daily_profit,
        "new trading day, daily counters reset"
    );
    state.daily_profit = Decimal::ZERO;
    state.last_date = today;
    true
}

/// New month: open a profit entry, anchor the month at current equity and
/// lift the monthly stop. Returns true when a rollover happened.
pub fn roll_monthly(state: &mut StrategyState, today: NaiveDate) -> bool {
    let month = month_key(today);
    if month == state.current_month {
        return false;
    }
    let equity = state.equity();
    state.monthly_profits.entry(month.clone()).or_insert(Decimal::ZERO);
    state
        .monthly_starting_capital
        .entry(month.clone())
        .or_insert(equity);
    info!(
        from = %state.current_month,
        to = %month,
        starting_capital = %equity,
        "new month"
    );
    state.current_month = month;
    RiskManager::clear_monthly_stop(state);
    true
}
