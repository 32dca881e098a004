use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

use crate::domain::Direction;
use crate::error::{BotError, Result};

/// Broker account to trade on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    #[default]
    #[serde(alias = "PRACTICE")]
    Practice,
    #[serde(alias = "REAL")]
    Real,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Practice => "PRACTICE",
            Self::Real => "REAL",
        }
    }
}

impl std::fmt::Display for AccountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AccountKind {
    type Err = BotError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "practice" | "demo" => Ok(Self::Practice),
            "real" | "live" => Ok(Self::Real),
            _ => Err(BotError::InvalidConfig(vec![format!(
                "invalid account type '{raw}'; expected practice|real"
            )])),
        }
    }
}

/// Brokerage surface consumed by the bot.
///
/// Implementations talk to a binary-options broker whose settlement
/// endpoints are known to return partial payloads or never return at all.
/// Callers never invoke this directly from the trading loop; they go through
/// [`TimedBroker`](super::TimedBroker), which puts a deadline on every call.
/// Implementations wrapping a blocking SDK must hand the work to
/// `spawn_blocking` so that a dropped future actually frees the loop.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Establish (or re-establish) the session
    async fn connect(&self) -> Result<()>;

    /// Current account balance
    async fn balance(&self) -> Result<Decimal>;

    async fn select_account(&self, kind: AccountKind) -> Result<()>;

    /// Place a binary option and return the broker's order id
    async fn place_order(
        &self,
        stake: Decimal,
        asset: &str,
        direction: Direction,
        duration_minutes: u32,
    ) -> Result<String>;

    /// Asset name to open/closed flag, e.g. {"EURUSD-OTC": true}
    async fn tradable_instruments(&self) -> Result<HashMap<String, bool>>;

    /// Oldest-first closing prices
    async fn recent_closes(&self, asset: &str, timeframe_secs: u64, count: usize)
        -> Result<Vec<f64>>;

    /// Per-order settlement record, if the broker has one
    async fn ledger_record(&self, order_id: &str) -> Result<Option<Value>>;

    /// Snapshot of the rolling push-update buffer
    async fn push_updates(&self) -> Result<Value>;

    /// Direct order-result query. Known to hang.
    async fn order_result(&self, order_id: &str) -> Result<Option<Value>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_kind_accepts_aliases() {
        assert_eq!("PRACTICE".parse::<AccountKind>().unwrap(), AccountKind::Practice);
        assert_eq!("demo".parse::<AccountKind>().unwrap(), AccountKind::Practice);
        assert_eq!("real".parse::<AccountKind>().unwrap(), AccountKind::Real);
    }

    #[test]
    fn account_kind_rejects_unknown_value() {
        assert!("paper-ish".parse::<AccountKind>().is_err());
    }

    #[test]
    fn account_kind_deserializes_upper_case() {
        let kind: AccountKind = serde_json::from_str("\"REAL\"").unwrap();
        assert_eq!(kind, AccountKind::Real);
    }
}
