use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Direction;
use crate::strategy::resolution::ResolutionStep;

/// Order lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Created locally, not yet acknowledged by the broker
    Pending,
    /// Broker returned an order id
    Active,
    /// Expiry has passed, outcome not yet known
    AwaitingResolution,
    /// Outcome booked (terminal)
    Resolved,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Pending => "PENDING",
            OrderState::Active => "ACTIVE",
            OrderState::AwaitingResolution => "AWAITING_RESOLUTION",
            OrderState::Resolved => "RESOLVED",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: OrderState) -> bool {
        use OrderState::*;

        matches!(
            (self, target),
            (Pending, Active) | (Active, AwaitingResolution) | (AwaitingResolution, Resolved)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Resolved)
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Contract outcome as decoded from whatever the broker reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    #[default]
    Unknown,
    Win,
    Loss,
    Tie,
}

impl Outcome {
    /// Decode a broker outcome string. Brokers are inconsistent about
    /// spelling ("loose", "equal"), so anything unrecognised is `Unknown`.
    pub fn from_broker_str(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "win" | "won" | "profit" => Outcome::Win,
            "loose" | "lose" | "loss" | "lost" => Outcome::Loss,
            "equal" | "tie" | "draw" | "refund" => Outcome::Tie,
            _ => Outcome::Unknown,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Outcome::Unknown)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Outcome::Unknown => "UNKNOWN",
            Outcome::Win => "WIN",
            Outcome::Loss => "LOSS",
            Outcome::Tie => "TIE",
        };
        write!(f, "{s}")
    }
}

/// A settled result: which outcome, how much came back, and who said so
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub outcome: Outcome,
    /// Total amount returned to the account (stake included on a win,
    /// partial refund on a loss)
    pub payoff: Decimal,
    pub source: ResolutionStep,
}

impl Settlement {
    pub fn win(payoff: Decimal, source: ResolutionStep) -> Self {
        Self {
            outcome: Outcome::Win,
            payoff,
            source,
        }
    }

    pub fn tie(stake: Decimal, source: ResolutionStep) -> Self {
        Self {
            outcome: Outcome::Tie,
            payoff: stake,
            source,
        }
    }

    pub fn loss(source: ResolutionStep) -> Self {
        Self::loss_returning(Decimal::ZERO, source)
    }

    /// Loss where the broker handed part of the stake back
    pub fn loss_returning(returned: Decimal, source: ResolutionStep) -> Self {
        Self {
            outcome: Outcome::Loss,
            payoff: returned.max(Decimal::ZERO),
            source,
        }
    }

    /// Classify by comparing what came back with what was staked
    pub fn from_amount(stake: Decimal, returned: Decimal, source: ResolutionStep) -> Self {
        if returned > stake {
            Self::win(returned, source)
        } else if returned == stake {
            Self::tie(stake, source)
        } else {
            Self::loss_returning(returned, source)
        }
    }

    /// Realized profit for a contract of the given stake
    pub fn profit(&self, stake: Decimal) -> Decimal {
        match self.outcome {
            Outcome::Win | Outcome::Loss => self.payoff - stake,
            Outcome::Tie | Outcome::Unknown => Decimal::ZERO,
        }
    }
}

/// One binary option, tracked from placement until settlement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Broker order id (empty while Pending)
    #[serde(default)]
    pub id: String,
    #[serde(default = "Uuid::new_v4")]
    pub client_id: Uuid,
    /// Configured pair, e.g. "EURUSD"
    #[serde(default)]
    pub instrument: String,
    /// Broker asset the order was placed on, e.g. "EURUSD-OTC"
    #[serde(default)]
    pub asset: String,
    pub direction: Direction,
    pub stake: Decimal,
    #[serde(deserialize_with = "super::timestamp::deserialize")]
    pub entry_time: DateTime<Utc>,
    #[serde(deserialize_with = "super::timestamp::deserialize")]
    pub expiry_time: DateTime<Utc>,
    /// Indicator value at entry
    #[serde(default)]
    pub indicator: f64,
    /// Account balance observed just before placement
    #[serde(default)]
    pub balance_before: Option<Decimal>,
    pub state: OrderState,
    #[serde(default)]
    pub outcome: Outcome,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        instrument: &str,
        asset: &str,
        direction: Direction,
        stake: Decimal,
        now: DateTime<Utc>,
        duration_minutes: u32,
        indicator: f64,
        balance_before: Option<Decimal>,
    ) -> Self {
        Self {
            id: String::new(),
            client_id: Uuid::new_v4(),
            instrument: instrument.to_string(),
            asset: asset.to_string(),
            direction,
            stake,
            entry_time: now,
            expiry_time: now + Duration::minutes(i64::from(duration_minutes)),
            indicator,
            balance_before,
            state: OrderState::Pending,
            outcome: Outcome::Unknown,
        }
    }

    /// Broker acknowledged the order
    pub fn activate(mut self, broker_id: String) -> Self {
        debug_assert!(self.state.can_transition_to(OrderState::Active));
        self.id = broker_id;
        self.state = OrderState::Active;
        self
    }

    /// Move an Active order to AwaitingResolution once expiry has passed.
    /// Returns true when the transition happened.
    pub fn mark_expired(&mut self, now: DateTime<Utc>) -> bool {
        if self.state == OrderState::Active && now >= self.expiry_time {
            self.state = OrderState::AwaitingResolution;
            return true;
        }
        false
    }

    /// Seconds elapsed since expiry (negative before expiry)
    pub fn secs_since_expiry(&self, now: DateTime<Utc>) -> i64 {
        (now - self.expiry_time).num_seconds()
    }

    /// Consume the order and produce its archived form.
    /// Taking `self` by value means an order can only ever be resolved once.
    pub fn resolve(mut self, settlement: Settlement) -> ResolvedOrder {
        self.state = OrderState::Resolved;
        self.outcome = settlement.outcome;
        let profit = settlement.profit(self.stake);
        ResolvedOrder {
            order: self,
            payoff: settlement.payoff,
            profit,
            source: settlement.source,
        }
    }
}

/// Terminal record handed to risk accounting
#[derive(Debug, Clone)]
pub struct ResolvedOrder {
    pub order: Order,
    pub payoff: Decimal,
    pub profit: Decimal,
    pub source: ResolutionStep,
}
