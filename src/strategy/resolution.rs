//! Settlement detection for expired orders
//!
//! The broker exposes several settlement surfaces and none of them can be
//! trusted on its own: the per-order ledger lags, the push buffer is rolling
//! and lossy, and the direct result query is known to hang. An expired order
//! is therefore run through an ordered list of [`ResolutionStep`]s each tick
//! until one of them produces a [`Settlement`]. The list always ends with
//! [`ResolutionStep::Timeout`], which books a conservative loss.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::config::ResolutionConfig;
use crate::domain::{Order, Settlement};
use crate::exchange::payload;
use crate::exchange::TimedBroker;

/// One settlement detection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStep {
    /// Settlement lag: wait while the order is younger than the grace period
    Grace,
    /// Per-order settlement record
    Ledger,
    /// Rolling push-update buffer
    PushFeed,
    /// Account balance compared with the snapshot taken at entry
    BalanceDelta,
    /// Direct result query under its own deadline
    AsyncQuery,
    /// Force a loss once the resolution ceiling is passed
    Timeout,
}

impl ResolutionStep {
    pub fn default_chain() -> Vec<ResolutionStep> {
        vec![
            ResolutionStep::Grace,
            ResolutionStep::Ledger,
            ResolutionStep::PushFeed,
            ResolutionStep::BalanceDelta,
            ResolutionStep::AsyncQuery,
            ResolutionStep::Timeout,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStep::Grace => "grace",
            ResolutionStep::Ledger => "ledger",
            ResolutionStep::PushFeed => "push_feed",
            ResolutionStep::BalanceDelta => "balance_delta",
            ResolutionStep::AsyncQuery => "async_query",
            ResolutionStep::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ResolutionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a single step concluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    /// Stop evaluating this order until the next tick
    Wait,
    /// Nothing usable, try the next step
    Inconclusive,
    Resolved(Settlement),
}

/// Runs the configured steps in order against one expired order
#[derive(Debug, Clone)]
pub struct ResolutionChain {
    steps: Vec<ResolutionStep>,
    grace_secs: i64,
    async_query_after_secs: i64,
    timeout_secs: i64,
    async_query_timeout: Duration,
    balance_epsilon: Decimal,
    default_payout_pct: Decimal,
}

impl ResolutionChain {
    pub fn new(config: &ResolutionConfig) -> Self {
        Self {
            steps: config.steps.clone(),
            grace_secs: config.grace_secs,
            async_query_after_secs: config.async_query_after_secs,
            timeout_secs: config.timeout_secs,
            async_query_timeout: Duration::from_secs(config.async_query_timeout_secs),
            balance_epsilon: config.balance_epsilon,
            default_payout_pct: config.default_payout_pct,
        }
    }

    pub fn steps(&self) -> &[ResolutionStep] {
        &self.steps
    }

    /// Walk the chain. `None` means the order stays open for another tick.
    pub async fn run(
        &self,
        order: &Order,
        broker: &TimedBroker,
        now: DateTime<Utc>,
    ) -> Option<Settlement> {
        for step in &self.steps {
            match self.attempt(*step, order, broker, now).await {
                StepResult::Wait => return None,
                StepResult::Inconclusive => continue,
                StepResult::Resolved(settlement) => return Some(settlement),
            }
        }
        None
    }

    /// Evaluate a single step. Broker errors and timeouts are inconclusive.
    pub async fn attempt(
        &self,
        step: ResolutionStep,
        order: &Order,
        broker: &TimedBroker,
        now: DateTime<Utc>,
    ) -> StepResult {
        let age = order.secs_since_expiry(now);
        let stake = order.stake;

        let settlement = match step {
            ResolutionStep::Grace => {
                if age < self.grace_secs {
                    return StepResult::Wait;
                }
                None
            }
            ResolutionStep::Ledger => match broker.ledger_record(&order.id).await {
                Ok(Some(record)) => {
                    payload::decode_ledger_record(&record, stake, self.default_payout_pct)
                }
                Ok(None) => None,
                Err(e) => {
                    debug!(order_id = %order.id, error = %e, "ledger lookup inconclusive");
                    None
                }
            },
            ResolutionStep::PushFeed => match broker.push_updates().await {
                Ok(buffer) => payload::find_in_push_buffer(&buffer, &order.id).and_then(|item| {
                    payload::decode_push_item(item, stake, self.default_payout_pct)
                }),
                Err(e) => {
                    debug!(order_id = %order.id, error = %e, "push buffer unavailable");
                    None
                }
            },
            ResolutionStep::BalanceDelta => match order.balance_before {
                Some(before) => match broker.balance().await {
                    Ok(current) => self.from_balance_delta(stake, before, current),
                    Err(e) => {
                        debug!(order_id = %order.id, error = %e, "balance check inconclusive");
                        None
                    }
                },
                None => None,
            },
            ResolutionStep::AsyncQuery => {
                if age <= self.async_query_after_secs {
                    return StepResult::Inconclusive;
                }
                match broker.order_result(&order.id, self.async_query_timeout).await {
                    Ok(Some(payload)) => {
                        payload::interpret_order_result(&payload, stake, self.default_payout_pct)
                    }
                    Ok(None) => None,
                    Err(e) => {
                        warn!(order_id = %order.id, error = %e, "order result query failed");
                        None
                    }
                }
            }
            ResolutionStep::Timeout => {
                if age > self.timeout_secs {
                    error!(
                        order_id = %order.id,
                        instrument = %order.instrument,
                        age_secs = age,
                        "order unresolved past ceiling, booking as loss"
                    );
                    Some(Settlement::loss(ResolutionStep::Timeout))
                } else {
                    None
                }
            }
        };

        match settlement {
            Some(s) => StepResult::Resolved(s),
            None => StepResult::Inconclusive,
        }
    }

    fn from_balance_delta(
        &self,
        stake: Decimal,
        before: Decimal,
        current: Decimal,
    ) -> Option<Settlement> {
        let delta = current - before;
        if delta > self.balance_epsilon {
            Some(Settlement::win(stake + delta, ResolutionStep::BalanceDelta))
        } else if delta < -self.balance_epsilon {
            Some(Settlement::loss(ResolutionStep::BalanceDelta))
        } else {
            None
        }
    }
}
