//! Deadline-bounded broker access
//!
//! Every broker call made by the trading loop passes through [`TimedBroker`].
//! A call that does not finish within its deadline is dropped and reported as
//! [`BotError::BrokerTimeout`]; consecutive timeouts are counted so the loop
//! can detect a frozen session and reconnect.

use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{AccountKind, BrokerClient};
use crate::domain::Direction;
use crate::error::{BotError, Result};

pub struct TimedBroker {
    inner: Arc<dyn BrokerClient>,
    default_timeout: Duration,
    consecutive_timeouts: AtomicU32,
}

impl TimedBroker {
    pub fn new(inner: Arc<dyn BrokerClient>, default_timeout: Duration) -> Self {
        Self {
            inner,
            default_timeout,
            consecutive_timeouts: AtomicU32::new(0),
        }
    }

    /// Timeouts since the last successful call
    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts.load(Ordering::SeqCst)
    }

    pub fn reset_freeze_counter(&self) {
        self.consecutive_timeouts.store(0, Ordering::SeqCst);
    }

    async fn guarded<T, F>(&self, operation: &'static str, limit: Duration, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(limit, call).await {
            Ok(Ok(value)) => {
                self.consecutive_timeouts.store(0, Ordering::SeqCst);
                Ok(value)
            }
            Ok(Err(e)) => {
                debug!(operation, error = %e, "broker call failed");
                Err(e)
            }
            Err(_) => {
                let count = self.consecutive_timeouts.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(
                    operation,
                    timeout_ms = limit.as_millis() as u64,
                    consecutive = count,
                    "broker call timed out"
                );
                Err(BotError::BrokerTimeout {
                    operation: operation.to_string(),
                    timeout_ms: limit.as_millis() as u64,
                })
            }
        }
    }

    pub async fn connect(&self) -> Result<()> {
        self.guarded("connect", self.default_timeout, self.inner.connect())
            .await
    }

    /// Connect, pick the account, and clear the freeze counter
    pub async fn reconnect(&self, account: AccountKind) -> Result<()> {
        info!(%account, "reconnecting to broker");
        self.connect().await?;
        self.guarded(
            "select_account",
            self.default_timeout,
            self.inner.select_account(account),
        )
        .await?;
        self.reset_freeze_counter();
        Ok(())
    }

    pub async fn balance(&self) -> Result<Decimal> {
        self.guarded("balance", self.default_timeout, self.inner.balance())
            .await
    }

    pub async fn place_order(
        &self,
        stake: Decimal,
        asset: &str,
        direction: Direction,
        duration_minutes: u32,
    ) -> Result<String> {
        self.guarded(
            "place_order",
            self.default_timeout,
            self.inner
                .place_order(stake, asset, direction, duration_minutes),
        )
        .await
    }

    pub async fn tradable_instruments(&self) -> Result<HashMap<String, bool>> {
        self.guarded(
            "tradable_instruments",
            self.default_timeout,
            self.inner.tradable_instruments(),
        )
        .await
    }

    pub async fn recent_closes(
        &self,
        asset: &str,
        timeframe_secs: u64,
        count: usize,
    ) -> Result<Vec<f64>> {
        self.guarded(
            "recent_closes",
            self.default_timeout,
            self.inner.recent_closes(asset, timeframe_secs, count),
        )
        .await
    }

    pub async fn ledger_record(&self, order_id: &str) -> Result<Option<Value>> {
        self.guarded(
            "ledger_record",
            self.default_timeout,
            self.inner.ledger_record(order_id),
        )
        .await
    }

    pub async fn push_updates(&self) -> Result<Value> {
        self.guarded("push_updates", self.default_timeout, self.inner.push_updates())
            .await
    }

    /// The order-result query gets its own, shorter deadline
    pub async fn order_result(&self, order_id: &str, limit: Duration) -> Result<Option<Value>> {
        self.guarded("order_result", limit, self.inner.order_result(order_id))
            .await
    }
}
