//! Order lifecycle: placement, expiry tracking and settlement
//!
//! ```text
//! Pending ──place_order ok──▶ Active ──now ≥ expiry──▶ AwaitingResolution ──chain──▶ Resolved
//!    │
//!    └──place_order err──▶ discarded (never counted)
//! ```
//!
//! Resolved orders leave the active set before anything else sees them, so an
//! id can only be booked once.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::resolution::ResolutionChain;
use super::signal::Signal;
use crate::config::ResolutionConfig;
use crate::domain::{Order, OrderState, ResolvedOrder, Settlement};
use crate::error::{BotError, Result};
use crate::exchange::TimedBroker;

pub struct OrderLifecycleManager {
    /// Open orders keyed by broker id
    active: BTreeMap<String, Order>,
    chain: ResolutionChain,
}

impl OrderLifecycleManager {
    pub fn new(config: &ResolutionConfig) -> Self {
        Self {
            active: BTreeMap::new(),
            chain: ResolutionChain::new(config),
        }
    }

    /// Re-adopt orders that were open when the process last stopped. They
    /// resume the chain against their recorded expiry.
    pub fn restore(&mut self, orders: Vec<Order>, now: DateTime<Utc>) -> usize {
        let mut restored = 0;
        for mut order in orders {
            if order.id.is_empty() || order.state.is_terminal() || order.state == OrderState::Pending {
                warn!(
                    client_id = %order.client_id,
                    state = %order.state,
                    "dropping persisted order that cannot be resumed"
                );
                continue;
            }
            order.mark_expired(now);
            debug!(order_id = %order.id, state = %order.state, "restored open order");
            self.active.insert(order.id.clone(), order);
            restored += 1;
        }
        if restored > 0 {
            info!(count = restored, "resuming orders from previous session");
        }
        restored
    }

    /// Submit an order. A placement failure discards the pending order and
    /// is returned to the caller; nothing is tracked.
    #[allow(clippy::too_many_arguments)]
    pub async fn open(
        &mut self,
        broker: &TimedBroker,
        instrument: &str,
        asset: &str,
        signal: Signal,
        stake: Decimal,
        duration_minutes: u32,
        balance_before: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Result<Order> {
        let pending = Order::pending(
            instrument,
            asset,
            signal.direction,
            stake,
            now,
            duration_minutes,
            signal.indicator,
            balance_before,
        );

        let broker_id = broker
            .place_order(stake, asset, signal.direction, duration_minutes)
            .await?;
        let broker_id = broker_id.trim().to_string();
        if broker_id.is_empty() {
            return Err(BotError::OrderRejected(format!(
                "broker returned no id for {asset}"
            )));
        }
        if self.active.contains_key(&broker_id) {
            return Err(BotError::InvalidState(format!(
                "broker reused open order id {broker_id}"
            )));
        }

        let order = pending.activate(broker_id);
        info!(
            order_id = %order.id,
            client_id = %order.client_id,
            instrument,
            asset,
            direction = %order.direction,
            stake = %order.stake,
            expiry = %order.expiry_time,
            "order placed"
        );
        self.active.insert(order.id.clone(), order.clone());
        Ok(order)
    }

    /// Move expired orders forward and run the chain on each of them.
    /// Returns the orders that settled this pass.
    pub async fn advance(&mut self, broker: &TimedBroker, now: DateTime<Utc>) -> Vec<ResolvedOrder> {
        let ids: Vec<String> = self.active.keys().cloned().collect();
        let mut resolved = Vec::new();

        for id in ids {
            let candidate = match self.active.get_mut(&id) {
                Some(order) => {
                    if order.mark_expired(now) {
                        debug!(order_id = %id, "order expired, awaiting resolution");
                    }
                    if order.state != OrderState::AwaitingResolution {
                        continue;
                    }
                    order.clone()
                }
                None => continue,
            };

            if let Some(settlement) = self.chain.run(&candidate, broker, now).await {
                if let Some(done) = self.resolve(&id, settlement) {
                    resolved.push(done);
                }
            }
        }

        resolved
    }

    /// Book a settlement for an open order. The order is removed before the
    /// result is handed out; a second call for the same id returns `None`.
    pub fn resolve(&mut self, order_id: &str, settlement: Settlement) -> Option<ResolvedOrder> {
        let order = self.active.remove(order_id)?;
        Some(order.resolve(settlement))
    }

    pub fn open_orders(&self) -> impl Iterator<Item = &Order> {
        self.active.values()
    }

    /// Copies for persistence and snapshots
    pub fn snapshot(&self) -> Vec<Order> {
        self.active.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn chain(&self) -> &ResolutionChain {
        &self.chain
    }
}
