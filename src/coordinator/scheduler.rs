//! The single task that owns all strategy state
//!
//! Each tick:
//! 1. apply queued control commands
//! 2. daily / monthly rollovers
//! 3. refresh the instrument universe (low frequency)
//! 4. per instrument: closes → signal → admission → size → place
//! 5. advance open orders through the resolution chain
//! 6. checkpoint when something changed or the periodic cadence is due
//! 7. reconnect if the broker session looks frozen
//! 8. publish a status snapshot

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, error, info, warn};

use super::command::ControlCommand;
use super::service::BotHandle;
use super::state::{BotStatus, StatusSnapshot};
use crate::config::{AppConfig, ConfigUpdate};
use crate::domain::{Clock, StrategyState};
use crate::error::{BotError, Result};
use crate::exchange::{BrokerClient, TimedBroker};
use crate::persistence::{roll_daily, roll_monthly, StateStore};
use crate::strategy::{InstrumentUniverse, OrderLifecycleManager, RiskManager, SignalEngine};

const CONTROL_CHANNEL_CAPACITY: usize = 32;

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub placed: usize,
    pub resolved: usize,
    pub saved: bool,
    pub reconnected: bool,
}

pub struct SchedulerLoop {
    config: AppConfig,
    broker: TimedBroker,
    clock: Arc<dyn Clock>,
    store: StateStore,
    signals: SignalEngine,
    risk: RiskManager,
    orders: OrderLifecycleManager,
    state: StrategyState,
    universe: InstrumentUniverse,
    last_refresh: Option<DateTime<Utc>>,
    last_balance: Option<Decimal>,
    ticks: u64,
    /// A change that has not reached disk yet
    save_pending: bool,
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
    control_tx: mpsc::Sender<ControlCommand>,
    control_rx: mpsc::Receiver<ControlCommand>,
    status_tx: watch::Sender<StatusSnapshot>,
}

impl SchedulerLoop {
    /// Connect, load persisted state and re-adopt open orders
    pub async fn bootstrap(
        config: AppConfig,
        broker: Arc<dyn BrokerClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate().map_err(BotError::InvalidConfig)?;

        let broker = TimedBroker::new(broker, Duration::from_secs(config.broker.api_timeout_secs));
        broker.reconnect(config.broker.account_type).await?;
        let balance = broker.balance().await?;

        let now = clock.now();
        let store = StateStore::new(config.persistence.state_file.clone());
        let (mut state, open_orders) = store.load(balance, now).await?;

        let mut orders = OrderLifecycleManager::new(&config.resolution);
        orders.restore(open_orders, now);

        let today = now.date_naive();
        let rolled_day = roll_daily(&mut state, today);
        let rolled_month = roll_monthly(&mut state, today);

        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (status_tx, _) = watch::channel(StatusSnapshot::idle(now));

        info!(
            account = %config.broker.account_type,
            balance = %balance,
            initial_capital = %state.initial_capital,
            open_orders = orders.len(),
            pairs = config.instruments.pairs.len(),
            "scheduler bootstrapped"
        );

        let scheduler = Self {
            signals: SignalEngine::new(&config.strategy),
            risk: RiskManager::new(config.risk.clone()),
            config,
            broker,
            clock,
            store,
            orders,
            state,
            universe: InstrumentUniverse::default(),
            last_refresh: None,
            last_balance: Some(balance),
            ticks: 0,
            save_pending: rolled_day || rolled_month,
            running: Arc::new(AtomicBool::new(true)),
            wake: Arc::new(Notify::new()),
            control_tx,
            control_rx,
            status_tx,
        };
        scheduler.publish(BotStatus::Running, now);
        Ok(scheduler)
    }

    pub fn handle(&self) -> BotHandle {
        BotHandle::new(self.control_tx.clone(), self.status_tx.subscribe())
    }

    pub(crate) fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub(crate) fn waker(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.config.scheduler.stop_join_timeout_secs)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> &StrategyState {
        &self.state
    }

    pub fn orders(&self) -> &OrderLifecycleManager {
        &self.orders
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Tick until stopped, then write a final checkpoint
    pub async fn run(mut self) {
        let poll = Duration::from_secs(self.config.scheduler.poll_interval_secs);
        info!(poll_secs = poll.as_secs(), "scheduler loop started");

        while self.is_running() {
            let report = self.tick().await;
            debug!(?report, tick = self.ticks, "tick complete");

            if !self.is_running() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = self.wake.notified() => {}
                Some(cmd) = self.control_rx.recv() => self.apply_command(cmd),
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        let now = self.clock.now();
        self.publish(BotStatus::Stopping, now);
        if self.checkpoint(now).await {
            info!(open_orders = self.orders.len(), "final checkpoint written");
        }
        self.publish(BotStatus::Stopped, now);
        info!("scheduler loop stopped");
    }

    /// One pass of the trading loop
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        self.drain_commands();

        let now = self.clock.now();
        let today = now.date_naive();
        let mut dirty = std::mem::take(&mut self.save_pending);
        dirty |= roll_daily(&mut self.state, today);
        dirty |= roll_monthly(&mut self.state, today);

        if self.refresh_due(now) {
            self.refresh_universe(now).await;
        }

        if self.is_running() {
            report.placed = self.scan_entries(now).await;
        }

        let resolved = self.orders.advance(&self.broker, now).await;
        for order in &resolved {
            self.risk.record_resolution(&mut self.state, order);
        }
        report.resolved = resolved.len();

        self.ticks += 1;
        let periodic = self.ticks % self.config.scheduler.save_every_ticks == 0;
        if dirty || periodic || report.placed > 0 || report.resolved > 0 {
            report.saved = self.checkpoint(now).await;
        }

        let timeouts = self.broker.consecutive_timeouts();
        if timeouts > self.config.broker.max_freeze_count {
            report.reconnected = self.recover_session(timeouts).await;
        }

        self.publish(BotStatus::Running, now);
        report
    }

    // ==================== Instruments ====================

    fn refresh_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_refresh {
            Some(last) => (now - last).num_seconds() >= self.config.instruments.refresh_secs as i64,
            None => true,
        }
    }

    async fn refresh_universe(&mut self, now: DateTime<Utc>) {
        match self.broker.tradable_instruments().await {
            Ok(tradable) => {
                self.universe = InstrumentUniverse::resolve(&self.config.instruments, &tradable);
                self.last_refresh = Some(now);
            }
            Err(e) => {
                warn!(error = %e, "instrument refresh failed, keeping previous universe");
            }
        }
    }

    // ==================== Entries ====================

    async fn scan_entries(&mut self, now: DateTime<Utc>) -> usize {
        let targets: Vec<(String, String)> = self
            .universe
            .iter()
            .map(|(pair, asset)| (pair.to_string(), asset.to_string()))
            .collect();

        let mut placed = 0;
        for (pair, asset) in targets {
            if !self.is_running() {
                break;
            }
            match self.try_enter(&pair, &asset, now).await {
                Ok(true) => placed += 1,
                Ok(false) => {}
                Err(e) if e.is_transient() => {
                    debug!(instrument = %pair, asset = %asset, error = %e, "broker unavailable, entry deferred")
                }
                Err(e) => warn!(instrument = %pair, asset = %asset, error = %e, "entry skipped"),
            }
        }
        placed
    }

    /// Returns true when an order was placed
    async fn try_enter(&mut self, pair: &str, asset: &str, now: DateTime<Utc>) -> Result<bool> {
        let strategy = &self.config.strategy;
        let closes = self
            .broker
            .recent_closes(asset, strategy.candle_timeframe_secs, strategy.candle_count)
            .await?;

        let Some(signal) = self
            .signals
            .process(pair, &closes, self.state.pair_mut(pair), now)?
        else {
            return Ok(false);
        };

        if let Err(reason) = self.risk.check_entry(&self.state, pair) {
            debug!(instrument = pair, %reason, "signal rejected by risk gate");
            return Ok(false);
        }

        let balance = self.broker.balance().await?;
        self.last_balance = Some(balance);
        let stake = self.risk.size(balance);

        self.orders
            .open(
                &self.broker,
                pair,
                asset,
                signal,
                stake,
                self.config.strategy.expiry_minutes,
                Some(balance),
                now,
            )
            .await?;
        Ok(true)
    }

    // ==================== Persistence / Session ====================

    async fn checkpoint(&mut self, now: DateTime<Utc>) -> bool {
        let open = self.orders.snapshot();
        match self.store.save(&mut self.state, &open, now).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    path = %self.store.path().display(),
                    error = %e,
                    "checkpoint failed, retrying next tick"
                );
                self.save_pending = true;
                false
            }
        }
    }

    async fn recover_session(&mut self, timeouts: u32) -> bool {
        warn!(
            consecutive_timeouts = timeouts,
            limit = self.config.broker.max_freeze_count,
            "broker session looks frozen, reconnecting"
        );
        match self.broker.reconnect(self.config.broker.account_type).await {
            Ok(()) => {
                info!("broker session restored");
                true
            }
            Err(e) => {
                error!(error = %e, "reconnect failed, will retry");
                false
            }
        }
    }

    // ==================== Control ====================

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.control_rx.try_recv() {
            self.apply_command(cmd);
        }
    }

    fn apply_command(&mut self, cmd: ControlCommand) {
        match cmd {
            ControlCommand::UpdateConfig { update, reply } => {
                let result = self.apply_update(&update);
                if let Err(e) = &result {
                    warn!(error = %e, "configuration update rejected");
                }
                let _ = reply.send(result);
            }
            ControlCommand::ResetStopLoss => {
                self.risk.reset_stop_loss(&mut self.state);
                self.save_pending = true;
            }
            ControlCommand::ResetConsecutiveLosses => {
                self.risk.reset_consecutive_losses(&mut self.state);
                self.save_pending = true;
            }
        }
    }

    fn apply_update(&mut self, update: &ConfigUpdate) -> Result<()> {
        let next = self.config.with_update(update)?;
        if next.instruments.pairs != self.config.instruments.pairs {
            self.last_refresh = None;
        }
        self.signals = SignalEngine::new(&next.strategy);
        self.risk.update_config(next.risk.clone(), &mut self.state);
        self.config = next;
        self.save_pending = true;
        info!(?update, "configuration updated");
        Ok(())
    }

    fn publish(&self, status: BotStatus, now: DateTime<Utc>) {
        self.status_tx.send_replace(StatusSnapshot::build(
            status,
            &self.state,
            self.orders.open_orders(),
            self.universe.valid_assets(),
            self.last_balance,
            now,
        ));
    }
}
