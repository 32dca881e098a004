use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::command::{ControlCommand, StopOutcome};
use super::scheduler::SchedulerLoop;
use super::state::StatusSnapshot;
use crate::config::{AppConfig, ConfigUpdate};
use crate::domain::Clock;
use crate::error::{BotError, Result};
use crate::exchange::BrokerClient;

/// Cloneable access for control surfaces: commands in, snapshots out
#[derive(Clone)]
pub struct BotHandle {
    control_tx: mpsc::Sender<ControlCommand>,
    status_rx: watch::Receiver<StatusSnapshot>,
}

impl BotHandle {
    pub(crate) fn new(
        control_tx: mpsc::Sender<ControlCommand>,
        status_rx: watch::Receiver<StatusSnapshot>,
    ) -> Self {
        Self {
            control_tx,
            status_rx,
        }
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> StatusSnapshot {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_rx.clone()
    }

    /// Apply a partial configuration update and wait for the verdict
    pub async fn update_config(&self, update: ConfigUpdate) -> Result<()> {
        let (reply, verdict) = oneshot::channel();
        self.send(ControlCommand::UpdateConfig { update, reply })
            .await?;
        verdict.await.map_err(|_| BotError::Cancelled)?
    }

    pub async fn reset_stop_loss(&self) -> Result<()> {
        self.send(ControlCommand::ResetStopLoss).await
    }

    pub async fn reset_consecutive_losses(&self) -> Result<()> {
        self.send(ControlCommand::ResetConsecutiveLosses).await
    }

    async fn send(&self, cmd: ControlCommand) -> Result<()> {
        self.control_tx
            .send(cmd)
            .await
            .map_err(|_| BotError::InvalidState("scheduler control channel closed".to_string()))
    }
}

/// Owns the scheduler task: explicit start, bounded stop
pub struct BotService {
    handle: BotHandle,
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
    stop_timeout: Duration,
    task: Option<JoinHandle<()>>,
}

impl BotService {
    /// Bootstrap against the broker and spawn the loop
    pub async fn start(
        config: AppConfig,
        broker: Arc<dyn BrokerClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let scheduler = SchedulerLoop::bootstrap(config, broker, clock).await?;
        Ok(Self::spawn(scheduler))
    }

    /// Spawn an already bootstrapped loop
    pub fn spawn(scheduler: SchedulerLoop) -> Self {
        let handle = scheduler.handle();
        let running = scheduler.running_flag();
        let wake = scheduler.waker();
        let stop_timeout = scheduler.stop_timeout();
        running.store(true, Ordering::SeqCst);

        let task = tokio::spawn(scheduler.run());
        info!("bot service started");

        Self {
            handle,
            running,
            wake,
            stop_timeout,
            task: Some(task),
        }
    }

    pub fn handle(&self) -> BotHandle {
        self.handle.clone()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.handle.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal the loop and wait a bounded time for it to exit. A loop stuck
    /// in a broker call yields `Requested`; calling `stop` again keeps
    /// waiting on the same task.
    pub async fn stop(&mut self) -> StopOutcome {
        let Some(task) = self.task.as_mut() else {
            return StopOutcome::NotRunning;
        };

        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();
        info!("bot stop requested");

        match tokio::time::timeout(self.stop_timeout, task).await {
            Ok(joined) => {
                if let Err(e) = joined {
                    warn!(error = %e, "scheduler task ended abnormally");
                }
                self.task = None;
                info!("bot stopped");
                StopOutcome::Stopped
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.stop_timeout.as_secs(),
                    "scheduler still busy after stop deadline"
                );
                StopOutcome::Requested
            }
        }
    }
}
