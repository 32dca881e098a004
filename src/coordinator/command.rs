//! Control messages for the running scheduler

use tokio::sync::oneshot;

use crate::config::ConfigUpdate;
use crate::error::Result;

/// Commands applied by the scheduler task at tick boundaries
#[derive(Debug)]
pub enum ControlCommand {
    /// Apply a partial configuration update; the reply carries validation errors
    UpdateConfig {
        update: ConfigUpdate,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Clear the absolute and monthly stop-loss flags
    ResetStopLoss,
    /// Clear loss streaks and daily lockouts on every pair
    ResetConsecutiveLosses,
}

/// Result of asking the scheduler to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The loop exited within the join deadline
    Stopped,
    /// Stop was signalled but the loop is still finishing a broker call
    Requested,
    /// Nothing was running
    NotRunning,
}
