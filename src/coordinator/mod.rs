//! Trading loop coordination
//!
//! A single scheduler task owns every piece of mutable strategy state.
//! Control surfaces talk to it through [`BotHandle`]: commands go in over an
//! mpsc channel, status snapshots come out over a watch channel.

pub mod command;
pub mod scheduler;
pub mod service;
pub mod state;

pub use command::{ControlCommand, StopOutcome};
pub use scheduler::{SchedulerLoop, TickReport};
pub use service::{BotHandle, BotService};
pub use state::{BotStatus, OpenOrderView, PairStatsView, StatusSnapshot};
