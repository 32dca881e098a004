pub mod adapters;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod persistence;
pub mod strategy;

pub use adapters::PaperBroker;
pub use config::{AppConfig, ConfigUpdate};
pub use coordinator::{BotHandle, BotService, SchedulerLoop, StatusSnapshot, StopOutcome};
pub use domain::{Clock, Direction, Order, OrderState, Outcome, StrategyState, SystemClock};
pub use error::{BotError, Rejection, Result};
pub use exchange::{AccountKind, BrokerClient, TimedBroker};
pub use persistence::StateStore;
pub use strategy::{OrderLifecycleManager, ResolutionStep, RiskManager, SignalEngine};
