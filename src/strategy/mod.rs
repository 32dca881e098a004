//! Strategy module
//!
//! Signal generation, risk gating, and the order lifecycle that turns an
//! accepted signal into a settled, accounted trade.
//!
//! ## Architecture
//!
//! - `signal` - RSI evaluation with per-pair spacing
//! - `risk` - sizing, admission gate, drawdown limits
//! - `resolution` - ordered settlement detection chain
//! - `lifecycle` - open-order tracking from placement to settlement
//! - `universe` - configured pairs mapped onto tradable broker assets

pub mod lifecycle;
pub mod resolution;
pub mod risk;
pub mod signal;
pub mod universe;

pub use lifecycle::OrderLifecycleManager;
pub use resolution::{ResolutionChain, ResolutionStep, StepResult};
pub use risk::RiskManager;
pub use signal::{Signal, SignalEngine};
pub use universe::InstrumentUniverse;
