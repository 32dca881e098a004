pub mod payload;
mod timed;
mod traits;

pub use timed::TimedBroker;
#[cfg(test)]
pub use traits::MockBrokerClient;
pub use traits::{AccountKind, BrokerClient};
