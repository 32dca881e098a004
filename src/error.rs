use thiserror::Error;

/// Main error type for the trading bot
#[derive(Error, Debug)]
pub enum BotError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    // Broker errors
    #[error("Broker connection failed: {0}")]
    Connection(String),

    #[error("Broker call timed out: {operation} after {timeout_ms}ms")]
    BrokerTimeout { operation: String, timeout_ms: u64 },

    #[error("Broker call failed: {operation} - {reason}")]
    Broker { operation: String, reason: String },

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Malformed broker payload: {0}")]
    MalformedPayload(String),

    // Market data errors
    #[error("Invalid market data: {0}")]
    InvalidMarketData(String),

    // State errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl BotError {
    /// Errors that the next tick (or a reconnect) may clear on its own
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BotError::Connection(_) | BotError::BrokerTimeout { .. } | BotError::Broker { .. }
        )
    }
}

/// Result type alias for BotError
pub type Result<T> = std::result::Result<T, BotError>;

/// Reasons the risk gate refuses a signal
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("Absolute stop loss active")]
    AbsoluteStopLoss,

    #[error("Monthly stop loss active for {month}")]
    MonthlyStopLoss { month: String },

    #[error("Daily lockout for {instrument}")]
    DailyLockout { instrument: String },

    #[error("Consecutive losses: {count} >= {ceiling}")]
    ConsecutiveLosses { count: u32, ceiling: u32 },
}
