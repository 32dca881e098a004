use crate::config::StrategyConfig;
use crate::domain::{Direction, PairStatistics};
use crate::error::{BotError, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

/// Relative Strength Index with Wilder smoothing over oldest-first closes.
///
/// Returns `None` when fewer than `period + 1` closes are available.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let p = period as f64;
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;

    for (i, pair) in closes.windows(2).enumerate() {
        let change = pair[1] - pair[0];
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);

        if i < period {
            avg_gain += gain / p;
            avg_loss += loss / p;
        } else {
            avg_gain = (avg_gain * (p - 1.0) + gain) / p;
            avg_loss = (avg_loss * (p - 1.0) + loss) / p;
        }
    }

    if avg_loss == 0.0 {
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Map an oscillator value to a contract direction.
///
/// The strategy fades nothing: an oversold reading buys a put and an
/// overbought reading buys a call.
pub fn classify(value: f64, oversold: f64, overbought: f64) -> Option<Direction> {
    if value <= oversold {
        Some(Direction::Put)
    } else if value >= overbought {
        Some(Direction::Call)
    } else {
        None
    }
}

/// A directional signal ready for risk admission
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signal {
    pub direction: Direction,
    pub indicator: f64,
}

/// Turns price history into rate-limited signals
#[derive(Debug, Clone)]
pub struct SignalEngine {
    period: usize,
    oversold: f64,
    overbought: f64,
    min_gap: Duration,
}

impl SignalEngine {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            period: config.rsi_period,
            oversold: config.oversold_level,
            overbought: config.overbought_level,
            min_gap: Duration::minutes(config.min_time_between_signals_mins),
        }
    }

    /// Indicator value and raw signal, no rate limiting
    pub fn evaluate(&self, closes: &[f64]) -> Result<Option<Signal>> {
        if let Some(bad) = closes.iter().find(|c| !c.is_finite()) {
            return Err(BotError::InvalidMarketData(format!(
                "non-finite close in price history: {bad}"
            )));
        }
        let Some(value) = rsi(closes, self.period) else {
            return Ok(None);
        };
        Ok(classify(value, self.oversold, self.overbought).map(|direction| Signal {
            direction,
            indicator: value,
        }))
    }

    /// Whether enough time has passed since the pair's last accepted signal
    pub fn is_cooled_down(&self, stats: &PairStatistics, now: DateTime<Utc>) -> bool {
        match stats.last_signal_time {
            Some(last) => now - last > self.min_gap,
            None => true,
        }
    }

    /// Evaluate, apply the per-pair spacing rule, and stamp the pair on
    /// acceptance. Suppressed signals are dropped silently.
    pub fn process(
        &self,
        instrument: &str,
        closes: &[f64],
        stats: &mut PairStatistics,
        now: DateTime<Utc>,
    ) -> Result<Option<Signal>> {
        let Some(signal) = self.evaluate(closes)? else {
            return Ok(None);
        };

        if !self.is_cooled_down(stats, now) {
            debug!(
                instrument,
                direction = %signal.direction,
                rsi = signal.indicator,
                "signal suppressed, pair still cooling down"
            );
            return Ok(None);
        }

        stats.last_signal_time = Some(now);
        info!(
            instrument,
            direction = %signal.direction,
            rsi = format!("{:.2}", signal.indicator),
            "signal accepted"
        );
        Ok(Some(signal))
    }
}
