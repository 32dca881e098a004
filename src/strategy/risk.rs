use crate::config::RiskConfig;
use crate::domain::{Outcome, ResolvedOrder, StrategyState};
use crate::error::Rejection;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

/// Risk manager for position sizing, admission and drawdown limits.
///
/// Holds configuration only; the strategy state it reads and updates is
/// owned by the scheduler and passed in.
#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
}

impl RiskManager {
    /// Create a new risk manager
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    // ==================== Pre-Trade Checks ====================

    /// Stake for the given capital: a fixed fraction, clamped to the
    /// configured bounds
    pub fn size(&self, capital: Decimal) -> Decimal {
        let raw = capital * self.config.position_size_pct;
        raw.max(self.config.min_position_size)
            .min(self.config.max_position_size)
    }

    /// Admission gate. The first failing check wins.
    pub fn check_entry(
        &self,
        state: &StrategyState,
        instrument: &str,
    ) -> std::result::Result<(), Rejection> {
        if state.absolute_stop_loss_activated {
            return Err(Rejection::AbsoluteStopLoss);
        }

        if state.monthly_stop_loss
            && state.stop_loss_triggered_month.as_deref() == Some(state.current_month.as_str())
        {
            return Err(Rejection::MonthlyStopLoss {
                month: state.current_month.clone(),
            });
        }

        if let Some(pair) = state.pair(instrument) {
            if pair.daily_lockout {
                return Err(Rejection::DailyLockout {
                    instrument: instrument.to_string(),
                });
            }
            if pair.consecutive_losses >= self.config.max_consecutive_losses {
                return Err(Rejection::ConsecutiveLosses {
                    count: pair.consecutive_losses,
                    ceiling: self.config.max_consecutive_losses,
                });
            }
        }

        Ok(())
    }

    // ==================== Post-Trade Updates ====================

    /// Fold a settled order into the counters and profit totals, then
    /// re-evaluate both drawdown limits
    pub fn record_resolution(&self, state: &mut StrategyState, resolved: &ResolvedOrder) {
        let instrument = resolved.order.instrument.as_str();
        let ceiling = self.config.max_consecutive_losses;
        let pair = state.pair_mut(instrument);

        match resolved.order.outcome {
            Outcome::Win => {
                pair.wins += 1;
                pair.consecutive_losses = 0;
            }
            Outcome::Tie => {
                pair.ties += 1;
                pair.consecutive_losses = 0;
            }
            Outcome::Loss | Outcome::Unknown => {
                pair.losses += 1;
                pair.consecutive_losses += 1;
                if pair.consecutive_losses >= ceiling && !pair.daily_lockout {
                    pair.daily_lockout = true;
                    warn!(
                        instrument,
                        consecutive_losses = pair.consecutive_losses,
                        "pair locked for the rest of the day"
                    );
                }
            }
        }

        state.total_profit += resolved.profit;
        state.daily_profit += resolved.profit;
        *state
            .monthly_profits
            .entry(state.current_month.clone())
            .or_insert(Decimal::ZERO) += resolved.profit;

        info!(
            order_id = %resolved.order.id,
            instrument,
            outcome = %resolved.order.outcome,
            source = %resolved.source,
            profit = %resolved.profit,
            total_profit = %state.total_profit,
            "order resolved"
        );

        self.evaluate_drawdown(state);
    }

    /// Trip the absolute and monthly stop-loss flags when their thresholds
    /// are reached
    pub fn evaluate_drawdown(&self, state: &mut StrategyState) {
        if !state.absolute_stop_loss_activated && state.initial_capital > Decimal::ZERO {
            let drawdown = (state.initial_capital - state.equity()) / state.initial_capital;
            if drawdown >= self.config.absolute_stop_loss_pct {
                state.absolute_stop_loss_activated = true;
                error!(
                    drawdown = %drawdown.round_dp(4),
                    limit = %self.config.absolute_stop_loss_pct,
                    equity = %state.equity(),
                    "ABSOLUTE STOP LOSS TRIGGERED, trading halted until reset"
                );
            }
        }

        if !state.monthly_stop_loss {
            if let Some(start) = state.current_month_starting_capital() {
                if start > Decimal::ZERO {
                    let drawdown = -state.current_month_profit() / start;
                    if drawdown >= self.config.monthly_stop_loss_pct {
                        state.monthly_stop_loss = true;
                        state.stop_loss_triggered_month = Some(state.current_month.clone());
                        error!(
                            month = %state.current_month,
                            drawdown = %drawdown.round_dp(4),
                            limit = %self.config.monthly_stop_loss_pct,
                            "MONTHLY STOP LOSS TRIGGERED, trading halted until next month"
                        );
                    }
                }
            }
        }
    }

    // ==================== Manual Intervention ====================

    /// Clear both stop-loss layers
    pub fn reset_stop_loss(&self, state: &mut StrategyState) {
        info!(
            absolute = state.absolute_stop_loss_activated,
            monthly = state.monthly_stop_loss,
            "stop loss reset"
        );
        state.absolute_stop_loss_activated = false;
        Self::clear_monthly_stop(state);
    }

    /// Clear loss streaks and daily lockouts on every pair
    pub fn reset_consecutive_losses(&self, state: &mut StrategyState) {
        for pair in state.pairs.values_mut() {
            pair.consecutive_losses = 0;
            pair.daily_lockout = false;
        }
        info!("consecutive losses and daily lockouts reset");
    }

    pub fn clear_monthly_stop(state: &mut StrategyState) {
        if state.monthly_stop_loss {
            debug!(month = ?state.stop_loss_triggered_month, "monthly stop loss cleared");
        }
        state.monthly_stop_loss = false;
        state.stop_loss_triggered_month = None;
    }

    /// Swap in new limits. A changed monthly threshold re-arms the monthly
    /// stop.
    pub fn update_config(&mut self, config: RiskConfig, state: &mut StrategyState) {
        if config.monthly_stop_loss_pct != self.config.monthly_stop_loss_pct {
            Self::clear_monthly_stop(state);
        }
        self.config = config;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Direction, Order, Settlement};
    use crate::strategy::resolution::ResolutionStep;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn test_config() -> RiskConfig {
        RiskConfig {
            max_consecutive_losses: 3,
            ..RiskConfig::default()
        }
    }

    fn resolved(instrument: &str, stake: Decimal, settlement: Settlement) -> ResolvedOrder {
        Order::pending(
            instrument,
            instrument,
            Direction::Put,
            stake,
            Utc::now(),
            5,
            30.0,
            None,
        )
        .activate("1".to_string())
        .resolve(settlement)
    }

    fn loss(instrument: &str, stake: Decimal) -> ResolvedOrder {
        resolved(instrument, stake, Settlement::loss(ResolutionStep::Timeout))
    }

    #[test]
    fn test_size_clamps_to_bounds() {
        let risk = RiskManager::new(RiskConfig::default());
        assert_eq!(risk.size(dec!(100000)), dec!(5000));
        assert_eq!(risk.size(dec!(300000)), dec!(10000));
        assert_eq!(risk.size(dec!(150000)), dec!(7500.00));
        assert_eq!(risk.size(dec!(1000)), dec!(5000));
    }

    #[test]
    fn test_consecutive_losses_lock_the_pair() {
        let risk = RiskManager::new(test_config());
        let mut state = StrategyState::fresh(dec!(1000000), Utc::now());

        for _ in 0..2 {
            risk.record_resolution(&mut state, &loss("EURUSD", dec!(5000)));
        }
        assert!(risk.check_entry(&state, "EURUSD").is_ok());

        risk.record_resolution(&mut state, &loss("EURUSD", dec!(5000)));
        assert_eq!(
            risk.check_entry(&state, "EURUSD"),
            Err(Rejection::DailyLockout {
                instrument: "EURUSD".to_string()
            })
        );
        // Other pairs are unaffected
        assert!(risk.check_entry(&state, "GBPUSD").is_ok());
    }

    #[test]
    fn test_win_and_tie_reset_streak() {
        let risk = RiskManager::new(test_config());
        let mut state = StrategyState::fresh(dec!(1000000), Utc::now());
        risk.record_resolution(&mut state, &loss("EURUSD", dec!(5000)));
        risk.record_resolution(
            &mut state,
            &resolved("EURUSD", dec!(5000), Settlement::tie(dec!(5000), ResolutionStep::Ledger)),
        );
        let pair = state.pair("EURUSD").unwrap();
        assert_eq!(pair.consecutive_losses, 0);
        assert_eq!((pair.wins, pair.losses, pair.ties), (0, 1, 1));
        assert_eq!(state.total_profit, dec!(-5000));
    }

    #[test]
    fn test_profit_accounting() {
        let risk = RiskManager::new(test_config());
        let mut state = StrategyState::fresh(dec!(100000), Utc::now());
        risk.record_resolution(
            &mut state,
            &resolved("EURUSD", dec!(5000), Settlement::win(dec!(9250), ResolutionStep::Ledger)),
        );
        assert_eq!(state.total_profit, dec!(4250));
        assert_eq!(state.daily_profit, dec!(4250));
        assert_eq!(state.current_month_profit(), dec!(4250));
        assert_eq!(state.equity(), dec!(104250));
    }

    #[test]
    fn test_monthly_stop_trips_and_blocks() {
        let risk = RiskManager::new(test_config());
        let mut state = StrategyState::fresh(dec!(20000), Utc::now());
        risk.record_resolution(&mut state, &loss("EURUSD", dec!(5000)));
        assert!(!state.monthly_stop_loss);
        risk.record_resolution(&mut state, &loss("GBPUSD", dec!(3000)));
        assert!(state.monthly_stop_loss);
        assert_eq!(state.stop_loss_triggered_month.as_deref(), Some(state.current_month.as_str()));
        assert!(matches!(
            risk.check_entry(&state, "AUDCHF"),
            Err(Rejection::MonthlyStopLoss { .. })
        ));
        assert!(!state.absolute_stop_loss_activated);
    }

    #[test]
    fn test_absolute_stop_is_sticky_until_reset() {
        let risk = RiskManager::new(test_config());
        let mut state = StrategyState::fresh(dec!(10000), Utc::now());
        risk.record_resolution(&mut state, &loss("EURUSD", dec!(7500)));
        assert!(state.absolute_stop_loss_activated);
        assert_eq!(risk.check_entry(&state, "EURUSD"), Err(Rejection::AbsoluteStopLoss));

        // Recovering equity does not clear it
        risk.record_resolution(
            &mut state,
            &resolved("EURUSD", dec!(5000), Settlement::win(dec!(20000), ResolutionStep::Ledger)),
        );
        assert!(state.absolute_stop_loss_activated);

        risk.reset_stop_loss(&mut state);
        assert!(!state.stop_loss_active());
    }

    #[test]
    fn test_reset_consecutive_losses_clears_lockouts() {
        let risk = RiskManager::new(test_config());
        let mut state = StrategyState::fresh(dec!(1000000), Utc::now());
        for _ in 0..3 {
            risk.record_resolution(&mut state, &loss("EURUSD", dec!(5000)));
        }
        risk.reset_consecutive_losses(&mut state);
        assert!(risk.check_entry(&state, "EURUSD").is_ok());
        assert_eq!(state.pair("EURUSD").unwrap().losses, 3);
    }

    #[test]
    fn test_changed_monthly_threshold_rearms() {
        let mut risk = RiskManager::new(test_config());
        let mut state = StrategyState::fresh(dec!(20000), Utc::now());
        state.monthly_stop_loss = true;
        state.stop_loss_triggered_month = Some(state.current_month.clone());

        risk.update_config(test_config(), &mut state);
        assert!(state.monthly_stop_loss);

        let looser = RiskConfig {
            monthly_stop_loss_pct: dec!(0.60),
            ..test_config()
        };
        risk.update_config(looser, &mut state);
        assert!(!state.monthly_stop_loss);
        assert!(state.stop_loss_triggered_month.is_none());
    }
}
