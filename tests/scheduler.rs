mod common;

use binopt::config::ConfigUpdate;
use binopt::coordinator::SchedulerLoop;
use binopt::domain::{Clock, Direction, ManualClock, OrderState};
use binopt::persistence::{PersistedState, StateStore};
use binopt::strategy::ResolutionStep;
use chrono::Duration;
use common::{at, test_config, ScriptedBroker};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;

async fn scheduler(
    config: binopt::AppConfig,
    broker: &Arc<ScriptedBroker>,
    clock: &Arc<ManualClock>,
) -> SchedulerLoop {
    let clock: Arc<dyn Clock> = clock.clone();
    SchedulerLoop::bootstrap(config, broker.clone(), clock)
        .await
        .unwrap()
}

#[tokio::test]
async fn call_is_placed_and_settled_from_balance_delta() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let state_file = config.persistence.state_file.clone();
    let broker = Arc::new(ScriptedBroker::new(dec!(100000), &["EURUSD-OTC"]));
    let clock = Arc::new(ManualClock::new(at(2026, 3, 10, 12, 0)));
    let mut sched = scheduler(config, &broker, &clock).await;
    let handle = sched.handle();

    let report = sched.tick().await;
    assert_eq!(report.placed, 1);
    assert!(report.saved);

    let placed = broker.placed();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].asset, "EURUSD-OTC");
    assert_eq!(placed[0].stake, dec!(20000));
    assert_eq!(placed[0].direction, Direction::Call);
    assert_eq!(handle.snapshot().valid_pairs, vec!["EURUSD-OTC".to_string()]);
    assert_eq!(handle.snapshot().open_orders.len(), 1);

    // Same signal again inside the spacing window
    let report = sched.tick().await;
    assert_eq!(report.placed, 0);
    assert_eq!(sched.orders().len(), 1);

    // Broker credits 37000 after the 20000 stake was taken at 100000
    broker.set_balance(dec!(117000));
    clock.advance(Duration::minutes(5) + Duration::seconds(15));
    let report = sched.tick().await;
    assert_eq!(report.resolved, 1);
    assert_eq!(report.placed, 0);
    assert!(sched.orders().is_empty());

    let stats = sched.state().pair("EURUSD").unwrap();
    assert_eq!((stats.wins, stats.losses, stats.ties), (1, 0, 0));
    assert_eq!(sched.state().total_profit, dec!(17000));
    assert_eq!(sched.state().daily_profit, dec!(17000));

    let persisted = StateStore::new(state_file).read().await.unwrap().unwrap();
    assert_eq!(persisted.total_profit, dec!(17000));
    assert_eq!(persisted.wins.get("EURUSD"), Some(&1));
    assert!(persisted.open_orders.is_empty());
}

#[tokio::test]
async fn unresolved_order_is_booked_as_one_loss_after_ceiling() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.resolution.steps = vec![
        ResolutionStep::Grace,
        ResolutionStep::Ledger,
        ResolutionStep::Timeout,
    ];
    let broker = Arc::new(ScriptedBroker::new(dec!(100000), &["EURUSD-OTC"]));
    let clock = Arc::new(ManualClock::new(at(2026, 3, 10, 12, 0)));
    let mut sched = scheduler(config, &broker, &clock).await;

    assert_eq!(sched.tick().await.placed, 1);

    clock.advance(Duration::minutes(5) + Duration::seconds(60));
    assert_eq!(sched.tick().await.resolved, 0);
    let order = sched.orders().open_orders().next().unwrap();
    assert_eq!(order.state, OrderState::AwaitingResolution);

    clock.advance(Duration::seconds(61));
    assert_eq!(sched.tick().await.resolved, 1);
    assert!(sched.orders().is_empty());

    assert_eq!(sched.tick().await.resolved, 0);
    let stats = sched.state().pair("EURUSD").unwrap();
    assert_eq!(stats.losses, 1);
    assert_eq!(stats.consecutive_losses, 1);
    assert_eq!(sched.state().total_profit, dec!(-20000));
}

#[tokio::test]
async fn losing_streak_locks_pair_until_next_day() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.risk.max_consecutive_losses = 2;
    config.risk.monthly_stop_loss_pct = dec!(0.9);
    config.risk.absolute_stop_loss_pct = dec!(0.9);
    config.strategy.min_time_between_signals_mins = 0;
    config.resolution.steps = vec![
        ResolutionStep::Grace,
        ResolutionStep::Ledger,
        ResolutionStep::Timeout,
    ];
    let broker = Arc::new(ScriptedBroker::new(dec!(100000), &["EURUSD-OTC"]));
    broker.settle_every_order_as("loose");
    let clock = Arc::new(ManualClock::new(at(2026, 3, 10, 10, 0)));
    let mut sched = scheduler(config, &broker, &clock).await;
    let step = Duration::minutes(5) + Duration::seconds(11);

    assert_eq!(sched.tick().await.placed, 1);

    clock.advance(step);
    let report = sched.tick().await;
    assert_eq!((report.placed, report.resolved), (1, 1));

    clock.advance(step);
    let report = sched.tick().await;
    assert_eq!((report.placed, report.resolved), (1, 1));
    assert!(sched.state().pair("EURUSD").unwrap().daily_lockout);

    clock.advance(step);
    let report = sched.tick().await;
    assert_eq!(report.placed, 0);
    assert_eq!(report.resolved, 1);
    assert_eq!(sched.state().pair("EURUSD").unwrap().consecutive_losses, 3);
    assert_eq!(broker.placed().len(), 3);

    clock.set(at(2026, 3, 11, 9, 0));
    let report = sched.tick().await;
    assert_eq!(report.placed, 1);
    let stats = sched.state().pair("EURUSD").unwrap();
    assert!(!stats.daily_lockout);
    assert_eq!(stats.consecutive_losses, 0);
    assert_eq!(sched.state().daily_profit, Decimal::ZERO);
}

#[tokio::test]
async fn new_month_lifts_monthly_stop_and_anchors_capital() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let store = StateStore::new(config.persistence.state_file.clone());

    let mut seeded = PersistedState {
        initial_capital: Some(dec!(100000)),
        total_profit: dec!(-45000),
        monthly_stop_loss: true,
        stop_loss_triggered_month: Some("2026-03".to_string()),
        current_month: Some("2026-03".to_string()),
        last_date: Some(at(2026, 3, 31, 0, 0).date_naive()),
        ..Default::default()
    };
    seeded.monthly_profits = BTreeMap::from([("2026-03".to_string(), dec!(-45000))]);
    seeded.monthly_starting_capital = BTreeMap::from([("2026-03".to_string(), dec!(100000))]);
    store.write(&seeded).await.unwrap();

    let broker = Arc::new(ScriptedBroker::new(dec!(55000), &["EURUSD-OTC"]));
    let clock = Arc::new(ManualClock::new(at(2026, 3, 31, 23, 50)));
    let mut sched = scheduler(config, &broker, &clock).await;

    assert_eq!(sched.tick().await.placed, 0);
    assert!(sched.state().monthly_stop_loss);

    // Past the signal spacing from the rejected 23:50 evaluation
    clock.set(at(2026, 4, 1, 1, 0));
    let report = sched.tick().await;
    assert_eq!(report.placed, 1);

    let state = sched.state();
    assert_eq!(state.current_month, "2026-04");
    assert!(!state.monthly_stop_loss);
    assert_eq!(state.monthly_starting_capital.get("2026-04"), Some(&dec!(55000)));
    assert_eq!(state.monthly_profits.get("2026-04"), Some(&Decimal::ZERO));
    assert_eq!(state.monthly_profits.get("2026-03"), Some(&dec!(-45000)));
    assert!(!state.absolute_stop_loss_activated);
}

#[tokio::test]
async fn config_updates_apply_between_ticks() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let broker = Arc::new(ScriptedBroker::new(dec!(100000), &["EURUSD-OTC"]));
    let clock = Arc::new(ManualClock::new(at(2026, 3, 10, 12, 0)));
    let mut sched = scheduler(config, &broker, &clock).await;
    let handle = sched.handle();

    let update = ConfigUpdate {
        position_size_pct: Some(dec!(0.1)),
        ..Default::default()
    };
    let (applied, report) = tokio::join!(handle.update_config(update), sched.tick());
    applied.unwrap();
    assert_eq!(report.placed, 1);
    assert_eq!(sched.config().risk.position_size_pct, dec!(0.1));
    assert_eq!(broker.placed()[0].stake, dec!(10000));

    let bad = ConfigUpdate {
        oversold_level: Some(80.0),
        ..Default::default()
    };
    let (rejected, _) = tokio::join!(handle.update_config(bad), sched.tick());
    assert!(rejected.is_err());
    assert_eq!(sched.config().strategy.oversold_level, 35.0);
}

#[tokio::test]
async fn open_orders_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let broker = Arc::new(ScriptedBroker::new(dec!(100000), &["EURUSD-OTC"]));
    let clock = Arc::new(ManualClock::new(at(2026, 3, 10, 12, 0)));

    let mut first = scheduler(config.clone(), &broker, &clock).await;
    assert_eq!(first.tick().await.placed, 1);
    drop(first);

    let mut second = scheduler(config, &broker, &clock).await;
    assert_eq!(second.orders().len(), 1);
    assert!(second.state().pair("EURUSD").unwrap().last_signal_time.is_some());

    broker.set_balance(dec!(80000));
    clock.advance(Duration::minutes(5) + Duration::seconds(15));
    let report = second.tick().await;
    assert_eq!(report.resolved, 1);
    assert_eq!(second.state().pair("EURUSD").unwrap().losses, 1);
    assert_eq!(broker.placed().len(), 1);
}
