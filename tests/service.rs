mod common;

use binopt::adapters::PaperBroker;
use binopt::coordinator::{BotService, BotStatus, SchedulerLoop, StopOutcome};
use binopt::domain::{Clock, ManualClock};
use binopt::persistence::StateStore;
use chrono::Duration as ChronoDuration;
use common::{at, test_config, ScriptedBroker};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn stop_joins_an_idle_loop_and_writes_a_final_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let state_file = config.persistence.state_file.clone();
    let broker = Arc::new(ScriptedBroker::new(dec!(100000), &["EURUSD-OTC"]));
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(at(2026, 3, 10, 12, 0)));

    let mut service = BotService::start(config, broker.clone(), clock).await.unwrap();
    let mut status = service.handle().subscribe();
    status
        .wait_for(|s| s.total_trades == 0 && !s.open_orders.is_empty())
        .await
        .unwrap();
    assert!(service.is_running());

    assert_eq!(service.stop().await, StopOutcome::Stopped);
    assert!(!service.is_running());
    assert_eq!(service.snapshot().status, BotStatus::Stopped);
    assert_eq!(service.stop().await, StopOutcome::NotRunning);

    let persisted = StateStore::new(state_file).read().await.unwrap().unwrap();
    assert_eq!(persisted.open_orders.len(), 1);
    assert_eq!(broker.placed().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_reports_requested_while_a_broker_call_hangs() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.broker.api_timeout_secs = 15;
    config.scheduler.stop_join_timeout_secs = 10;
    let broker = Arc::new(ScriptedBroker::new(dec!(100000), &["EURUSD-OTC"]));
    broker.hang_on_closes();
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(at(2026, 3, 10, 12, 0)));

    let scheduler = SchedulerLoop::bootstrap(config, broker.clone(), clock)
        .await
        .unwrap();
    let mut service = BotService::spawn(scheduler);

    // Let the loop enter the hanging candle request
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(service.stop().await, StopOutcome::Requested);
    assert_eq!(service.snapshot().status, BotStatus::Running);

    // The broker deadline frees the loop before the second wait runs out
    assert_eq!(service.stop().await, StopOutcome::Stopped);
    assert_eq!(service.snapshot().status, BotStatus::Stopped);
    assert!(broker.placed().is_empty());
}

#[tokio::test]
async fn control_commands_reach_the_running_loop() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.scheduler.poll_interval_secs = 1;
    let broker = Arc::new(ScriptedBroker::new(dec!(100000), &["EURUSD-OTC"]));
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(at(2026, 3, 10, 12, 0)));

    let mut service = BotService::start(config, broker, clock).await.unwrap();
    let handle = service.handle();
    let mut status = handle.subscribe();
    status
        .wait_for(|s| s.valid_pairs == ["EURUSD-OTC"])
        .await
        .unwrap();

    handle
        .update_config(binopt::ConfigUpdate {
            pairs: Some(vec!["gbpusd".to_string()]),
            ..Default::default()
        })
        .await
        .unwrap();
    handle.reset_stop_loss().await.unwrap();

    // GBPUSD has no tradable asset on this broker
    status
        .wait_for(|s| s.valid_pairs.is_empty())
        .await
        .unwrap();

    assert_eq!(service.stop().await, StopOutcome::Stopped);
    assert!(handle.reset_consecutive_losses().await.is_err());
}

#[tokio::test]
async fn paper_session_accounts_every_resolved_order_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.instruments.pairs = vec![
        "EURUSD".to_string(),
        "GBPUSD".to_string(),
        "USDJPY".to_string(),
    ];
    config.strategy.oversold_level = 45.0;
    config.strategy.overbought_level = 55.0;
    config.strategy.min_time_between_signals_mins = 0;
    config.risk.position_size_pct = dec!(0.001);
    config.risk.min_position_size = dec!(100);
    config.risk.max_position_size = dec!(1000);

    let clock = Arc::new(ManualClock::new(at(2026, 3, 10, 8, 0)));
    let assets = config
        .instruments
        .pairs
        .iter()
        .map(|p| format!("{p}-OTC"))
        .collect();
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let broker = Arc::new(PaperBroker::new(
        dec!(1000000),
        assets,
        dec!(85),
        20260310,
        dyn_clock.clone(),
    ));

    let mut sched = SchedulerLoop::bootstrap(config, broker.clone(), dyn_clock)
        .await
        .unwrap();

    let (mut placed, mut resolved) = (0, 0);
    for _ in 0..120 {
        let report = sched.tick().await;
        placed += report.placed;
        resolved += report.resolved;
        clock.advance(ChronoDuration::minutes(1));
    }

    assert!(placed > 0);
    assert!(resolved > 0);
    assert_eq!(placed, resolved + sched.orders().len());

    let state = sched.state();
    let booked: u32 = state.pairs.values().map(|p| p.resolved()).sum();
    assert_eq!(booked as usize, resolved);
    let (wins, losses, ties) = state.totals();
    assert_eq!((wins + losses + ties) as usize, resolved);
    assert!(state.pairs.keys().all(|p| p.len() == 6));
}

#[tokio::test(start_paused = true)]
async fn frozen_session_triggers_a_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.broker.api_timeout_secs = 1;
    config.broker.max_freeze_count = 1;
    let broker = Arc::new(ScriptedBroker::new(dec!(100000), &["EURUSD-OTC"]));
    broker.hang_on_closes();
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(at(2026, 3, 10, 12, 0)));

    let mut sched = SchedulerLoop::bootstrap(config, broker.clone(), clock)
        .await
        .unwrap();
    assert_eq!(broker.connects(), 1);

    // One timed-out candle request per tick; the second exceeds the limit
    assert!(!sched.tick().await.reconnected);
    assert!(sched.tick().await.reconnected);
    assert_eq!(broker.connects(), 2);

    // Counter starts over after the reconnect
    assert!(!sched.tick().await.reconnected);
}
