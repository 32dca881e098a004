#![allow(dead_code)]

use async_trait::async_trait;
use binopt::config::AppConfig;
use binopt::domain::Direction;
use binopt::exchange::{AccountKind, BrokerClient};
use binopt::{BotError, Result};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// One order the broker accepted
#[derive(Debug, Clone)]
pub struct Placed {
    pub id: String,
    pub asset: String,
    pub stake: Decimal,
    pub direction: Direction,
}

#[derive(Debug, Default)]
struct Script {
    balance: Decimal,
    closes: Vec<f64>,
    tradable: HashMap<String, bool>,
    ledger: HashMap<String, Value>,
    /// Ledger result written for every new order, e.g. "loose"
    auto_result: Option<String>,
    hang_closes: bool,
    next_id: u64,
    placed: Vec<Placed>,
    connects: u32,
}

/// Broker whose answers are set by the test
#[derive(Debug)]
pub struct ScriptedBroker {
    script: Mutex<Script>,
}

impl ScriptedBroker {
    pub fn new(balance: Decimal, assets: &[&str]) -> Self {
        Self {
            script: Mutex::new(Script {
                balance,
                closes: rising_closes(100),
                tradable: assets.iter().map(|a| (a.to_string(), true)).collect(),
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    pub fn set_balance(&self, balance: Decimal) {
        self.script.lock().unwrap().balance = balance;
    }

    pub fn set_closes(&self, closes: Vec<f64>) {
        self.script.lock().unwrap().closes = closes;
    }

    pub fn settle_every_order_as(&self, result: &str) {
        self.script.lock().unwrap().auto_result = Some(result.to_string());
    }

    pub fn hang_on_closes(&self) {
        self.script.lock().unwrap().hang_closes = true;
    }

    pub fn placed(&self) -> Vec<Placed> {
        self.script.lock().unwrap().placed.clone()
    }

    pub fn connects(&self) -> u32 {
        self.script.lock().unwrap().connects
    }
}

#[async_trait]
impl BrokerClient for ScriptedBroker {
    async fn connect(&self) -> Result<()> {
        self.script.lock().unwrap().connects += 1;
        Ok(())
    }

    async fn balance(&self) -> Result<Decimal> {
        Ok(self.script.lock().unwrap().balance)
    }

    async fn select_account(&self, _kind: AccountKind) -> Result<()> {
        Ok(())
    }

    async fn place_order(
        &self,
        stake: Decimal,
        asset: &str,
        direction: Direction,
        _duration_minutes: u32,
    ) -> Result<String> {
        let mut script = self.script.lock().unwrap();
        if !script.tradable.get(asset).copied().unwrap_or(false) {
            return Err(BotError::OrderRejected(format!("{asset} closed")));
        }
        let id = script.next_id.to_string();
        script.next_id += 1;
        if let Some(result) = script.auto_result.clone() {
            script
                .ledger
                .insert(id.clone(), json!({"id": id, "result": result, "profit_percent": 85}));
        }
        script.placed.push(Placed {
            id: id.clone(),
            asset: asset.to_string(),
            stake,
            direction,
        });
        Ok(id)
    }

    async fn tradable_instruments(&self) -> Result<HashMap<String, bool>> {
        Ok(self.script.lock().unwrap().tradable.clone())
    }

    async fn recent_closes(
        &self,
        _asset: &str,
        _timeframe_secs: u64,
        count: usize,
    ) -> Result<Vec<f64>> {
        let (hang, closes) = {
            let script = self.script.lock().unwrap();
            (script.hang_closes, script.closes.clone())
        };
        if hang {
            std::future::pending::<()>().await;
        }
        let skip = closes.len().saturating_sub(count);
        Ok(closes.into_iter().skip(skip).collect())
    }

    async fn ledger_record(&self, order_id: &str) -> Result<Option<Value>> {
        Ok(self.script.lock().unwrap().ledger.get(order_id).cloned())
    }

    async fn push_updates(&self) -> Result<Value> {
        Ok(json!({"option-closed": []}))
    }

    async fn order_result(&self, _order_id: &str) -> Result<Option<Value>> {
        Ok(None)
    }
}

/// Strictly rising series: RSI 100, so every evaluation is a call
pub fn rising_closes(n: usize) -> Vec<f64> {
    (0..n).map(|i| 1.0 + i as f64 * 0.001).collect()
}

/// One pair, 20% stakes capped at 20000, state file under `dir`
pub fn test_config(dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.instruments.pairs = vec!["EURUSD".to_string()];
    config.risk.position_size_pct = dec!(0.2);
    config.risk.min_position_size = dec!(5000);
    config.risk.max_position_size = dec!(20000);
    config.persistence.state_file = dir.join("state.json");
    config
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}
