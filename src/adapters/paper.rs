//! In-process simulated broker
//!
//! Prices follow a seeded random walk per asset. Contracts settle on the
//! first broker call after their expiry; results are then visible through
//! the ledger, the push buffer and the result query, like a live broker.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::{Clock, Direction};
use crate::error::{BotError, Result};
use crate::exchange::payload::win_payoff;
use crate::exchange::{AccountKind, BrokerClient};

const MAX_HISTORY: usize = 500;
const PUSH_BUFFER_LEN: usize = 50;
const LEDGER_LEN: usize = 500;
const STEP_VOLATILITY: f64 = 0.0008;

#[derive(Debug)]
struct PaperContract {
    asset: String,
    direction: Direction,
    stake: Decimal,
    entry_price: f64,
    expiry: DateTime<Utc>,
}

#[derive(Debug)]
struct PaperBook {
    connected: bool,
    account: AccountKind,
    balance: Decimal,
    history: HashMap<String, VecDeque<f64>>,
    open: HashMap<u64, PaperContract>,
    /// Settled records by id, oldest evicted first
    ledger: BTreeMap<u64, Value>,
    push_buffer: VecDeque<Value>,
    next_id: u64,
    rng: StdRng,
}

impl PaperBook {
    fn last_price(&mut self, asset: &str) -> f64 {
        if let Some(p) = self.history.get(asset).and_then(|h| h.back()) {
            return *p;
        }
        let start = self.rng.gen_range(0.8..1.6);
        self.history
            .entry(asset.to_string())
            .or_default()
            .push_back(start);
        start
    }

    fn step(&mut self, asset: &str) -> f64 {
        let last = self.last_price(asset);
        let shock: f64 = self.rng.gen_range(-1.0..1.0);
        let next = (last * (1.0 + STEP_VOLATILITY * shock)).max(f64::EPSILON);
        let history = self.history.entry(asset.to_string()).or_default();
        history.push_back(next);
        while history.len() > MAX_HISTORY {
            history.pop_front();
        }
        next
    }

    fn settle_due(&mut self, now: DateTime<Utc>, payout_pct: Decimal) {
        let due: Vec<u64> = self
            .open
            .iter()
            .filter(|(_, c)| c.expiry <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in due {
            let Some(contract) = self.open.remove(&id) else {
                continue;
            };
            let exit = self.step(&contract.asset);
            let (word, returned) = if exit == contract.entry_price {
                ("equal", contract.stake)
            } else {
                let won = match contract.direction {
                    Direction::Call => exit > contract.entry_price,
                    Direction::Put => exit < contract.entry_price,
                };
                if won {
                    ("win", win_payoff(contract.stake, payout_pct))
                } else {
                    ("loose", Decimal::ZERO)
                }
            };

            self.balance += returned;
            self.ledger.insert(
                id,
                json!({"id": id, "result": word, "profit_percent": payout_pct.to_string()}),
            );
            while self.ledger.len() > LEDGER_LEN {
                self.ledger.pop_first();
            }
            self.push_buffer.push_back(
                json!({"id": id, "win": word, "win_amount": returned.to_string()}),
            );
            while self.push_buffer.len() > PUSH_BUFFER_LEN {
                self.push_buffer.pop_front();
            }
            debug!(order_id = id, asset = %contract.asset, result = word, "paper contract settled");
        }
    }
}

/// Simulated broker for dry runs and tests
pub struct PaperBroker {
    clock: Arc<dyn Clock>,
    assets: Vec<String>,
    payout_pct: Decimal,
    book: Mutex<PaperBook>,
}

impl PaperBroker {
    pub fn new(
        balance: Decimal,
        assets: Vec<String>,
        payout_pct: Decimal,
        seed: u64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            clock,
            assets,
            payout_pct,
            book: Mutex::new(PaperBook {
                connected: false,
                account: AccountKind::Practice,
                balance,
                history: HashMap::new(),
                open: HashMap::new(),
                ledger: BTreeMap::new(),
                push_buffer: VecDeque::new(),
                next_id: 1,
                rng: StdRng::seed_from_u64(seed),
            }),
        }
    }

    pub async fn account(&self) -> AccountKind {
        self.book.lock().await.account
    }

    /// Open contracts not yet settled
    pub async fn open_contracts(&self) -> usize {
        self.book.lock().await.open.len()
    }

    async fn connected_book(&self) -> Result<tokio::sync::MutexGuard<'_, PaperBook>> {
        let mut book = self.book.lock().await;
        if !book.connected {
            return Err(BotError::Connection("paper broker not connected".to_string()));
        }
        book.settle_due(self.clock.now(), self.payout_pct);
        Ok(book)
    }
}

#[async_trait]
impl BrokerClient for PaperBroker {
    async fn connect(&self) -> Result<()> {
        self.book.lock().await.connected = true;
        info!(assets = self.assets.len(), "paper broker connected");
        Ok(())
    }

    async fn balance(&self) -> Result<Decimal> {
        Ok(self.connected_book().await?.balance)
    }

    async fn select_account(&self, kind: AccountKind) -> Result<()> {
        let mut book = self.connected_book().await?;
        book.account = kind;
        info!(account = %kind, "paper account selected");
        Ok(())
    }

    async fn place_order(
        &self,
        stake: Decimal,
        asset: &str,
        direction: Direction,
        duration_minutes: u32,
    ) -> Result<String> {
        let mut book = self.connected_book().await?;
        if !self.assets.iter().any(|a| a == asset) {
            return Err(BotError::OrderRejected(format!("{asset} is not tradable")));
        }
        if stake <= Decimal::ZERO || stake > book.balance {
            return Err(BotError::OrderRejected(format!(
                "stake {stake} not covered by balance {}",
                book.balance
            )));
        }

        let entry_price = book.last_price(asset);
        let id = book.next_id;
        book.next_id += 1;
        book.balance -= stake;
        book.open.insert(
            id,
            PaperContract {
                asset: asset.to_string(),
                direction,
                stake,
                entry_price,
                expiry: self.clock.now() + Duration::minutes(i64::from(duration_minutes)),
            },
        );
        Ok(id.to_string())
    }

    async fn tradable_instruments(&self) -> Result<HashMap<String, bool>> {
        let _book = self.connected_book().await?;
        Ok(self.assets.iter().map(|a| (a.clone(), true)).collect())
    }

    async fn recent_closes(
        &self,
        asset: &str,
        _timeframe_secs: u64,
        count: usize,
    ) -> Result<Vec<f64>> {
        let mut book = self.connected_book().await?;
        let have = book.history.get(asset).map_or(0, VecDeque::len);
        // Warm up a fresh asset, then advance one candle per request
        for _ in have..count.min(MAX_HISTORY) {
            book.step(asset);
        }
        book.step(asset);

        let history = book
            .history
            .get(asset)
            .ok_or_else(|| BotError::InvalidMarketData(format!("no history for {asset}")))?;
        let skip = history.len().saturating_sub(count);
        Ok(history.iter().skip(skip).copied().collect())
    }

    async fn ledger_record(&self, order_id: &str) -> Result<Option<Value>> {
        let book = self.connected_book().await?;
        Ok(order_id
            .parse::<u64>()
            .ok()
            .and_then(|id| book.ledger.get(&id).cloned()))
    }

    async fn push_updates(&self) -> Result<Value> {
        let book = self.connected_book().await?;
        Ok(json!({"option-closed": book.push_buffer.iter().cloned().collect::<Vec<_>>()}))
    }

    async fn order_result(&self, order_id: &str) -> Result<Option<Value>> {
        Ok(self
            .ledger_record(order_id)
            .await?
            .map(|record| json!({"msg": record})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ManualClock;
    use crate::exchange::payload::decode_ledger_record;
    use rust_decimal_macros::dec;

    fn paper(clock: Arc<ManualClock>) -> PaperBroker {
        PaperBroker::new(
            dec!(100000),
            vec!["EURUSD-OTC".to_string()],
            dec!(85),
            7,
            clock,
        )
    }

    #[tokio::test]
    async fn test_calls_fail_before_connect() {
        let broker = paper(Arc::new(ManualClock::new(Utc::now())));
        assert!(matches!(broker.balance().await, Err(BotError::Connection(_))));
        broker.connect().await.unwrap();
        assert_eq!(broker.balance().await.unwrap(), dec!(100000));
        broker.select_account(AccountKind::Real).await.unwrap();
        assert_eq!(broker.account().await, AccountKind::Real);
    }

    #[tokio::test]
    async fn test_closes_have_requested_length() {
        let broker = paper(Arc::new(ManualClock::new(Utc::now())));
        broker.connect().await.unwrap();
        let closes = broker.recent_closes("EURUSD-OTC", 300, 100).await.unwrap();
        assert_eq!(closes.len(), 100);
        assert!(closes.iter().all(|c| c.is_finite() && *c > 0.0));
        let next = broker.recent_closes("EURUSD-OTC", 300, 100).await.unwrap();
        assert_eq!(next[..99], closes[1..]);
    }

    #[tokio::test]
    async fn test_contract_settles_after_expiry() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let broker = paper(clock.clone());
        broker.connect().await.unwrap();

        let id = broker
            .place_order(dec!(5000), "EURUSD-OTC", Direction::Call, 5)
            .await
            .unwrap();
        assert_eq!(broker.balance().await.unwrap(), dec!(95000));
        assert!(broker.ledger_record(&id).await.unwrap().is_none());

        clock.advance(Duration::minutes(5));
        let record = broker.ledger_record(&id).await.unwrap().unwrap();
        let settlement = decode_ledger_record(&record, dec!(5000), dec!(85)).unwrap();
        let balance = broker.balance().await.unwrap();
        assert_eq!(balance, dec!(95000) + settlement.payoff);
        assert_eq!(broker.open_contracts().await, 0);
    }

    #[tokio::test]
    async fn test_ledger_keeps_only_recent_records() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let broker = paper(clock.clone());
        broker.connect().await.unwrap();

        let mut ids = Vec::new();
        for _ in 0..LEDGER_LEN + 10 {
            ids.push(
                broker
                    .place_order(dec!(1), "EURUSD-OTC", Direction::Put, 1)
                    .await
                    .unwrap(),
            );
        }
        clock.advance(Duration::minutes(1));

        let newest = ids.last().unwrap();
        assert!(broker.ledger_record(newest).await.unwrap().is_some());
        assert!(broker.ledger_record(&ids[9]).await.unwrap().is_none());
        assert!(broker.ledger_record(&ids[10]).await.unwrap().is_some());
        assert_eq!(broker.book.lock().await.ledger.len(), LEDGER_LEN);
    }

    #[tokio::test]
    async fn test_rejects_unknown_asset_and_oversized_stake() {
        let broker = paper(Arc::new(ManualClock::new(Utc::now())));
        broker.connect().await.unwrap();
        assert!(broker
            .place_order(dec!(10), "XAUUSD", Direction::Put, 5)
            .await
            .is_err());
        assert!(broker
            .place_order(dec!(200000), "EURUSD-OTC", Direction::Put, 5)
            .await
            .is_err());
    }
}
