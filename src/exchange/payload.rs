//! Defensive decoding of broker settlement payloads
//!
//! Settlement surfaces hand back loosely-typed JSON: ids that are sometimes
//! numbers and sometimes strings, amounts encoded as strings, outcome words
//! with creative spelling. Everything is decoded here into [`Settlement`] so
//! that no business logic ever inspects a raw field.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

use crate::domain::{Outcome, Settlement};
use crate::strategy::resolution::ResolutionStep;

/// Nesting depth searched by the generic interpreter
const MAX_SEARCH_DEPTH: usize = 4;

const OUTCOME_KEYS: [&str; 2] = ["result", "win"];
const AMOUNT_KEYS: [&str; 3] = ["win_amount", "profit_amount", "close_profit"];

/// Read a number that may be encoded as JSON number or numeric string
pub fn decimal_field(obj: &Value, key: &str) -> Option<Decimal> {
    match obj.get(key)? {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else {
                n.as_f64().and_then(Decimal::from_f64)
            }
        }
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn outcome_field(obj: &Value) -> Option<Outcome> {
    OUTCOME_KEYS
        .iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(Outcome::from_broker_str)
        .next()
}

fn amount_field(obj: &Value) -> Option<Decimal> {
    AMOUNT_KEYS.iter().find_map(|k| decimal_field(obj, k))
}

/// Whether a payload item refers to the given order id
pub fn id_matches(item: &Value, order_id: &str) -> bool {
    match item.get("id") {
        Some(Value::String(s)) => s.trim() == order_id,
        Some(Value::Number(n)) => n.to_string() == order_id,
        _ => false,
    }
}

/// Payoff of a winning contract from a payout percentage
pub fn win_payoff(stake: Decimal, payout_pct: Decimal) -> Decimal {
    stake * (Decimal::ONE + payout_pct / Decimal::ONE_HUNDRED)
}

/// Build a settlement from a decoded outcome, preferring broker-reported
/// amounts and falling back to the payout percentage.
fn settle(
    outcome: Outcome,
    obj: &Value,
    stake: Decimal,
    default_payout_pct: Decimal,
    source: ResolutionStep,
) -> Option<Settlement> {
    match outcome {
        Outcome::Win => {
            let payoff = match amount_field(obj) {
                Some(amount) if amount > stake => amount,
                _ => {
                    let pct = decimal_field(obj, "profit_percent").unwrap_or(default_payout_pct);
                    win_payoff(stake, pct)
                }
            };
            Some(Settlement::win(payoff, source))
        }
        Outcome::Loss => {
            let returned = match amount_field(obj) {
                Some(amount) if amount < stake => amount,
                _ => Decimal::ZERO,
            };
            Some(Settlement::loss_returning(returned, source))
        }
        Outcome::Tie => Some(Settlement::tie(stake, source)),
        Outcome::Unknown => {
            amount_field(obj).map(|amount| Settlement::from_amount(stake, amount, source))
        }
    }
}

/// Per-order ledger record: `result` plus an optional `profit_percent`
pub fn decode_ledger_record(
    record: &Value,
    stake: Decimal,
    default_payout_pct: Decimal,
) -> Option<Settlement> {
    let outcome = record
        .get("result")
        .and_then(Value::as_str)
        .map(Outcome::from_broker_str)?;
    if !outcome.is_known() {
        return None;
    }
    let pct = decimal_field(record, "profit_percent").unwrap_or(default_payout_pct);
    match outcome {
        Outcome::Win => Some(Settlement::win(win_payoff(stake, pct), ResolutionStep::Ledger)),
        Outcome::Loss => Some(Settlement::loss(ResolutionStep::Ledger)),
        Outcome::Tie => Some(Settlement::tie(stake, ResolutionStep::Ledger)),
        Outcome::Unknown => None,
    }
}

/// Locate an order in the push-update buffer. The buffer is either a list
/// of items or an object whose values are such lists.
pub fn find_in_push_buffer<'a>(buffer: &'a Value, order_id: &str) -> Option<&'a Value> {
    let scan = |list: &'a Vec<Value>| list.iter().find(|item| id_matches(item, order_id));
    match buffer {
        Value::Array(list) => scan(list),
        Value::Object(map) => map.values().filter_map(Value::as_array).find_map(scan),
        _ => None,
    }
}

/// Push-buffer item: `win` outcome string and `win_amount`
pub fn decode_push_item(
    item: &Value,
    stake: Decimal,
    default_payout_pct: Decimal,
) -> Option<Settlement> {
    let outcome = item
        .get("win")
        .and_then(Value::as_str)
        .map(Outcome::from_broker_str)
        .unwrap_or(Outcome::Unknown);
    settle(outcome, item, stake, default_payout_pct, ResolutionStep::PushFeed)
}

fn find_outcome_object(value: &Value, depth: usize) -> Option<&Value> {
    if depth > MAX_SEARCH_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => {
            if OUTCOME_KEYS.iter().any(|k| map.contains_key(*k))
                || AMOUNT_KEYS.iter().any(|k| map.contains_key(*k))
            {
                return Some(value);
            }
            map.values().find_map(|v| find_outcome_object(v, depth + 1))
        }
        Value::Array(list) => list.iter().find_map(|v| find_outcome_object(v, depth + 1)),
        _ => None,
    }
}

/// Generic interpreter for whatever the order-result query returns.
/// Searches a few levels deep for an outcome word or a returned amount;
/// `None` when nothing usable is present.
pub fn interpret_order_result(
    payload: &Value,
    stake: Decimal,
    default_payout_pct: Decimal,
) -> Option<Settlement> {
    let obj = find_outcome_object(payload, 0)?;
    let outcome = outcome_field(obj).unwrap_or(Outcome::Unknown);
    settle(outcome, obj, stake, default_payout_pct, ResolutionStep::AsyncQuery)
}
