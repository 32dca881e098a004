use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::config::InstrumentConfig;
use crate::domain::base_pair;

/// Configured pairs mapped to the broker asset currently used for each.
///
/// A pair can be listed by the broker under several names ("EURUSD",
/// "EURUSD-OTC", "EURUSD-op"); the first open one in suffix order wins, with
/// the priority suffix tried before the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstrumentUniverse {
    assets: BTreeMap<String, String>,
}

impl InstrumentUniverse {
    /// Rebuild from the broker's tradable map
    pub fn resolve(config: &InstrumentConfig, tradable: &HashMap<String, bool>) -> Self {
        let suffixes = suffix_order(config);

        // Index open assets by their base pair
        let mut open_by_pair: HashMap<&str, Vec<&str>> = HashMap::new();
        for (asset, open) in tradable {
            if *open {
                open_by_pair
                    .entry(base_pair(asset, &config.allowed_suffixes))
                    .or_default()
                    .push(asset.as_str());
            }
        }

        let mut assets = BTreeMap::new();
        for pair in &config.pairs {
            let Some(candidates) = open_by_pair.get(pair.as_str()) else {
                debug!(pair = %pair, "no open asset for pair");
                continue;
            };
            let chosen = suffixes
                .iter()
                .map(|suffix| format!("{pair}{suffix}"))
                .find(|asset| candidates.contains(&asset.as_str()));
            if let Some(asset) = chosen {
                assets.insert(pair.clone(), asset);
            }
        }

        info!(
            valid = assets.len(),
            configured = config.pairs.len(),
            "instrument universe refreshed"
        );
        Self { assets }
    }

    /// Broker asset for a configured pair
    pub fn asset(&self, pair: &str) -> Option<&str> {
        self.assets.get(pair).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.assets.iter().map(|(p, a)| (p.as_str(), a.as_str()))
    }

    /// Tradable broker asset names
    pub fn valid_assets(&self) -> Vec<String> {
        self.assets.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

fn suffix_order(config: &InstrumentConfig) -> Vec<&str> {
    let mut order: Vec<&str> = Vec::with_capacity(config.allowed_suffixes.len() + 1);
    if let Some(priority) = config.priority_suffix.as_deref() {
        order.push(priority);
    }
    for suffix in &config.allowed_suffixes {
        if !order.contains(&suffix.as_str()) {
            order.push(suffix.as_str());
        }
    }
    order
}
