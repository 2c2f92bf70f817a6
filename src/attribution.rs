//! Named running totals broken down by source, used to trace which income
//! source contributed how much to a tax line.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

/// A running total with a per-source breakdown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Attribution {
    name: String,
    sources: BTreeMap<String, Decimal>,
}

impl Attribution {
    pub fn new(name: &str) -> Self {
        Attribution {
            name: name.to_string(),
            sources: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, source: &str, amount: Decimal) {
        *self
            .sources
            .entry(source.to_string())
            .or_insert(Decimal::ZERO) += amount;
    }

    /// Add every source of `other` into this attribution
    pub fn merge(&mut self, other: &Attribution) {
        for (source, amount) in &other.sources {
            self.add(source, *amount);
        }
    }

    /// Copy with every source multiplied by `factor`
    pub fn scaled(&self, factor: Decimal) -> Attribution {
        Attribution {
            name: self.name.clone(),
            sources: self
                .sources
                .iter()
                .map(|(source, amount)| (source.clone(), *amount * factor))
                .collect(),
        }
    }

    pub fn total(&self) -> Decimal {
        self.sources.values().copied().sum()
    }

    pub fn breakdown(&self) -> &BTreeMap<String, Decimal> {
        &self.sources
    }

    /// Split `amount` across the sources in proportion to each source's share
    /// of the total. A zero total yields no shares.
    pub fn apportion(&self, amount: Decimal) -> Vec<(String, Decimal)> {
        let total = self.total();
        if total.is_zero() {
            return Vec::new();
        }
        self.sources
            .iter()
            .map(|(source, value)| (source.clone(), amount * *value / total))
            .collect()
    }
}

/// Sink collecting attributions by key. A detached manager drops every write.
#[derive(Debug, Clone, Default)]
pub struct AttributionManager {
    attributions: BTreeMap<String, Attribution>,
    detached: bool,
}

impl AttributionManager {
    pub fn new() -> Self {
        AttributionManager::default()
    }

    pub fn detached() -> Self {
        AttributionManager {
            attributions: BTreeMap::new(),
            detached: true,
        }
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn record(&mut self, key: &str, source: &str, amount: Decimal) {
        if self.is_detached() {
            return;
        }
        self.attributions
            .entry(key.to_string())
            .or_insert_with(|| Attribution::new(key))
            .add(source, amount);
    }

    pub fn get(&self, key: &str) -> Option<&Attribution> {
        self.attributions.get(key)
    }

    pub fn total(&self, key: &str) -> Decimal {
        self.get(key).map_or(Decimal::ZERO, Attribution::total)
    }

    pub fn remove(&mut self, key: &str) {
        self.attributions.remove(key);
    }

    pub fn remove_prefixed(&mut self, prefix: &str) {
        self.attributions.retain(|key, _| !key.starts_with(prefix));
    }

    pub fn clear(&mut self) {
        self.attributions.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Attribution)> {
        self.attributions.iter()
    }
}
