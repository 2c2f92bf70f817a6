use rust_decimal::Decimal;
use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Sparse `threshold -> rate` table.
///
/// Used for progressive income bands (threshold is income) and for age keyed
/// tables such as minimum drawdown rates (threshold is an age). In JSON it is
/// an object whose keys are the thresholds, e.g. `{"0": 0.2, "42000": 0.4}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bands(BTreeMap<Decimal, Decimal>);

impl Bands {
    pub fn new<I>(bands: I) -> Self
    where
        I: IntoIterator<Item = (Decimal, Decimal)>,
    {
        Bands(
            bands
                .into_iter()
                .map(|(threshold, rate)| (threshold.normalize(), rate))
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Decimal, &Decimal)> {
        self.0.iter()
    }

    /// Rate of the highest threshold at or below `key`, falling back to the
    /// lowest band when `key` is below every threshold.
    pub fn lookup(&self, key: Decimal) -> Option<Decimal> {
        self.0
            .range(..=key)
            .next_back()
            .or_else(|| self.0.iter().next())
            .map(|(_, rate)| *rate)
    }

    pub fn lookup_age(&self, age: u32) -> Option<Decimal> {
        self.lookup(Decimal::from(age))
    }

    /// Thresholds above zero shifted by `limit_shift`, then every threshold
    /// scaled by `factor`, sorted ascending.
    pub fn adjusted(&self, limit_shift: Decimal, factor: Decimal) -> Vec<(Decimal, Decimal)> {
        let mut adjusted: Vec<_> = self
            .0
            .iter()
            .map(|(threshold, rate)| {
                let shifted = if *threshold > Decimal::ZERO {
                    *threshold + limit_shift
                } else {
                    *threshold
                };
                (shifted * factor, *rate)
            })
            .collect();
        adjusted.sort_by(|a, b| a.0.cmp(&b.0));
        adjusted
    }
}

/// Tax due on `income` under progressive `bands`.
///
/// `factor` is the combined inflation adjustment and multiplier applied to
/// the thresholds after positive thresholds are shifted by `limit_shift`.
pub fn progressive_tax(
    bands: &Bands,
    income: Decimal,
    factor: Decimal,
    limit_shift: Decimal,
) -> Decimal {
    if income <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let adjusted = bands.adjusted(limit_shift, factor);
    let mut tax = Decimal::ZERO;
    for (i, (threshold, rate)) in adjusted.iter().enumerate() {
        let upper = match adjusted.get(i + 1) {
            Some((next, _)) => income.min(*next),
            None => income,
        };
        let slice = (upper - *threshold).max(Decimal::ZERO);
        tax += slice * *rate;
    }
    tax
}

impl Serialize for Bands {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let map: BTreeMap<String, Decimal> = self
            .0
            .iter()
            .map(|(threshold, rate)| (threshold.to_string(), *rate))
            .collect();
        map.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Bands {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Decimal>::deserialize(deserializer)?;
        let mut bands = BTreeMap::new();
        for (key, rate) in raw {
            let threshold = Decimal::from_str(key.trim()).map_err(|e| {
                serde::de::Error::custom(format!("invalid band threshold '{key}': {e}"))
            })?;
            bands.insert(threshold.normalize(), rate);
        }
        Ok(Bands(bands))
    }
}

impl JsonSchema for Bands {
    fn schema_name() -> String {
        "Bands".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        <BTreeMap<String, f64>>::json_schema(gen)
    }
}
