use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

/// One `{cargo_type, rate}` entry of a bulk tariff upload.
#[derive(Debug, Clone, Deserialize)]
pub struct CargoRate {
    pub cargo_type: Option<String>,
    pub rate: Option<f64>,
}

/// Bulk upload body: rates grouped by the date they apply from.
pub type RatesByDate = BTreeMap<String, Vec<CargoRate>>;

/// Flattens a bulk upload into one insertable object per rate.
pub fn expand_rates(rates: RatesByDate) -> Vec<Map<String, Value>> {
    rates
        .into_iter()
        .flat_map(|(date, entries)| {
            entries.into_iter().map(move |entry| {
                let mut object = Map::new();
                object.insert("date".to_string(), Value::String(date.clone()));
                if let Some(cargo_type) = entry.cargo_type {
                    object.insert("cargo_type".to_string(), Value::String(cargo_type));
                }
                if let Some(rate) = entry.rate {
                    object.insert("rate".to_string(), Value::from(rate));
                }
                object
            })
        })
        .collect()
}

/// Adds the declared cargo value and the insurance price (`cost * rate`).
pub fn with_cost(mut row: Value, cost: f64) -> Value {
    if let Value::Object(object) = &mut row {
        let full_cost = object.get("rate").and_then(Value::as_f64).map(|rate| cost * rate);
        object.insert("cost".to_string(), Value::from(cost));
        object.insert("full_cost".to_string(), full_cost.map(Value::from).unwrap_or(Value::Null));
    }
    row
}
