//! Final dataset assembly: base records plus every feature, relevance-filtered.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::feature::{FeatureKind, FeatureValue};
use crate::record::Record;
use crate::store::FeatureTable;

pub type DatasetRow = Map<String, Value>;

fn index(table: &FeatureTable) -> HashMap<&str, &FeatureValue> {
    let mut map = HashMap::with_capacity(table.len());
    for row in &table.rows {
        map.entry(row.record_id.as_str()).or_insert(&row.value);
    }
    map
}

/// Left-join every table onto `base` by `record_id`. Each row holds the
/// record's fields followed by one column per table, null where the table
/// has no value for the record.
pub fn join_features(base: &[Record], tables: &[FeatureTable]) -> Vec<DatasetRow> {
    let indexes: Vec<(FeatureKind, HashMap<&str, &FeatureValue>)> =
        tables.iter().map(|t| (t.feature, index(t))).collect();

    base.iter()
        .map(|record| {
            let mut row = match serde_json::to_value(record) {
                Ok(Value::Object(map)) => map,
                _ => DatasetRow::new(),
            };
            for (feature, values) in &indexes {
                let value = values
                    .get(record.record_id.as_str())
                    .map(|v| v.to_json())
                    .unwrap_or(Value::Null);
                row.insert(feature.name().to_string(), value);
            }
            row
        })
        .collect()
}

/// Join, then keep rows whose `relevance` value is numerically at least
/// `cutoff`. Missing and categorical values never pass.
pub fn assemble(
    base: &[Record],
    tables: &[FeatureTable],
    relevance: FeatureKind,
    cutoff: f64,
) -> Vec<DatasetRow> {
    let relevance_values = tables
        .iter()
        .find(|t| t.feature == relevance)
        .map(index)
        .unwrap_or_default();

    let kept: Vec<Record> = base
        .iter()
        .filter(|record| {
            relevance_values
                .get(record.record_id.as_str())
                .and_then(|v| v.as_f64())
                .is_some_and(|v| v >= cutoff)
        })
        .cloned()
        .collect();

    join_features(&kept, tables)
}
