//! Human labeling samples.
//!
//! A sample file is an ordered JSON array of objects. Rows keep every column
//! they were read with, in order and unchanged, so a file exported for
//! labeling and filled in by hand round-trips without losing anything.
//! Normalisation (string ids, recomputed text) happens only where a row is
//! read.

use std::borrow::Cow;
use std::path::Path;

use serde_json::{Map, Value};
use tracing::warn;

use crate::feature::{FeatureKind, FeatureValue};
use crate::oracle::CalibrationExample;
use crate::record::{compose_text_content, Record};
use crate::store::{read_json, write_json_atomic, StoreError};

pub type Row = Map<String, Value>;

/// One row with a usable human label for a feature.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledItem {
    pub record_id: String,
    pub text: String,
    pub value: FeatureValue,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledSample {
    rows: Vec<Row>,
}

impl LabeledSample {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    /// Labeling export: the display columns of each record, in order, then one
    /// null key per feature to label.
    pub fn for_labeling(
        records: &[Record],
        display_columns: &[String],
        features: &[FeatureKind],
    ) -> Self {
        let rows = records
            .iter()
            .map(|record| {
                let full = match serde_json::to_value(record) {
                    Ok(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                let mut row = Row::new();
                for column in display_columns {
                    let value = full.get(column).cloned().unwrap_or(Value::Null);
                    row.insert(column.clone(), value);
                }
                for feature in features {
                    row.insert(feature.name().to_string(), Value::Null);
                }
                row
            })
            .collect();
        Self { rows }
    }

    /// Read a sample file. Every row must be an object with a string or
    /// numeric `record_id`.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let values: Vec<Value> =
            read_json(path)?.ok_or_else(|| StoreError::Missing(path.to_path_buf()))?;
        let malformed = |reason: String| StoreError::Malformed {
            path: path.to_path_buf(),
            reason,
        };

        let mut rows = Vec::with_capacity(values.len());
        for (idx, value) in values.into_iter().enumerate() {
            let Value::Object(row) = value else {
                return Err(malformed(format!("row {idx} is not an object")));
            };
            if record_id(&row).is_none() {
                return Err(malformed(format!("row {idx} has no record_id")));
            }
            rows.push(row);
        }
        Ok(Self { rows })
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        write_json_atomic(path, &self.rows)
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn record_ids(&self) -> impl Iterator<Item = Cow<'_, str>> {
        self.rows.iter().filter_map(record_id)
    }

    /// Set a label by record id. Returns false when the id is not present.
    pub fn set_label(&mut self, id: &str, feature: FeatureKind, value: Value) -> bool {
        match self
            .rows
            .iter_mut()
            .find(|row| record_id(row).as_deref() == Some(id))
        {
            Some(row) => {
                row.insert(feature.name().to_string(), value);
                true
            }
            None => false,
        }
    }

    /// Rows whose label for `feature` is present and coercible.
    pub fn labeled_for(&self, feature: FeatureKind) -> Vec<LabeledItem> {
        self.rows
            .iter()
            .filter_map(|row| {
                let id = record_id(row)?;
                let value = label(row, feature)?;
                Some(LabeledItem {
                    record_id: id.into_owned(),
                    text: text_content(row).map(Cow::into_owned).unwrap_or_default(),
                    value,
                })
            })
            .collect()
    }

    pub fn calibration_examples(&self, feature: FeatureKind) -> Vec<CalibrationExample> {
        self.labeled_for(feature)
            .into_iter()
            .map(|item| CalibrationExample::new(item.text, item.value))
            .collect()
    }
}

/// Row id as text; hand-edited files may carry numeric ids.
pub fn record_id(row: &Row) -> Option<Cow<'_, str>> {
    match row.get("record_id")? {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        _ => None,
    }
}

/// Scored text for a row: composed from the source fields when the row has
/// a comment body, otherwise whatever `text_content` column it carries.
pub fn text_content(row: &Row) -> Option<Cow<'_, str>> {
    let field = |name: &str| row.get(name).and_then(Value::as_str);
    match field("comment_body") {
        Some(comment) => Some(Cow::Owned(compose_text_content(
            field("post_title"),
            field("post_body"),
            comment,
        ))),
        None => field("text_content").map(Cow::Borrowed),
    }
}

/// Human label for `feature`. A non-null label that does not coerce is
/// logged and treated as unlabeled.
pub fn label(row: &Row, feature: FeatureKind) -> Option<FeatureValue> {
    let raw = row.get(feature.name())?;
    if raw.is_null() {
        return None;
    }
    match feature.value_type().coerce(raw) {
        Ok(value) => Some(value),
        Err(err) => {
            let id = record_id(row);
            warn!(
                record_id = id.as_deref().unwrap_or("?"),
                feature = %feature,
                error = %err,
                "ignoring uncoercible human label"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records() -> Vec<Record> {
        (1..=3)
            .map(|i| Record::new(format!("c{i}"), "p1", Some("title".into()), None, format!("comment {i}")))
            .collect()
    }

    fn columns() -> Vec<String> {
        ["record_id", "post_title", "post_body", "comment_body", "text_content"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[test]
    fn export_has_display_columns_then_null_feature_keys() {
        let features = [FeatureKind::PoliticalStance, FeatureKind::Sentiment];
        let sample = LabeledSample::for_labeling(&records(), &columns(), &features);
        assert_eq!(sample.len(), 3);
        for row in sample.rows() {
            let keys: Vec<&str> = row.keys().map(String::as_str).collect();
            assert_eq!(
                keys,
                vec![
                    "record_id",
                    "post_title",
                    "post_body",
                    "comment_body",
                    "text_content",
                    "political_stance",
                    "sentiment_score"
                ]
            );
            assert!(row["political_stance"].is_null());
            assert!(row["sentiment_score"].is_null());
        }
    }

    #[test]
    fn labels_are_coerced_and_bad_labels_are_unlabeled() {
        let mut sample =
            LabeledSample::for_labeling(&records(), &columns(), &[FeatureKind::PoliticalStance]);
        assert!(sample.set_label("c1", FeatureKind::PoliticalStance, json!("4")));
        assert!(sample.set_label("c2", FeatureKind::PoliticalStance, json!("very pro")));
        assert!(!sample.set_label("zz", FeatureKind::PoliticalStance, json!(1)));

        let labeled = sample.labeled_for(FeatureKind::PoliticalStance);
        assert_eq!(labeled.len(), 1);
        assert_eq!(labeled[0].record_id, "c1");
        assert_eq!(labeled[0].value, FeatureValue::Ordinal(4));
        assert!(labeled[0].text.contains("comment 1"));

        let examples = sample.calibration_examples(FeatureKind::PoliticalStance);
        assert_eq!(examples.len(), 1);
        assert!(sample.labeled_for(FeatureKind::Sentiment).is_empty());
    }

    #[test]
    fn load_keeps_columns_verbatim_and_rejects_rows_without_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        std::fs::write(
            &path,
            r#"[{"record_id": 7, "comment_body": "hi", "annotator": "rk", "text_content": "stale"}]"#,
        )
        .unwrap();
        let sample = LabeledSample::load(&path).unwrap();
        let row = &sample.rows()[0];
        assert_eq!(record_id(row).as_deref(), Some("7"));
        assert_eq!(row["record_id"], json!(7));
        assert_eq!(row["annotator"], json!("rk"));
        assert_eq!(row["text_content"], json!("stale"));
        assert_eq!(
            text_content(row).as_deref(),
            Some("Post Title:\n\n\n\nPost Body:\n\n\n\nComment Body:\n\nhi")
        );

        std::fs::write(&path, r#"[{"comment_body": "hi"}]"#).unwrap();
        assert!(matches!(
            LabeledSample::load(&path),
            Err(StoreError::Malformed { .. })
        ));
        assert!(matches!(
            LabeledSample::load(&dir.path().join("absent.json")),
            Err(StoreError::Missing(_))
        ));
    }
}
