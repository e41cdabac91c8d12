use discourse_features::feature::{FeatureKind, FeatureValue};
use discourse_features::labeled::LabeledSample;
use discourse_features::StoreError;
use serde_json::json;
use tempfile::tempdir;

#[test]
fn hand_edited_file_keeps_columns_and_skips_bad_labels() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("train_sample.json");
    let raw = json!([
        {
            "record_id": 101,
            "post_title": "Border crossing reopens",
            "comment_body": "finally some good news",
            "labeler_note": "easy one",
            "text_content": "exported before the title was fixed",
            "political_stance": 3,
            "discourse_tone": "civil"
        },
        {
            "record_id": "c2",
            "comment_body": "whatever",
            "political_stance": "not sure",
            "discourse_tone": null
        }
    ]);
    std::fs::write(&path, serde_json::to_vec_pretty(&raw).unwrap()).unwrap();

    let sample = LabeledSample::load(&path).unwrap();
    assert_eq!(sample.record_ids().collect::<Vec<_>>(), vec!["101", "c2"]);

    let stance = sample.labeled_for(FeatureKind::PoliticalStance);
    assert_eq!(stance.len(), 1);
    assert_eq!(stance[0].value, FeatureValue::Ordinal(3));
    assert!(stance[0].text.starts_with("Post Title:\n\nBorder crossing reopens"));
    assert!(stance[0].text.ends_with("finally some good news"));
    assert_eq!(sample.labeled_for(FeatureKind::DiscourseTone).len(), 1);

    sample.save(&path).unwrap();
    let again = LabeledSample::load(&path).unwrap();
    assert_eq!(again, sample);

    // Saving writes back every original column value untouched.
    let on_disk: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(on_disk, raw);
    assert_eq!(on_disk[0]["record_id"], json!(101));
}

#[test]
fn missing_or_malformed_files_are_errors() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("nope.json");
    assert!(matches!(
        LabeledSample::load(&missing),
        Err(StoreError::Missing(_))
    ));

    let bad = dir.path().join("bad.json");
    std::fs::write(&bad, r#"[{"comment_body": "no id"}]"#).unwrap();
    assert!(matches!(
        LabeledSample::load(&bad),
        Err(StoreError::Malformed { .. })
    ));
}
