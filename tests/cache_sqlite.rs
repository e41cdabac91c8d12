use discourse_features::cache::{CachedScore, ScoreCacheKey, SqliteScoreCache};
use discourse_features::ScoreCache;
use tempfile::tempdir;

#[derive(Debug, serde::Deserialize)]
struct ExportRow {
    key_hash: String,
    feature: String,
    response_json: String,
    hit_count: i64,
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
    provider_cost_nanodollars: Option<i64>,
}

fn key(content: &str) -> ScoreCacheKey {
    ScoreCacheKey::new(
        "openai/gpt-4o-mini",
        "political_stance",
        "template_hash",
        "calibration_hash",
        content,
    )
}

fn score(json: &str) -> CachedScore {
    CachedScore {
        response_json: json.to_string(),
        input_tokens: Some(10),
        output_tokens: Some(5),
        provider_cost_nanodollars: Some(123),
    }
}

fn read_export(path: &std::path::Path) -> Vec<ExportRow> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn sqlite_cache_put_get_and_export_increments_hit_count() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("cache").join("scores.sqlite");
    let cache = SqliteScoreCache::new(&db_path).unwrap();

    let k = key("Comment Body:\n\nstop the shelling");
    assert!(cache.get(&k).await.unwrap().is_none());
    cache.put(&k, &score(r#"{"political_stance": 3}"#)).await.unwrap();

    let hit = cache.get(&k).await.unwrap().unwrap();
    assert_eq!(hit, score(r#"{"political_stance": 3}"#));
    let _ = cache.get(&k).await.unwrap().unwrap();

    let export_path = dir.path().join("export.jsonl");
    assert_eq!(cache.export_jsonl(&export_path).await.unwrap(), 1);
    let rows = read_export(&export_path);
    let row = rows.into_iter().find(|r| r.key_hash == k.key_hash).unwrap();
    assert_eq!(row.hit_count, 2);
    assert_eq!(row.feature, "political_stance");
    assert_eq!(row.response_json, r#"{"political_stance": 3}"#);
    assert_eq!(row.input_tokens, Some(10));
    assert_eq!(row.output_tokens, Some(5));
    assert_eq!(row.provider_cost_nanodollars, Some(123));
}

#[tokio::test]
async fn sqlite_cache_put_overwrites_same_key() {
    let dir = tempdir().unwrap();
    let cache = SqliteScoreCache::new(dir.path().join("scores.sqlite")).unwrap();
    let k = key("same text");

    cache.put(&k, &score(r#"{"political_stance": 1}"#)).await.unwrap();
    cache.put(&k, &score(r#"{"political_stance": 2}"#)).await.unwrap();
    let hit = cache.get(&k).await.unwrap().unwrap();
    assert_eq!(hit.response_json, r#"{"political_stance": 2}"#);
}

#[tokio::test]
async fn sqlite_cache_prune_max_rows_keeps_most_recent() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("scores.sqlite");
    let cache = SqliteScoreCache::new(&db_path).unwrap();

    let old_key = key("older comment");
    let new_key = key("newer comment");
    cache.put(&old_key, &score("{}")).await.unwrap();
    cache.put(&new_key, &score("{}")).await.unwrap();

    // Make the "old" row deterministically older so prune ordering is stable.
    let conn = rusqlite::Connection::open(&db_path).unwrap();
    conn.execute(
        "UPDATE score_cache SET updated_at = 0 WHERE key_hash = ?1",
        rusqlite::params![old_key.key_hash],
    )
    .unwrap();

    let stats = cache.prune(None, Some(1)).await.unwrap();
    assert_eq!(stats.remaining, 1);
    assert_eq!(stats.deleted, 1);

    let export_path = dir.path().join("export.jsonl");
    cache.export_jsonl(&export_path).await.unwrap();
    let rows = read_export(&export_path);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key_hash, new_key.key_hash);
}

#[tokio::test]
async fn sqlite_cache_prune_by_age_drops_stale_rows() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("scores.sqlite");
    let cache = SqliteScoreCache::new(&db_path).unwrap();

    let stale = key("stale");
    let fresh = key("fresh");
    cache.put(&stale, &score("{}")).await.unwrap();
    cache.put(&fresh, &score("{}")).await.unwrap();

    let conn = rusqlite::Connection::open(&db_path).unwrap();
    conn.execute(
        "UPDATE score_cache SET updated_at = 0 WHERE key_hash = ?1",
        rusqlite::params![stale.key_hash],
    )
    .unwrap();

    let stats = cache.prune(Some(30), None).await.unwrap();
    assert_eq!(stats.deleted, 1);
    assert_eq!(stats.remaining, 1);
    assert!(cache.get(&stale).await.unwrap().is_none());
    assert!(cache.get(&fresh).await.unwrap().is_some());
}
