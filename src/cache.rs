//! SQLite-backed cache for oracle scoring responses.

use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Identity of one scoring call. Two calls with the same key would send the
/// same prompt to the same model.
#[derive(Debug, Clone)]
pub struct ScoreCacheKey {
    pub model: String,
    pub feature: String,
    pub template_hash: String,
    pub calibration_hash: String,
    pub content_hash: String,
    pub key_hash: String,
}

impl ScoreCacheKey {
    pub fn new(
        model: &str,
        feature: &str,
        template_hash: &str,
        calibration_hash: &str,
        content: &str,
    ) -> Self {
        let content_hash = hash_text(content);
        let key_hash = hash_fields(&[
            model,
            feature,
            template_hash,
            calibration_hash,
            &content_hash,
        ]);

        Self {
            model: model.to_string(),
            feature: feature.to_string(),
            template_hash: template_hash.to_string(),
            calibration_hash: calibration_hash.to_string(),
            content_hash,
            key_hash,
        }
    }
}

/// A well-formed JSON object returned by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedScore {
    pub response_json: String,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub provider_cost_nanodollars: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache lock poisoned")]
    Poisoned,
    #[error("task join error: {0}")]
    Join(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

#[async_trait]
pub trait ScoreCache: Send + Sync {
    async fn get(&self, key: &ScoreCacheKey) -> Result<Option<CachedScore>, CacheError>;
    async fn put(&self, key: &ScoreCacheKey, value: &CachedScore) -> Result<(), CacheError>;
}

#[derive(Clone)]
pub struct SqliteScoreCache {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteScoreCache {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             CREATE TABLE IF NOT EXISTS score_cache (\
               key_hash TEXT PRIMARY KEY,\
               model TEXT NOT NULL,\
               feature TEXT NOT NULL,\
               template_hash TEXT NOT NULL,\
               calibration_hash TEXT NOT NULL,\
               content_hash TEXT NOT NULL,\
               response_json TEXT NOT NULL,\
               input_tokens INTEGER,\
               output_tokens INTEGER,\
               provider_cost_nanodollars INTEGER,\
               created_at INTEGER NOT NULL,\
               updated_at INTEGER NOT NULL,\
               hit_count INTEGER NOT NULL DEFAULT 0\
             );\
             CREATE INDEX IF NOT EXISTS score_cache_feature ON score_cache(feature);",
        )?;

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, CacheError>
    where
        F: FnOnce(&Connection) -> Result<R, CacheError>,
    {
        let guard = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        f(&guard)
    }
}

#[async_trait]
impl ScoreCache for SqliteScoreCache {
    async fn get(&self, key: &ScoreCacheKey) -> Result<Option<CachedScore>, CacheError> {
        let key_hash = key.key_hash.clone();
        let conn = self.clone();
        tokio::task::spawn_blocking(move || {
            conn.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT response_json, input_tokens, output_tokens, provider_cost_nanodollars \
                     FROM score_cache WHERE key_hash = ?1",
                )?;
                let mut rows = stmt.query(params![key_hash])?;
                if let Some(row) = rows.next()? {
                    let entry = CachedScore {
                        response_json: row.get(0)?,
                        input_tokens: row.get::<_, Option<i64>>(1)?.map(|v| v as u32),
                        output_tokens: row.get::<_, Option<i64>>(2)?.map(|v| v as u32),
                        provider_cost_nanodollars: row.get::<_, Option<i64>>(3)?,
                    };
                    conn.execute(
                        "UPDATE score_cache \
                         SET hit_count = hit_count + 1, updated_at = ?1 \
                         WHERE key_hash = ?2",
                        params![now_epoch(), key_hash],
                    )?;
                    Ok(Some(entry))
                } else {
                    Ok(None)
                }
            })
        })
        .await
        .map_err(|e| CacheError::Join(e.to_string()))?
    }

    async fn put(&self, key: &ScoreCacheKey, value: &CachedScore) -> Result<(), CacheError> {
        let key = key.clone();
        let value = value.clone();
        let conn = self.clone();
        tokio::task::spawn_blocking(move || {
            conn.with_conn(|conn| {
                let now = now_epoch();
                conn.execute(
                    "INSERT INTO score_cache (\
                        key_hash, model, feature, template_hash, calibration_hash, content_hash,\
                        response_json, input_tokens, output_tokens, provider_cost_nanodollars,\
                        created_at, updated_at\
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)\
                     ON CONFLICT(key_hash) DO UPDATE SET\
                        response_json = excluded.response_json,\
                        input_tokens = excluded.input_tokens,\
                        output_tokens = excluded.output_tokens,\
                        provider_cost_nanodollars = excluded.provider_cost_nanodollars,\
                        updated_at = excluded.updated_at",
                    params![
                        key.key_hash,
                        key.model,
                        key.feature,
                        key.template_hash,
                        key.calibration_hash,
                        key.content_hash,
                        value.response_json,
                        value.input_tokens.map(|v| v as i64),
                        value.output_tokens.map(|v| v as i64),
                        value.provider_cost_nanodollars,
                        now,
                        now,
                    ],
                )?;
                Ok(())
            })
        })
        .await
        .map_err(|e| CacheError::Join(e.to_string()))?
    }
}

#[derive(Debug, Serialize)]
pub struct CacheExportRow {
    pub key_hash: String,
    pub model: String,
    pub feature: String,
    pub template_hash: String,
    pub calibration_hash: String,
    pub content_hash: String,
    pub response_json: String,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub provider_cost_nanodollars: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub hit_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CachePruneStats {
    pub deleted: usize,
    pub remaining: usize,
}

impl SqliteScoreCache {
    /// Write every entry as one JSON line, most recently used first.
    /// Returns the number of rows written.
    pub async fn export_jsonl(&self, path: impl AsRef<Path>) -> Result<usize, CacheError> {
        let path = path.as_ref().to_path_buf();
        let conn = self.clone();
        tokio::task::spawn_blocking(move || {
            conn.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT key_hash, model, feature, template_hash, calibration_hash, content_hash,\
                            response_json, input_tokens, output_tokens, provider_cost_nanodollars,\
                            created_at, updated_at, hit_count \
                     FROM score_cache ORDER BY updated_at DESC, key_hash",
                )?;
                let mut rows = stmt.query([])?;
                let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
                let mut written = 0usize;
                while let Some(row) = rows.next()? {
                    let record = CacheExportRow {
                        key_hash: row.get(0)?,
                        model: row.get(1)?,
                        feature: row.get(2)?,
                        template_hash: row.get(3)?,
                        calibration_hash: row.get(4)?,
                        content_hash: row.get(5)?,
                        response_json: row.get(6)?,
                        input_tokens: row.get::<_, Option<i64>>(7)?.map(|v| v as u32),
                        output_tokens: row.get::<_, Option<i64>>(8)?.map(|v| v as u32),
                        provider_cost_nanodollars: row.get(9)?,
                        created_at: row.get(10)?,
                        updated_at: row.get(11)?,
                        hit_count: row.get(12)?,
                    };
                    let line = serde_json::to_string(&record)
                        .map_err(|e| CacheError::Serde(e.to_string()))?;
                    writeln!(file, "{line}")?;
                    written += 1;
                }
                file.flush()?;
                Ok(written)
            })
        })
        .await
        .map_err(|e| CacheError::Join(e.to_string()))?
    }

    pub async fn prune(
        &self,
        max_age_days: Option<u64>,
        max_rows: Option<usize>,
    ) -> Result<CachePruneStats, CacheError> {
        let conn = self.clone();
        tokio::task::spawn_blocking(move || {
            conn.with_conn(|conn| {
                let mut deleted: usize = 0;
                if let Some(days) = max_age_days {
                    let cutoff = now_epoch().saturating_sub((days as i64).saturating_mul(86_400));
                    let removed = conn.execute(
                        "DELETE FROM score_cache WHERE updated_at < ?1",
                        params![cutoff],
                    )?;
                    deleted = deleted.saturating_add(removed);
                }

                if let Some(max_rows) = max_rows {
                    let count: i64 =
                        conn.query_row("SELECT COUNT(*) FROM score_cache", [], |row| row.get(0))?;
                    let keep = max_rows as i64;
                    if count > keep {
                        let removed = conn.execute(
                            "DELETE FROM score_cache WHERE key_hash IN (\
                                SELECT key_hash FROM score_cache \
                                ORDER BY updated_at DESC, key_hash LIMIT -1 OFFSET ?1\
                             )",
                            params![keep],
                        )?;
                        deleted = deleted.saturating_add(removed);
                    }
                }

                let remaining: i64 =
                    conn.query_row("SELECT COUNT(*) FROM score_cache", [], |row| row.get(0))?;
                Ok(CachePruneStats {
                    deleted,
                    remaining: remaining.max(0) as usize,
                })
            })
        })
        .await
        .map_err(|e| CacheError::Join(e.to_string()))?
    }
}

fn hash_text(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

fn hash_fields(fields: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for (idx, field) in fields.iter().enumerate() {
        if idx > 0 {
            hasher.update(b"|");
        }
        hasher.update(field.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
