//! Sift persistence: a small SQLite source of record.
//!
//! Records are kept per type in insertion order and served back in pages, so
//! a table can back an index type directly through [`SqliteTypeConfig`].

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use sift_core::{ElementId, FieldConfig, FieldValue, IndexElement};
use sift_manager::IndexTypeConfig;
use tracing::{debug, info, warn};

/// Name and field list of one index type, as read from a schema file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSchema {
    pub name: String,
    pub fields: Vec<FieldConfig>,
}

/// One row of the source of record. Everything besides `id` and `locale`
/// lands in `body` and is matched to schema fields by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: ElementId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(flatten)]
    pub body: serde_json::Map<String, serde_json::Value>,
}

pub trait RecordStore {
    /// Insert or replace; a replaced record keeps its position.
    fn put(&self, type_name: &str, rec: &Record) -> Result<()>;
    fn remove(&self, type_name: &str, id: &ElementId) -> Result<bool>;
    fn get(&self, type_name: &str, id: &ElementId) -> Result<Option<Record>>;
    /// Records of `type_name` in insertion order.
    fn page(&self, type_name: &str, offset: usize, limit: usize) -> Result<Vec<Record>>;
    fn count(&self, type_name: &str) -> Result<usize>;
}

/// SQLite-backed store. Synchronous; async callers go through `spawn_blocking`.
pub struct SqliteStore {
    db: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    /// Opens `SIFT_DB_PATH`, or `~/.sift/sift.db`.
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("SIFT_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        let me = Self::init(db)?;
        let took = started.elapsed();
        histogram!("persist_open_ms", took.as_secs_f64() * 1000.0);
        info!(%path, took_ms = %took.as_millis(), "record store opened");
        Ok(me)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(rusqlite::Connection::open_in_memory().context("opening in-memory sqlite db")?)
    }

    fn init(db: rusqlite::Connection) -> Result<Self> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS records (
                type   TEXT NOT NULL,
                id     TEXT NOT NULL,
                locale TEXT,
                body   BLOB NOT NULL,
                UNIQUE (type, id)
            )",
            [],
        )
        .context("creating records table")?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> { self.db.lock().unwrap_or_else(|e| e.into_inner()) }
}

fn id_key(id: &ElementId) -> Result<String> { serde_json::to_string(id).context("encoding record id") }

fn decode_row(id: String, locale: Option<String>, body: Vec<u8>) -> Result<Record> {
    let id: ElementId = serde_json::from_str(&id).with_context(|| format!("decoding record id {}", id))?;
    let body = serde_json::from_slice(&maybe_decompress(&body)).with_context(|| format!("decoding body of record {}", id))?;
    Ok(Record { id, locale, body })
}

impl RecordStore for SqliteStore {
    fn put(&self, type_name: &str, rec: &Record) -> Result<()> {
        let started = std::time::Instant::now();
        let body = maybe_compress(&serde_json::to_vec(&rec.body).context("encoding record body")?);
        self.conn().execute(
            "INSERT INTO records(type, id, locale, body) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(type, id) DO UPDATE SET locale = excluded.locale, body = excluded.body",
            (type_name, id_key(&rec.id)?, rec.locale.as_deref(), body),
        )?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        debug!(index_type = type_name, id = %rec.id, "record stored");
        Ok(())
    }

    fn remove(&self, type_name: &str, id: &ElementId) -> Result<bool> {
        let n = self.conn().execute("DELETE FROM records WHERE type = ?1 AND id = ?2", (type_name, id_key(id)?))?;
        debug!(index_type = type_name, %id, removed = (n > 0), "record removed");
        Ok(n > 0)
    }

    fn get(&self, type_name: &str, id: &ElementId) -> Result<Option<Record>> {
        let db = self.conn();
        let row = db
            .query_row(
                "SELECT id, locale, body FROM records WHERE type = ?1 AND id = ?2",
                (type_name, id_key(id)?),
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?, row.get::<_, Vec<u8>>(2)?)),
            )
            .optional()?;
        row.map(|(id, locale, body)| decode_row(id, locale, body)).transpose()
    }

    fn page(&self, type_name: &str, offset: usize, limit: usize) -> Result<Vec<Record>> {
        let started = std::time::Instant::now();
        let db = self.conn();
        let mut stmt = db.prepare("SELECT id, locale, body FROM records WHERE type = ?1 ORDER BY rowid LIMIT ?2 OFFSET ?3")?;
        let mut rows = stmt.query((type_name, limit as i64, offset as i64))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(decode_row(row.get(0)?, row.get(1)?, row.get(2)?)?);
        }
        histogram!("persist_page_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }

    fn count(&self, type_name: &str) -> Result<usize> {
        let n: i64 = self.conn().query_row("SELECT COUNT(*) FROM records WHERE type = ?1", [type_name], |r| r.get(0))?;
        Ok(n as usize)
    }
}

/// Map a stored record onto the fields of `schema`. Arrays become multi-valued
/// fields, nulls are skipped, keys without a schema field are ignored.
pub fn to_element(schema: &TypeSchema, rec: &Record) -> Result<IndexElement> {
    let mut el = IndexElement::insert(schema.name.as_str(), rec.id.clone());
    el.locale = rec.locale.clone();
    for f in schema.fields.iter() {
        let Some(raw) = rec.body.get(&f.name) else { continue };
        let values: Vec<&serde_json::Value> = match raw {
            serde_json::Value::Array(items) => items.iter().collect(),
            serde_json::Value::Null => Vec::new(),
            v => vec![v],
        };
        for v in values.into_iter().filter(|v| !v.is_null()) {
            let value = FieldValue::from_json(f.value_kind, v)
                .ok_or_else(|| anyhow!("record {}: field {} expects {:?}, got {}", rec.id, f.name, f.value_kind, v))?;
            el.fields.push((f.name.clone(), value));
        }
    }
    Ok(el)
}

/// Index type backed by the `records` rows of one type.
pub struct SqliteTypeConfig {
    schema: TypeSchema,
    store: Arc<SqliteStore>,
}

impl SqliteTypeConfig {
    pub fn new(schema: TypeSchema, store: Arc<SqliteStore>) -> Self { Self { schema, store } }
}

#[async_trait]
impl IndexTypeConfig for SqliteTypeConfig {
    fn name(&self) -> &str { &self.schema.name }

    fn fields(&self) -> Vec<FieldConfig> { self.schema.fields.clone() }

    async fn fetch_page(&self, offset: usize, limit: usize) -> Result<Vec<IndexElement>> {
        let store = Arc::clone(&self.store);
        let name = self.schema.name.clone();
        let records = tokio::task::spawn_blocking(move || store.page(&name, offset, limit))
            .await
            .context("page query task")??;
        let elements: Result<Vec<IndexElement>> = records.iter().map(|r| to_element(&self.schema, r)).collect();
        if let Err(e) = &elements {
            warn!(index_type = %self.schema.name, offset, error = %e, "record does not fit the type schema");
        }
        elements
    }
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".sift");
        let _ = std::fs::create_dir_all(&p);
        p.push("sift.db");
        return p.to_string_lossy().to_string();
    }
    "sift.db".to_string()
}

pub fn maybe_compress(body: &[u8]) -> Vec<u8> {
    #[cfg(feature = "zstd")]
    {
        let lvl: i32 = std::env::var("SIFT_ZSTD_LEVEL").ok().and_then(|s| s.parse().ok()).unwrap_or(3);
        return zstd::encode_all(body, lvl).unwrap_or_else(|_| body.to_vec());
    }
    body.to_vec()
}

pub fn maybe_decompress(blob: &[u8]) -> Vec<u8> {
    #[cfg(feature = "zstd")]
    {
        if let Ok(de) = zstd::decode_all(std::io::Cursor::new(blob)) {
            return de;
        }
    }
    blob.to_vec()
}
