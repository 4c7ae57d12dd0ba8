#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sift_core::{FieldConfig, IndexElement};
use sift_manager::{EngineConfig, IndexManager, IndexTypeConfig};

/// In-memory source of record with knobs for failure injection.
pub struct VecType {
    pub name: String,
    pub rows: Mutex<Vec<IndexElement>>,
    pub fetches: AtomicUsize,
    pub hook_calls: AtomicUsize,
    pub delay: Option<Duration>,
    pub fail_at_offset: Option<usize>,
    pub hook_fails: bool,
}

impl VecType {
    pub fn new(name: &str, rows: Vec<IndexElement>) -> Self {
        Self {
            name: name.to_string(),
            rows: Mutex::new(rows),
            fetches: AtomicUsize::new(0),
            hook_calls: AtomicUsize::new(0),
            delay: None,
            fail_at_offset: None,
            hook_fails: false,
        }
    }

    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }

    pub fn failing_at(mut self, offset: usize) -> Self {
        self.fail_at_offset = Some(offset);
        self
    }

    pub fn with_failing_hook(mut self) -> Self {
        self.hook_fails = true;
        self
    }

    pub fn set_rows(&self, rows: Vec<IndexElement>) { *self.rows.lock().unwrap() = rows; }

    pub fn fetches(&self) -> usize { self.fetches.load(Ordering::SeqCst) }
}

#[async_trait]
impl IndexTypeConfig for VecType {
    fn name(&self) -> &str { &self.name }

    fn fields(&self) -> Vec<FieldConfig> {
        vec![FieldConfig::text("title"), FieldConfig::text("body"), FieldConfig::keyword("tag"), FieldConfig::number("rank")]
    }

    async fn fetch_page(&self, offset: usize, limit: usize) -> anyhow::Result<Vec<IndexElement>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        if self.fail_at_offset == Some(offset) {
            anyhow::bail!("source unavailable at offset {}", offset);
        }
        let rows = self.rows.lock().unwrap();
        Ok(rows.iter().skip(offset).take(limit).cloned().collect())
    }

    async fn on_indexed(&self, _batch: &[IndexElement]) -> anyhow::Result<()> {
        self.hook_calls.fetch_add(1, Ordering::SeqCst);
        if self.hook_fails {
            anyhow::bail!("hook exploded");
        }
        Ok(())
    }
}

pub fn article(type_name: &str, id: i64, title: &str) -> IndexElement {
    IndexElement::insert(type_name, id).with_field("title", title.to_string())
}

/// `n` rows titled `item <i>`.
pub fn items(type_name: &str, n: i64) -> Vec<IndexElement> {
    (0..n).map(|i| article(type_name, i, &format!("item {}", i))).collect()
}

pub fn manager(page_size: usize) -> Arc<IndexManager> {
    Arc::new(IndexManager::new(EngineConfig::default().with_page_size(page_size)))
}

pub fn register(m: &IndexManager, source: VecType) -> Arc<VecType> {
    let source = Arc::new(source);
    m.register(source.clone()).unwrap();
    source
}
