//! Process-wide orchestrator for reindexing, incremental apply and reads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use sift_core::{ElementId, FieldConfig, IndexElement, IndexError, IndexResult, Operation};
use sift_store::{Document, Generation, LiveIndex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::executor::SearchExecutor;
use crate::job::{ReindexJob, ReindexReport};
use crate::registry::{IndexTypeConfig, TypeRegistry};

/// Counts of an applied batch, by operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyStats {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl ApplyStats {
    fn record(&mut self, op: Operation) {
        match op {
            Operation::Insert => self.added += 1,
            Operation::Update => self.updated += 1,
            Operation::Delete => self.deleted += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeStats {
    pub name: String,
    pub docs: usize,
    pub epoch: u64,
    pub reindexing: bool,
    pub last_reindex: Option<ReindexReport>,
}

/// Mutable state of one registered type. Only the manager touches it.
struct TypeSlot {
    config: Arc<dyn IndexTypeConfig>,
    live: LiveIndex,
    /// Single-flight flag for reindexing.
    reindexing: AtomicBool,
    /// Serializes writers of the live pointer (apply and the final swap).
    write: Mutex<()>,
    last_reindex: Mutex<Option<ReindexReport>>,
}

/// Held for a reindex's whole duration; releases the single-flight flag on drop,
/// including when the job fails or its task is aborted.
struct ReindexClaim {
    slot: Arc<TypeSlot>,
}

impl Drop for ReindexClaim {
    fn drop(&mut self) { self.slot.reindexing.store(false, Ordering::Release); }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> { m.lock().unwrap_or_else(|e| e.into_inner()) }

pub struct IndexManager {
    config: EngineConfig,
    registry: TypeRegistry,
    slots: RwLock<FxHashMap<String, Arc<TypeSlot>>>,
}

impl IndexManager {
    pub fn new(config: EngineConfig) -> Self {
        Self { config, registry: TypeRegistry::new(), slots: RwLock::new(FxHashMap::default()) }
    }

    pub fn config(&self) -> &EngineConfig { &self.config }
    pub fn registry(&self) -> &TypeRegistry { &self.registry }

    /// Register a type with an empty live generation.
    pub fn register(&self, config: Arc<dyn IndexTypeConfig>) -> IndexResult<()> {
        self.registry.register(Arc::clone(&config))?;
        self.slot(config.name())?;
        info!(index_type = %config.name(), "index type registered");
        Ok(())
    }

    /// Resolve `name` through the registry. Runtime state is attached on first
    /// use, so types registered straight into [`TypeRegistry`] work as well.
    fn slot(&self, name: &str) -> IndexResult<Arc<TypeSlot>> {
        let config = self.registry.lookup(name)?;
        if let Some(slot) = self.slots.read().unwrap_or_else(|e| e.into_inner()).get(name) {
            return Ok(Arc::clone(slot));
        }
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        let slot = slots.entry(name.to_string()).or_insert_with(|| {
            let fields: Arc<[FieldConfig]> = Arc::from(config.fields());
            let live = LiveIndex::new(Generation::empty(name, fields));
            Arc::new(TypeSlot {
                config,
                live,
                reindexing: AtomicBool::new(false),
                write: Mutex::new(()),
                last_reindex: Mutex::new(None),
            })
        });
        Ok(Arc::clone(slot))
    }

    fn claim(&self, slot: &Arc<TypeSlot>) -> IndexResult<ReindexClaim> {
        // Taken under the write lock so no apply is mid-flight when the flag flips.
        let _w = lock(&slot.write);
        if slot.reindexing.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            let name = slot.config.name().to_string();
            metrics::counter!("reindex_conflicts_total", 1u64, "type" => name.clone());
            warn!(index_type = %name, "reindex rejected: already in progress");
            return Err(IndexError::ReindexInProgress(name));
        }
        Ok(ReindexClaim { slot: Arc::clone(slot) })
    }

    /// Rebuild `type_name` from its source and swap it in. Returns after the swap.
    pub async fn reindex(&self, type_name: &str) -> IndexResult<ReindexReport> {
        let slot = self.slot(type_name)?;
        let claim = self.claim(&slot)?;
        run_reindex(&self.config, claim).await
    }

    /// Start a reindex on the runtime. Conflicts and unknown types are reported
    /// before anything is spawned.
    pub fn spawn_reindex(&self, type_name: &str) -> IndexResult<JoinHandle<IndexResult<ReindexReport>>> {
        let slot = self.slot(type_name)?;
        let claim = self.claim(&slot)?;
        let config = self.config.clone();
        Ok(tokio::spawn(async move { run_reindex(&config, claim).await }))
    }

    /// Reindex every registered type concurrently.
    pub async fn reindex_all(&self) -> Vec<(String, IndexResult<ReindexReport>)> {
        let names = self.registry.names();
        let runs = names.iter().map(|n| self.reindex(n));
        let results = futures::future::join_all(runs).await;
        names.into_iter().zip(results).collect()
    }

    /// Apply one incremental change to the live generation of its type.
    pub async fn apply(&self, element: IndexElement) -> IndexResult<ApplyStats> {
        let type_name = element.type_name.clone();
        self.apply_batch(&type_name, vec![element]).await
    }

    /// Apply several changes of one type. All succeed and become visible in a
    /// single swap, or none does.
    pub async fn apply_batch(&self, type_name: &str, elements: Vec<IndexElement>) -> IndexResult<ApplyStats> {
        let slot = self.slot(type_name)?;
        if let Some(el) = elements.iter().find(|e| e.type_name != type_name) {
            return Err(IndexError::TypeMismatch {
                type_name: type_name.to_string(),
                id: el.id.clone(),
                element_type: el.type_name.clone(),
            });
        }
        if elements.is_empty() {
            return Ok(ApplyStats::default());
        }
        let started = Instant::now();
        let mut stats = ApplyStats::default();
        {
            let _w = lock(&slot.write);
            if slot.reindexing.load(Ordering::Acquire) {
                metrics::counter!("apply_rejected_total", 1u64, "type" => type_name.to_string());
                return Err(IndexError::ReindexInProgress(type_name.to_string()));
            }
            let mut next = slot.live.current().to_builder();
            for el in elements.iter().cloned() {
                stats.record(next.apply(el)?);
            }
            slot.live.swap(next.freeze());
        }
        for (op, n) in [("insert", stats.added), ("update", stats.updated), ("delete", stats.deleted)] {
            if n > 0 {
                metrics::counter!("apply_total", n as u64, "type" => type_name.to_string(), "op" => op);
            }
        }
        tracing::debug!(index_type = type_name, added = stats.added, updated = stats.updated, deleted = stats.deleted, elapsed_ms = started.elapsed().as_millis() as u64, "batch applied");
        if let Err(e) = slot.config.on_indexed(&elements).await {
            warn!(index_type = type_name, error = ?e, "post-indexing hook failed");
            metrics::counter!("index_hook_failures_total", 1u64, "type" => type_name.to_string());
        }
        Ok(stats)
    }

    /// The generation currently live for `type_name`.
    pub fn live(&self, type_name: &str) -> IndexResult<Arc<Generation>> {
        Ok(self.slot(type_name)?.live.current())
    }

    /// Point lookup in the live generation.
    pub fn get(&self, type_name: &str, id: &ElementId) -> IndexResult<Option<Arc<Document>>> {
        Ok(self.live(type_name)?.get(id).cloned())
    }

    pub fn subscribe(&self, type_name: &str) -> IndexResult<watch::Receiver<u64>> {
        Ok(self.slot(type_name)?.live.subscribe_epoch())
    }

    pub fn executor(&self) -> SearchExecutor<'_> { SearchExecutor::new(self) }

    pub fn type_stats(&self, type_name: &str) -> IndexResult<TypeStats> {
        let slot = self.slot(type_name)?;
        let gen = slot.live.current();
        let last_reindex = lock(&slot.last_reindex).clone();
        Ok(TypeStats {
            name: type_name.to_string(),
            docs: gen.len(),
            epoch: gen.epoch(),
            reindexing: slot.reindexing.load(Ordering::Acquire),
            last_reindex,
        })
    }

    pub fn stats(&self) -> Vec<TypeStats> {
        self.registry.names().iter().filter_map(|n| self.type_stats(n).ok()).collect()
    }
}

async fn run_reindex(config: &EngineConfig, claim: ReindexClaim) -> IndexResult<ReindexReport> {
    let slot = Arc::clone(&claim.slot);
    let name = slot.config.name().to_string();
    let job_id = Uuid::new_v4();
    let started = Instant::now();
    info!(index_type = %name, job_id = %job_id, page_size = config.page_size, "reindex started");

    let shadow = slot.live.current().shadow();
    let job = ReindexJob::new(slot.config.as_ref(), config.page_size, config.page_delay(), job_id);
    let (next, progress) = match job.run(shadow).await {
        Ok(done) => done,
        Err(e) => {
            metrics::counter!("reindex_failed_total", 1u64, "type" => name.clone());
            error!(index_type = %name, job_id = %job_id, error = ?e, "reindex aborted; live generation untouched");
            return Err(e);
        }
    };

    let next = next.freeze();
    let epoch = next.epoch();
    {
        let _w = lock(&slot.write);
        // previous generation is dropped once its last reader lets go
        slot.live.swap(next);
    }
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let report = ReindexReport {
        type_name: name.clone(),
        job_id: job_id.to_string(),
        epoch,
        pages: progress.pages,
        fetch_calls: progress.fetch_calls,
        elements: progress.elements,
        elapsed_ms,
    };
    *lock(&slot.last_reindex) = Some(report.clone());
    drop(claim);

    metrics::counter!("reindex_total", 1u64, "type" => name.clone());
    metrics::histogram!("reindex_ms", elapsed_ms as f64, "type" => name.clone());
    info!(index_type = %name, job_id = %job_id, pages = progress.pages, elements = progress.elements, epoch, elapsed_ms, "reindex finished");
    Ok(report)
}
