//! Sift public API façade (in-process).
//!
//! Frontends (CLI, an HTTP layer) depend on the `SiftApi` trait rather than on
//! the manager directly. Engine errors are mapped onto a small serializable
//! taxonomy, and reindex triggers onto the statuses an HTTP layer returns.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sift_core::{Hit, IndexElement, IndexError, SearchResult};
use sift_manager::{ApplyStats, IndexManager, ReindexReport, SearchDebugInfo, SearchRequest, TypeStats};
use tracing::{info, warn};

/// API errors suitable for transport over RPC.
#[derive(Debug, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum SiftError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type SiftResult<T> = Result<T, SiftError>;

impl From<IndexError> for SiftError {
    fn from(e: IndexError) -> Self {
        let msg = e.to_string();
        match e {
            IndexError::UnknownType(_) | IndexError::NotFound { .. } => SiftError::NotFound(msg),
            IndexError::ReindexInProgress(_) | IndexError::DuplicateType(_) | IndexError::DuplicateElement { .. } => {
                SiftError::Conflict(msg)
            }
            IndexError::InvalidField { .. }
            | IndexError::InvalidReindexOperation { .. }
            | IndexError::TypeMismatch { .. } => SiftError::Validation(msg),
            // keep the whole cause chain for operators
            IndexError::ReindexFailed { .. } => SiftError::Internal(format!("{:#}", anyhow::Error::new(e))),
        }
    }
}

/// What a reindex trigger observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    NoContent,
    NotFound,
    Conflict,
    Forbidden,
    Failed,
}

impl TriggerStatus {
    /// HTTP status an endpoint would answer with.
    pub fn http_status(self) -> u16 {
        match self {
            TriggerStatus::NoContent => 204,
            TriggerStatus::NotFound => 404,
            TriggerStatus::Conflict => 409,
            TriggerStatus::Forbidden => 403,
            TriggerStatus::Failed => 500,
        }
    }
}

impl<T> From<&SiftResult<T>> for TriggerStatus {
    fn from(r: &SiftResult<T>) -> Self {
        match r {
            Ok(_) => TriggerStatus::NoContent,
            Err(SiftError::NotFound(_)) => TriggerStatus::NotFound,
            Err(SiftError::Conflict(_)) => TriggerStatus::Conflict,
            Err(SiftError::Forbidden(_)) => TriggerStatus::Forbidden,
            Err(_) => TriggerStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<Hit>,
    pub total_hits: usize,
    pub debug: SearchDebugInfo,
}

/// Engine configuration and per-type state exposed to clients.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Stats {
    pub page_size: usize,
    pub page_delay_ms: u64,
    pub types: Vec<TypeStats>,
    pub metrics_addr: Option<String>,
}

/// Declarative Sift API surface.
#[async_trait::async_trait]
pub trait SiftApi: Send + Sync {
    /// Registered type names, sorted.
    async fn types(&self) -> SiftResult<Vec<String>>;

    /// Rebuild `type_name` and wait for the swap. `token` is checked when the
    /// implementation is configured with one.
    async fn reindex(&self, type_name: &str, token: Option<&str>) -> SiftResult<ReindexReport>;

    /// `reindex` reduced to the status a trigger endpoint reports.
    async fn trigger_reindex(&self, type_name: &str, token: Option<&str>) -> TriggerStatus {
        TriggerStatus::from(&self.reindex(type_name, token).await)
    }

    /// Incremental changes to one type, applied all-or-nothing.
    async fn apply(&self, type_name: &str, elements: Vec<IndexElement>) -> SiftResult<ApplyStats>;

    async fn search(&self, type_name: &str, req: SearchRequest) -> SiftResult<SearchResponse>;

    async fn stats(&self) -> SiftResult<Stats>;

    /// Stream epochs of `type_name` as generations are swapped in.
    async fn watch_epochs(&self, type_name: &str) -> SiftResult<StreamHandle<u64>>;
}

// ----------------- Mock implementation -----------------

/// Simple in-memory mock implementation for tests.
pub struct MockApi {
    pub types: Vec<String>,
    pub report: Option<ReindexReport>,
    pub apply: ApplyStats,
    pub hits: Vec<Hit>,
    pub debug: SearchDebugInfo,
    pub stats: Stats,
}

impl Default for MockApi {
    fn default() -> Self {
        Self {
            types: Vec::new(),
            report: None,
            apply: ApplyStats::default(),
            hits: Vec::new(),
            debug: SearchDebugInfo::default(),
            stats: Stats::default(),
        }
    }
}

impl MockApi {
    pub fn new() -> Self { Self::default() }

    fn known(&self, type_name: &str) -> SiftResult<()> {
        if self.types.iter().any(|t| t == type_name) {
            Ok(())
        } else {
            Err(SiftError::NotFound(format!("unknown index type: {}", type_name)))
        }
    }
}

#[async_trait::async_trait]
impl SiftApi for MockApi {
    async fn types(&self) -> SiftResult<Vec<String>> { Ok(self.types.clone()) }

    async fn reindex(&self, type_name: &str, _token: Option<&str>) -> SiftResult<ReindexReport> {
        self.known(type_name)?;
        self.report.clone().ok_or_else(|| SiftError::Conflict(format!("reindex of {} already in progress", type_name)))
    }

    async fn apply(&self, type_name: &str, _elements: Vec<IndexElement>) -> SiftResult<ApplyStats> {
        self.known(type_name)?;
        Ok(self.apply)
    }

    async fn search(&self, type_name: &str, req: SearchRequest) -> SiftResult<SearchResponse> {
        self.known(type_name)?;
        let hits: Vec<Hit> = self.hits.iter().skip(req.offset).take(req.limit).cloned().collect();
        Ok(SearchResponse { hits, total_hits: self.hits.len(), debug: self.debug.clone() })
    }

    async fn stats(&self) -> SiftResult<Stats> { Ok(self.stats.clone()) }

    async fn watch_epochs(&self, type_name: &str) -> SiftResult<StreamHandle<u64>> {
        self.known(type_name)?;
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        Ok(StreamHandle { rx, cancel: CancelHandle { task: None } })
    }
}

// ----------------- In-process implementation -----------------

/// In-process implementation that calls the manager directly.
pub struct InProcApi {
    manager: Arc<IndexManager>,
    token: Option<String>,
}

impl InProcApi {
    pub fn new(manager: Arc<IndexManager>) -> Self { Self { manager, token: None } }

    /// Reindex token from `SIFT_REINDEX_TOKEN`; empty means unprotected.
    pub fn from_env(manager: Arc<IndexManager>) -> Self {
        let token = std::env::var("SIFT_REINDEX_TOKEN").ok().filter(|t| !t.is_empty());
        Self { manager, token }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn manager(&self) -> &Arc<IndexManager> { &self.manager }

    fn authorize(&self, type_name: &str, presented: Option<&str>) -> SiftResult<()> {
        match self.token.as_deref() {
            Some(expected) if presented != Some(expected) => {
                metrics::counter!("api_forbidden_total", 1u64, "type" => type_name.to_string());
                warn!(index_type = type_name, "api: reindex trigger rejected: bad token");
                Err(SiftError::Forbidden(format!("reindex of {} requires a valid token", type_name)))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl SiftApi for InProcApi {
    async fn types(&self) -> SiftResult<Vec<String>> { Ok(self.manager.registry().names()) }

    async fn reindex(&self, type_name: &str, token: Option<&str>) -> SiftResult<ReindexReport> {
        self.authorize(type_name, token)?;
        let t0 = Instant::now();
        info!(index_type = type_name, "api: reindex start");
        let report = self.manager.reindex(type_name).await?;
        info!(index_type = type_name, elements = report.elements, took_ms = %t0.elapsed().as_millis(), "api: reindex ok");
        Ok(report)
    }

    async fn apply(&self, type_name: &str, elements: Vec<IndexElement>) -> SiftResult<ApplyStats> {
        let t0 = Instant::now();
        let count = elements.len();
        let stats = self.manager.apply_batch(type_name, elements).await?;
        info!(index_type = type_name, count, took_ms = %t0.elapsed().as_millis(), "api: apply ok");
        Ok(stats)
    }

    async fn search(&self, type_name: &str, req: SearchRequest) -> SiftResult<SearchResponse> {
        let t0 = Instant::now();
        info!(index_type = type_name, query = req.query.as_deref().unwrap_or(""), offset = req.offset, limit = req.limit, "api: search start");
        let (res, debug): (SearchResult<Hit>, SearchDebugInfo) = self.manager.executor().explain(type_name, &req)?;
        info!(hits = res.len(), total_hits = res.total_hits, took_ms = %t0.elapsed().as_millis(), "api: search ok");
        Ok(SearchResponse { hits: res.results, total_hits: res.total_hits, debug })
    }

    async fn stats(&self) -> SiftResult<Stats> {
        let cfg = self.manager.config();
        Ok(Stats {
            page_size: cfg.page_size,
            page_delay_ms: cfg.page_delay_ms,
            types: self.manager.stats(),
            metrics_addr: std::env::var("SIFT_METRICS_ADDR").ok(),
        })
    }

    async fn watch_epochs(&self, type_name: &str) -> SiftResult<StreamHandle<u64>> {
        use tokio::sync::mpsc;
        let mut epochs = self.manager.subscribe(type_name)?;
        let (tx, rx) = mpsc::channel::<u64>(16);
        let task = tokio::spawn(async move {
            while epochs.changed().await.is_ok() {
                let epoch = *epochs.borrow_and_update();
                if tx.send(epoch).await.is_err() {
                    break;
                }
            }
        });
        Ok(StreamHandle { rx, cancel: CancelHandle { task: Some(task) } })
    }
}

/// Cancel handle for a background stream task.
pub struct CancelHandle {
    task: Option<tokio::task::JoinHandle<()>>,
}

impl CancelHandle {
    pub fn cancel(mut self) {
        if let Some(h) = self.task.take() {
            h.abort();
        }
    }
}

pub struct StreamHandle<T> {
    pub rx: tokio::sync::mpsc::Receiver<T>,
    pub cancel: CancelHandle,
}
