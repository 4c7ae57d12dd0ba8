//! Full rebuild of one type into a shadow generation.

use std::time::{Duration, Instant};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sift_core::{IndexError, IndexResult, Operation};
use sift_store::GenerationBuilder;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::registry::IndexTypeConfig;

/// Outcome of a completed reindex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexReport {
    pub type_name: String,
    pub job_id: String,
    /// Epoch of the generation that went live.
    pub epoch: u64,
    pub pages: usize,
    pub fetch_calls: usize,
    pub elements: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct JobProgress {
    pub pages: usize,
    pub fetch_calls: usize,
    pub elements: usize,
}

pub(crate) struct ReindexJob<'a> {
    config: &'a dyn IndexTypeConfig,
    page_size: usize,
    page_delay: Option<Duration>,
    job_id: Uuid,
}

impl<'a> ReindexJob<'a> {
    pub fn new(config: &'a dyn IndexTypeConfig, page_size: usize, page_delay: Option<Duration>, job_id: Uuid) -> Self {
        Self { config, page_size: page_size.max(1), page_delay, job_id }
    }

    /// Page through the source into `shadow`. The shadow is only returned on
    /// success; any error drops it, so nothing partial can be published.
    pub async fn run(&self, mut shadow: GenerationBuilder) -> IndexResult<(GenerationBuilder, JobProgress)> {
        let name = self.config.name();
        let mut progress = JobProgress::default();
        let mut offset = 0usize;
        loop {
            let started = Instant::now();
            let page = self
                .config
                .fetch_page(offset, self.page_size)
                .await
                .with_context(|| format!("fetching page at offset {} (limit {})", offset, self.page_size))
                .map_err(|source| IndexError::ReindexFailed { type_name: name.to_string(), source })?;
            progress.fetch_calls += 1;
            let n = page.len();
            if n == 0 {
                break;
            }

            for el in page.iter() {
                if el.operation != Operation::Insert {
                    return Err(IndexError::invalid_reindex_op(name, &el.id, el.operation));
                }
                if el.type_name != name {
                    return Err(IndexError::InvalidReindexOperation {
                        type_name: name.to_string(),
                        id: el.id.clone(),
                        reason: format!("element belongs to type {}", el.type_name),
                    });
                }
                // Overlapping pages mean the source broke its ordering contract.
                if shadow.contains(&el.id) {
                    return Err(IndexError::InvalidReindexOperation {
                        type_name: name.to_string(),
                        id: el.id.clone(),
                        reason: "duplicate id within reindex".to_string(),
                    });
                }
                shadow.insert(el.clone()).map_err(|e| IndexError::ReindexFailed {
                    type_name: name.to_string(),
                    source: anyhow::Error::new(e).context(format!("writing page at offset {}", offset)),
                })?;
            }
            progress.pages += 1;
            progress.elements += n;
            debug!(index_type = name, job_id = %self.job_id, page = progress.pages, offset, elements = n, page_ms = started.elapsed().as_millis() as u64, "reindex page written");

            if let Err(e) = self.config.on_indexed(&page).await {
                warn!(index_type = name, job_id = %self.job_id, offset, error = ?e, "post-indexing hook failed");
                metrics::counter!("index_hook_failures_total", 1u64, "type" => name.to_string());
            }

            if n < self.page_size {
                break;
            }
            offset += n;
            if let Some(d) = self.page_delay {
                tokio::time::sleep(d).await;
            }
        }
        Ok((shadow, progress))
    }
}
