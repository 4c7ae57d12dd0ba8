//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Elements requested per `fetch_page` call during a reindex.
    pub page_size: usize,
    /// Pause between reindex pages so the source of record is not saturated.
    pub page_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self { Self { page_size: DEFAULT_PAGE_SIZE, page_delay_ms: 0 } }
}

impl EngineConfig {
    /// Defaults overridden by `SIFT_PAGE_SIZE` and `SIFT_PAGE_DELAY_MS`.
    pub fn from_env() -> Self {
        let d = Self::default();
        let page_size = std::env::var("SIFT_PAGE_SIZE").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(d.page_size);
        let page_delay_ms = std::env::var("SIFT_PAGE_DELAY_MS").ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(d.page_delay_ms);
        Self { page_size, page_delay_ms }.sanitized()
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self.sanitized()
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn page_delay(&self) -> Option<Duration> {
        (self.page_delay_ms > 0).then(|| Duration::from_millis(self.page_delay_ms))
    }

    fn sanitized(mut self) -> Self {
        self.page_size = self.page_size.max(1);
        self
    }
}
