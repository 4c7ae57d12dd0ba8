//! Sift index manager: owns the registered types, runs single-flight reindex
//! jobs into shadow generations and applies incremental changes.
//!
//! Readers always go through the live pointer of a type and see exactly one
//! generation per query; a reindex publishes its shadow with one swap.

#![forbid(unsafe_code)]

mod config;
mod executor;
mod job;
mod manager;
mod registry;

pub use config::{EngineConfig, DEFAULT_PAGE_SIZE};
pub use executor::SearchExecutor;
pub use job::ReindexReport;
pub use manager::{ApplyStats, IndexManager, TypeStats};
pub use registry::{IndexTypeConfig, TypeRegistry};

pub use sift_search::{FieldFilter, SearchDebugInfo, SearchRequest, SimilarRequest, SortSpec};
