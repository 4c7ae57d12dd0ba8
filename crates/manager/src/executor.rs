//! Read path: resolves the live generation of a type and runs a query on it.

use sift_core::{ElementId, Hit, IndexResult, SearchResult};
use sift_search::{SearchDebugInfo, SearchRequest, SimilarRequest};

use crate::manager::IndexManager;

#[derive(Clone, Copy)]
pub struct SearchExecutor<'a> {
    manager: &'a IndexManager,
}

impl<'a> SearchExecutor<'a> {
    pub fn new(manager: &'a IndexManager) -> Self { Self { manager } }

    /// Free-text search over the indexed fields of `type_name`.
    ///
    /// Hits are ranked by score descending, then id ascending; `total_hits`
    /// ignores `offset` and `limit`. A reindex in flight is invisible here
    /// until its swap.
    pub fn search(
        &self,
        type_name: &str,
        query: Option<&str>,
        locale: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> IndexResult<SearchResult<Hit>> {
        let req = SearchRequest {
            query: query.map(str::to_string),
            locale: locale.map(str::to_string),
            offset,
            limit,
            ..SearchRequest::default()
        };
        self.execute(type_name, &req)
    }

    pub fn execute(&self, type_name: &str, req: &SearchRequest) -> IndexResult<SearchResult<Hit>> {
        let gen = self.manager.live(type_name)?;
        sift_search::search(&gen, req)
    }

    pub fn explain(&self, type_name: &str, req: &SearchRequest) -> IndexResult<(SearchResult<Hit>, SearchDebugInfo)> {
        let gen = self.manager.live(type_name)?;
        sift_search::search_with_debug(&gen, req)
    }

    /// Documents of `type_name` sharing the most weighted terms with `id`.
    ///
    /// Without `locale` only documents in the source's language are
    /// considered. An unknown `id` is [`IndexError::NotFound`].
    ///
    /// [`IndexError::NotFound`]: sift_core::IndexError::NotFound
    pub fn similar(
        &self,
        type_name: &str,
        id: &ElementId,
        locale: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> IndexResult<SearchResult<Hit>> {
        let mut req = SimilarRequest::new(id.clone()).page(offset, limit);
        req.locale = locale.map(str::to_string);
        self.similar_to(type_name, &req)
    }

    pub fn similar_to(&self, type_name: &str, req: &SimilarRequest) -> IndexResult<SearchResult<Hit>> {
        let gen = self.manager.live(type_name)?;
        sift_search::similar(&gen, req)
    }
}
