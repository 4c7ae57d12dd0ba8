#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sift_api::{InProcApi, MockApi, SiftApi, SiftError, TriggerStatus};
use sift_core::{FieldConfig, IndexElement};
use sift_manager::{EngineConfig, IndexManager, IndexTypeConfig, SearchRequest};

struct Headlines {
    delay: Duration,
}

#[async_trait]
impl IndexTypeConfig for Headlines {
    fn name(&self) -> &str { "news" }

    fn fields(&self) -> Vec<FieldConfig> { vec![FieldConfig::text("title")] }

    async fn fetch_page(&self, offset: usize, limit: usize) -> anyhow::Result<Vec<IndexElement>> {
        tokio::time::sleep(self.delay).await;
        let titles = ["election day", "rain again", "election recount"];
        Ok(titles
            .iter()
            .enumerate()
            .skip(offset)
            .take(limit)
            .map(|(i, t)| IndexElement::insert("news", i as i64).with_field("title", *t))
            .collect())
    }
}

fn engine(delay_ms: u64) -> Arc<IndexManager> {
    let m = Arc::new(IndexManager::new(EngineConfig::default().with_page_size(2)));
    m.register(Arc::new(Headlines { delay: Duration::from_millis(delay_ms) })).unwrap();
    m
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn trigger_statuses() {
    let api = InProcApi::new(engine(0));
    assert_eq!(api.trigger_reindex("news", None).await, TriggerStatus::NoContent);
    assert_eq!(api.trigger_reindex("tags", None).await, TriggerStatus::NotFound);
    assert_eq!(TriggerStatus::NotFound.http_status(), 404);

    let slow = engine(30);
    let api = Arc::new(InProcApi::new(Arc::clone(&slow)));
    let running = slow.spawn_reindex("news").unwrap();
    assert_eq!(api.trigger_reindex("news", None).await, TriggerStatus::Conflict);
    running.await.unwrap().unwrap();
    assert_eq!(api.trigger_reindex("news", None).await.http_status(), 204);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn token_guards_reindex_only() {
    let api = InProcApi::new(engine(0)).with_token("s3cret");
    assert_eq!(api.trigger_reindex("news", None).await, TriggerStatus::Forbidden);
    assert_eq!(api.trigger_reindex("news", Some("nope")).await, TriggerStatus::Forbidden);
    let report = api.reindex("news", Some("s3cret")).await.unwrap();
    assert_eq!(report.elements, 3);

    let resp = api.search("news", SearchRequest::text("election")).await.unwrap();
    assert_eq!(resp.total_hits, 2);
    assert_eq!(resp.debug.total, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn errors_map_onto_api_taxonomy() {
    let api = InProcApi::new(engine(0));
    api.reindex("news", None).await.unwrap();

    let dup = api.apply("news", vec![IndexElement::insert("news", 0).with_field("title", "x")]).await;
    assert!(matches!(dup, Err(SiftError::Conflict(_))));
    let missing = api.apply("news", vec![IndexElement::delete("news", 99)]).await;
    assert!(matches!(missing, Err(SiftError::NotFound(_))));
    let bad = api.search("news", SearchRequest::text("x").with_filter("nope", "y")).await;
    assert!(matches!(bad, Err(SiftError::Validation(_))));
    let foreign = api.apply("news", vec![IndexElement::insert("tags", 5).with_field("title", "x")]).await;
    assert!(matches!(foreign, Err(SiftError::Validation(m)) if m.contains("belongs to type tags")));

    let stats = api.stats().await.unwrap();
    assert_eq!(stats.page_size, 2);
    assert_eq!(stats.types[0].docs, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn epoch_stream_follows_swaps() {
    let api = InProcApi::new(engine(0));
    let mut stream = api.watch_epochs("news").await.unwrap();
    api.reindex("news", None).await.unwrap();
    let epoch = tokio::time::timeout(Duration::from_secs(1), stream.rx.recv()).await.unwrap();
    assert_eq!(epoch, Some(1));
    stream.cancel.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mock_pages_canned_hits() {
    let mut mock = MockApi::new();
    mock.types = vec!["news".into()];
    assert_eq!(mock.trigger_reindex("news", None).await, TriggerStatus::Conflict);
    assert_eq!(mock.trigger_reindex("other", None).await, TriggerStatus::NotFound);
    let resp = mock.search("news", SearchRequest::new()).await.unwrap();
    assert_eq!(resp.total_hits, 0);
}
