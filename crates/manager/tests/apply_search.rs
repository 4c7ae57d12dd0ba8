#![forbid(unsafe_code)]

mod common;

use common::{article, items, manager, register, VecType};
use sift_core::{ElementId, FieldValue, IndexElement, IndexError};
use sift_manager::{ApplyStats, SearchRequest};

fn ids(r: &sift_core::SearchResult<sift_core::Hit>) -> Vec<ElementId> { r.results.iter().map(|h| h.id.clone()).collect() }

fn headlines() -> Vec<IndexElement> {
    vec![
        article("news", 1, "Election results are in"),
        article("news", 2, "Weather turns cold"),
        article("news", 3, "Election night coverage"),
        article("news", 4, "Local election officials"),
        article("news", 5, "Football cup final"),
        article("news", 6, "Election recount ordered"),
        article("news", 7, "Election turnout record"),
        article("news", 8, "Markets rally"),
        article("news", 9, "Election debate recap"),
        article("news", 10, "Early election polls"),
    ]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn paged_search_reports_total_hits() {
    let m = manager(4);
    register(&m, VecType::new("news", headlines()));
    m.reindex("news").await.unwrap();
    let ex = m.executor();

    let first = ex.search("news", Some("election"), None, 0, 3).unwrap();
    assert_eq!(first.total_hits, 7);
    assert_eq!(ids(&first), vec![ElementId::Int(1), ElementId::Int(3), ElementId::Int(4)]);

    let last = ex.search("news", Some("election"), None, 6, 3).unwrap();
    assert_eq!(last.total_hits, 7);
    assert_eq!(ids(&last), vec![ElementId::Int(10)]);

    let past = ex.search("news", Some("election"), None, 7, 3).unwrap();
    assert!(past.is_empty());
    assert_eq!(past.total_hits, 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pages_concatenate_to_the_full_ranking() {
    let m = manager(4);
    register(&m, VecType::new("news", headlines()));
    m.reindex("news").await.unwrap();
    let ex = m.executor();

    let all = ex.search("news", Some("election"), None, 0, 100).unwrap();
    let mut paged = Vec::new();
    for offset in (0..all.total_hits).step_by(2) {
        paged.extend(ids(&ex.search("news", Some("election"), None, offset, 2).unwrap()));
    }
    assert_eq!(paged, ids(&all));
    // repeated queries rank identically
    assert_eq!(ids(&ex.search("news", Some("election"), None, 0, 100).unwrap()), ids(&all));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn apply_insert_update_delete() {
    let m = manager(4);
    register(&m, VecType::new("news", items("news", 3)));
    m.reindex("news").await.unwrap();

    let stats = m.apply(article("news", 10, "volcano erupts")).await.unwrap();
    assert_eq!(stats, ApplyStats { added: 1, updated: 0, deleted: 0 });
    assert_eq!(m.executor().search("news", Some("volcano"), None, 0, 10).unwrap().total_hits, 1);

    m.apply(IndexElement::update("news", 10).with_field("title", "volcano calms")).await.unwrap();
    let doc = m.get("news", &ElementId::Int(10)).unwrap().unwrap();
    assert_eq!(doc.values("title").next(), Some(&FieldValue::Text("volcano calms".into())));
    assert_eq!(m.executor().search("news", Some("erupts"), None, 0, 10).unwrap().total_hits, 0);

    m.apply(IndexElement::delete("news", 10)).await.unwrap();
    assert!(m.get("news", &ElementId::Int(10)).unwrap().is_none());
    assert_eq!(m.live("news").unwrap().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_apply_changes_nothing() {
    let m = manager(4);
    register(&m, VecType::new("news", items("news", 3)));
    m.reindex("news").await.unwrap();
    let before = m.live("news").unwrap();

    assert!(matches!(m.apply(article("news", 1, "again")).await, Err(IndexError::DuplicateElement { .. })));
    assert!(matches!(m.apply(IndexElement::update("news", 42)).await, Err(IndexError::NotFound { .. })));
    assert!(matches!(m.apply(IndexElement::delete("news", 42)).await, Err(IndexError::NotFound { .. })));
    let bad_kind = IndexElement::insert("news", 50).with_field("rank", "high");
    assert!(matches!(m.apply(bad_kind).await, Err(IndexError::InvalidField { .. })));

    let after = m.live("news").unwrap();
    assert!(std::sync::Arc::ptr_eq(&before, &after));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn apply_batch_is_all_or_nothing() {
    let m = manager(4);
    register(&m, VecType::new("news", items("news", 3)));
    m.reindex("news").await.unwrap();
    let epoch = m.live("news").unwrap().epoch();

    let batch = vec![article("news", 20, "one"), IndexElement::delete("news", 0), IndexElement::delete("news", 77)];
    assert!(m.apply_batch("news", batch).await.is_err());
    let live = m.live("news").unwrap();
    assert_eq!(live.len(), 3);
    assert!(!live.contains(&ElementId::Int(20)));
    assert_eq!(live.epoch(), epoch);

    let batch = vec![article("news", 20, "one"), IndexElement::delete("news", 0), IndexElement::update("news", 1).with_field("title", "two")];
    let stats = m.apply_batch("news", batch).await.unwrap();
    assert_eq!(stats, ApplyStats { added: 1, updated: 1, deleted: 1 });
    assert_eq!(m.live("news").unwrap().epoch(), epoch + 1);

    let foreign = vec![article("news", 21, "fine"), article("category", 1, "x")];
    match m.apply_batch("news", foreign).await {
        Err(IndexError::TypeMismatch { type_name, id, element_type }) => {
            assert_eq!(type_name, "news");
            assert_eq!(id, ElementId::Int(1));
            assert_eq!(element_type, "category");
        }
        other => panic!("expected a type mismatch, got {:?}", other),
    }
    assert!(!m.live("news").unwrap().contains(&ElementId::Int(21)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn filters_sort_and_locale() {
    let m = manager(10);
    let rows = vec![
        article("news", 1, "storm warning").with_field("tag", "weather").with_field("rank", 3).with_locale("en"),
        article("news", 2, "Sturm über Köln").with_field("tag", "weather").with_field("rank", 1).with_locale("de"),
        article("news", 3, "storm of protest").with_field("tag", "politics").with_field("rank", 2).with_locale("en"),
        article("news", 4, "storm chasers").with_field("rank", 5),
    ];
    register(&m, VecType::new("news", rows));
    m.reindex("news").await.unwrap();
    let ex = m.executor();

    let r = ex.execute("news", &SearchRequest::text("storm").with_filter("tag", "weather")).unwrap();
    assert_eq!(ids(&r), vec![ElementId::Int(1)]);

    let r = ex.execute("news", &SearchRequest::text("tag:politics storm")).unwrap();
    assert_eq!(ids(&r), vec![ElementId::Int(3)]);

    let r = ex.execute("news", &SearchRequest::text("storm").sorted_by("rank", true)).unwrap();
    assert_eq!(ids(&r), vec![ElementId::Int(4), ElementId::Int(1), ElementId::Int(3)]);

    // a requested locale keeps only documents in that language, never neutral ones
    let r = ex.search("news", Some("köln"), Some("de-DE"), 0, 10).unwrap();
    assert_eq!(ids(&r), vec![ElementId::Int(2)]);
    let r = ex.search("news", Some("storm"), Some("en"), 0, 10).unwrap();
    assert_eq!(ids(&r), vec![ElementId::Int(1), ElementId::Int(3)]);
    // without one, each document sees the query through its own analyzer
    let r = ex.search("news", Some("Köln"), None, 0, 10).unwrap();
    assert_eq!(ids(&r), vec![ElementId::Int(2)]);
    let r = ex.search("news", Some("the storm"), None, 0, 10).unwrap();
    assert_eq!(ids(&r), vec![ElementId::Int(1), ElementId::Int(3)]);

    assert!(matches!(ex.execute("news", &SearchRequest::text("x").with_filter("nope", "y")), Err(IndexError::InvalidField { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn similar_documents_follow_the_live_generation() {
    let m = manager(10);
    let rows = vec![
        article("news", 1, "volcano erupts near village").with_locale("en"),
        article("news", 2, "village evacuated as volcano erupts").with_locale("en"),
        article("news", 3, "volcano quiet").with_locale("en"),
        article("news", 4, "cup final tonight").with_locale("en"),
    ];
    register(&m, VecType::new("news", rows));
    m.reindex("news").await.unwrap();
    let ex = m.executor();

    let r = ex.similar("news", &ElementId::Int(1), None, 0, 10).unwrap();
    assert_eq!(ids(&r), vec![ElementId::Int(2), ElementId::Int(3)]);
    assert_eq!(r.total_hits, 2);

    m.apply(article("news", 5, "volcano erupts again near village").with_locale("en")).await.unwrap();
    let r = ex.similar("news", &ElementId::Int(1), None, 0, 1).unwrap();
    assert_eq!(r.total_hits, 3);
    assert_eq!(ids(&r), vec![ElementId::Int(5)]);

    assert!(matches!(ex.similar("news", &ElementId::Int(99), None, 0, 10), Err(IndexError::NotFound { .. })));
    assert!(matches!(ex.similar("tags", &ElementId::Int(1), None, 0, 10), Err(IndexError::UnknownType(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stats_cover_every_type() {
    let m = manager(4);
    register(&m, VecType::new("news", items("news", 5)));
    register(&m, VecType::new("category", items("category", 2)));
    m.reindex("news").await.unwrap();

    let stats = m.stats();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].name, "category");
    assert_eq!(stats[0].docs, 0);
    assert!(stats[0].last_reindex.is_none());
    assert_eq!(stats[1].docs, 5);
    assert_eq!(stats[1].epoch, 1);
    assert_eq!(stats[1].last_reindex.as_ref().map(|r| r.elements), Some(5));
}
