#![forbid(unsafe_code)]

use std::sync::Arc;

use sift_core::{ElementId, FieldConfig, IndexElement};
use sift_search::{search, SearchRequest};
use sift_store::{Generation, GenerationBuilder};

const WORDS: &[&str] = &["election", "elections", "vote", "voting", "storm", "market", "elect", "poll"];

fn corpus(n: i64) -> Arc<Generation> {
    let fields: Arc<[FieldConfig]> = Arc::from(vec![FieldConfig::text("title"), FieldConfig::text("body")]);
    let mut b = GenerationBuilder::new("news", fields);
    // insertion order deliberately differs from id order
    for i in (0..n).rev() {
        let w1 = WORDS[(i as usize * 7) % WORDS.len()];
        let w2 = WORDS[(i as usize * 3 + 1) % WORDS.len()];
        let el = IndexElement::insert("news", i).with_field("title", format!("{} {}", w1, w2)).with_field("body", format!("item {}", i));
        b.insert(el).unwrap();
    }
    b.freeze()
}

fn ids(gen: &Generation, req: &SearchRequest) -> Vec<ElementId> {
    search(gen, req).unwrap().results.into_iter().map(|h| h.id).collect()
}

#[test]
fn pages_concatenate_for_every_page_size() {
    let g = corpus(120);
    // "poll storm" co-occurs in titles where i % 8 == 1
    for q in ["election", "poll storm", "elect", "market"] {
        let full = search(&g, &SearchRequest::text(q).page(0, 1_000)).unwrap();
        assert!(full.total_hits > 0, "query {:?} matched nothing", q);
        for size in [1usize, 3, 7, 50] {
            let mut paged = Vec::new();
            let mut offset = 0;
            loop {
                let page = search(&g, &SearchRequest::text(q).page(offset, size)).unwrap();
                assert_eq!(page.total_hits, full.total_hits);
                if page.is_empty() {
                    break;
                }
                offset += page.len();
                paged.extend(page.results.into_iter().map(|h| h.id));
            }
            let expected: Vec<ElementId> = full.results.iter().map(|h| h.id.clone()).collect();
            assert_eq!(paged, expected, "query {:?} page size {}", q, size);
        }
    }
}

#[test]
fn ranking_is_score_then_id() {
    let g = corpus(60);
    let r = search(&g, &SearchRequest::text("election").page(0, 1_000)).unwrap();
    for w in r.results.windows(2) {
        assert!(w[0].score > w[1].score || (w[0].score == w[1].score && w[0].id < w[1].id));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_agree() {
    let g = corpus(200);
    let req = SearchRequest::text("vote").page(5, 20);
    let expected = ids(&g, &req);
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let g = Arc::clone(&g);
        let req = req.clone();
        tasks.push(tokio::spawn(async move { ids(&g, &req) }));
    }
    for t in tasks {
        assert_eq!(t.await.unwrap(), expected);
    }
}
