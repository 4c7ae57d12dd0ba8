//! Sift store: index generations and the live pointer.
//!
//! A `Generation` is an immutable snapshot of one type's indexed contents.
//! Writers build the next generation with a `GenerationBuilder` (either a
//! fresh, empty shadow for a full reindex or a copy of the live one for
//! incremental changes) and publish it through `LiveIndex::swap`, a single
//! atomic pointer store. Readers load whichever generation is live and
//! never block on writers.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use rustc_hash::FxHashMap;
use sift_core::analysis::{language, Analyzer};
use sift_core::{ElementId, FieldConfig, FieldEntry, FieldValue, IndexElement, IndexError, IndexResult, Operation};
use smallvec::SmallVec;
use tokio::sync::watch;
use tracing::debug;

/// Terms extracted from one indexed field. Each inner vector is one value of
/// a (possibly multi-valued) field, kept apart so phrases never span values.
#[derive(Debug, Clone)]
pub struct FieldTerms {
    /// Position of the field in the type's field list.
    pub field: usize,
    pub values: Vec<Vec<String>>,
}

impl FieldTerms {
    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.values.iter().flat_map(|v| v.iter().map(String::as_str))
    }
}

/// An indexed element as held by a generation.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: ElementId,
    pub locale: Option<String>,
    /// Primary language subtag of `locale`.
    pub lang: Option<String>,
    /// Configured fields only, stored or not.
    pub fields: SmallVec<[FieldEntry; 8]>,
    pub terms: Vec<FieldTerms>,
}

impl Document {
    /// Validate `el` against `fields` and analyze its indexed values.
    pub fn analyze(type_name: &str, fields: &[FieldConfig], el: IndexElement) -> IndexResult<Self> {
        let analyzer = Analyzer::for_locale(el.locale.as_deref());
        let mut kept: SmallVec<[FieldEntry; 8]> = SmallVec::new();
        let mut terms: Vec<FieldTerms> = Vec::new();
        for (name, value) in el.fields.into_iter() {
            // Names outside the schema are ignored.
            let Some(pos) = fields.iter().position(|f| f.name == name) else { continue };
            let conf = &fields[pos];
            if !conf.accepts(&value) {
                return Err(IndexError::invalid_field(
                    type_name,
                    &name,
                    format!("expected {:?} value, got {:?}", conf.value_kind, value.kind()),
                ));
            }
            if conf.indexed {
                let value_terms = if conf.analyzed {
                    value.as_text().map(|t| analyzer.tokens(t)).unwrap_or_default()
                } else {
                    vec![analyzer.normalize(&value.render())]
                };
                match terms.iter_mut().find(|t| t.field == pos) {
                    Some(ft) => ft.values.push(value_terms),
                    None => terms.push(FieldTerms { field: pos, values: vec![value_terms] }),
                }
            }
            kept.push((name, value));
        }
        let lang = el.locale.as_deref().map(language).filter(|l| !l.is_empty());
        Ok(Self { id: el.id, locale: el.locale, lang, fields: kept, terms })
    }

    pub fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FieldValue> + 'a {
        self.fields.iter().filter(move |(n, _)| n == name).map(|(_, v)| v)
    }

    /// Stored fields only, as returned with search hits.
    pub fn stored_fields(&self, fields: &[FieldConfig]) -> SmallVec<[FieldEntry; 8]> {
        self.fields
            .iter()
            .filter(|(n, _)| fields.iter().any(|f| &f.name == n && f.stored))
            .cloned()
            .collect()
    }
}

/// One immutable version of a type's index contents.
#[derive(Debug, Clone)]
pub struct Generation {
    type_name: Arc<str>,
    fields: Arc<[FieldConfig]>,
    epoch: u64,
    /// Insertion sequence -> document. Iteration yields insertion order.
    docs: BTreeMap<u64, Arc<Document>>,
    by_id: FxHashMap<ElementId, u64>,
    next_seq: u64,
}

impl Generation {
    pub fn empty(type_name: impl Into<Arc<str>>, fields: Arc<[FieldConfig]>) -> Self {
        Self { type_name: type_name.into(), fields, epoch: 0, docs: BTreeMap::new(), by_id: FxHashMap::default(), next_seq: 0 }
    }

    pub fn type_name(&self) -> &str { &self.type_name }
    pub fn fields(&self) -> &[FieldConfig] { &self.fields }
    pub fn epoch(&self) -> u64 { self.epoch }
    pub fn len(&self) -> usize { self.docs.len() }
    pub fn is_empty(&self) -> bool { self.docs.is_empty() }

    pub fn get(&self, id: &ElementId) -> Option<&Arc<Document>> {
        self.by_id.get(id).and_then(|seq| self.docs.get(seq))
    }

    pub fn contains(&self, id: &ElementId) -> bool { self.by_id.contains_key(id) }

    /// Documents in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Document>> { self.docs.values() }

    /// Copy-on-write builder for the next generation, seeded with this one's contents.
    pub fn to_builder(&self) -> GenerationBuilder {
        let mut next = self.clone();
        next.epoch = self.epoch.saturating_add(1);
        GenerationBuilder { inner: next }
    }

    /// Fresh, empty shadow generation that will succeed this one.
    pub fn shadow(&self) -> GenerationBuilder {
        let mut next = Generation::empty(Arc::clone(&self.type_name), Arc::clone(&self.fields));
        next.epoch = self.epoch.saturating_add(1);
        GenerationBuilder { inner: next }
    }
}

/// Mutable staging area for a generation that is not yet visible to readers.
pub struct GenerationBuilder {
    inner: Generation,
}

impl GenerationBuilder {
    pub fn new(type_name: impl Into<Arc<str>>, fields: Arc<[FieldConfig]>) -> Self {
        Self { inner: Generation::empty(type_name, fields) }
    }

    pub fn len(&self) -> usize { self.inner.len() }
    pub fn is_empty(&self) -> bool { self.inner.is_empty() }
    pub fn contains(&self, id: &ElementId) -> bool { self.inner.contains(id) }
    pub fn epoch(&self) -> u64 { self.inner.epoch }

    /// Apply one element according to its operation tag.
    pub fn apply(&mut self, el: IndexElement) -> IndexResult<Operation> {
        let op = el.operation;
        match op {
            Operation::Insert => self.insert(el)?,
            Operation::Update => self.update(el)?,
            Operation::Delete => self.delete(&el.id)?,
        }
        Ok(op)
    }

    pub fn insert(&mut self, el: IndexElement) -> IndexResult<()> {
        if self.inner.contains(&el.id) {
            return Err(IndexError::DuplicateElement { type_name: self.inner.type_name.to_string(), id: el.id });
        }
        let doc = Document::analyze(&self.inner.type_name, &self.inner.fields, el)?;
        self.push(doc);
        Ok(())
    }

    /// Delete then insert: the replacement moves to the end of insertion order.
    pub fn update(&mut self, el: IndexElement) -> IndexResult<()> {
        if !self.inner.contains(&el.id) {
            return Err(IndexError::NotFound { type_name: self.inner.type_name.to_string(), id: el.id });
        }
        // Analyze first so a rejected value leaves the old document in place.
        let doc = Document::analyze(&self.inner.type_name, &self.inner.fields, el)?;
        self.remove(&doc.id);
        self.push(doc);
        Ok(())
    }

    pub fn delete(&mut self, id: &ElementId) -> IndexResult<()> {
        if self.remove(id).is_none() {
            return Err(IndexError::NotFound { type_name: self.inner.type_name.to_string(), id: id.clone() });
        }
        Ok(())
    }

    fn push(&mut self, doc: Document) {
        let seq = self.inner.next_seq;
        self.inner.next_seq += 1;
        self.inner.by_id.insert(doc.id.clone(), seq);
        self.inner.docs.insert(seq, Arc::new(doc));
    }

    fn remove(&mut self, id: &ElementId) -> Option<Arc<Document>> {
        let seq = self.inner.by_id.remove(id)?;
        self.inner.docs.remove(&seq)
    }

    pub fn freeze(self) -> Arc<Generation> { Arc::new(self.inner) }
}

/// The live generation of one type plus an epoch channel for subscribers.
pub struct LiveIndex {
    snap: ArcSwap<Generation>,
    epoch_tx: watch::Sender<u64>,
}

impl LiveIndex {
    pub fn new(initial: Generation) -> Self {
        let (epoch_tx, _rx) = watch::channel(initial.epoch);
        Self { snap: ArcSwap::from_pointee(initial), epoch_tx }
    }

    pub fn current(&self) -> Arc<Generation> { self.snap.load_full() }

    /// Publish `next` as the live generation and return the one it replaced.
    pub fn swap(&self, next: Arc<Generation>) -> Arc<Generation> {
        let epoch = next.epoch;
        let docs = next.len();
        let prev = self.snap.swap(next);
        // send_replace never fails, even without receivers
        self.epoch_tx.send_replace(epoch);
        metrics::gauge!("index_docs", docs as f64, "type" => prev.type_name.to_string());
        debug!(index_type = %prev.type_name, from = prev.epoch, to = epoch, docs, "generation swapped");
        prev
    }

    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_tx.subscribe() }
}
