//! Sift search: paged queries over one generation of a type.
//!
//! Free text is analyzed with each document's own analyzer, the same one
//! that produced the document's terms, and matched against the indexed
//! fields. A requested locale keeps only documents of that language.
//! Every query term must match some field: an exact term scores 1.0, a
//! prefix 0.7 and a fuzzy match 0.5; the best field wins per term. A query
//! whose terms appear contiguously in one field value gets a phrase bonus.
//! Ranking is score descending, then id ascending, so paging the same query
//! over the same generation is deterministic.
//!
//! [`similar`] ranks documents by the weighted terms they share with one
//! source document.

#![forbid(unsafe_code)]

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use serde::{Deserialize, Serialize};
use sift_core::analysis::{language, Analyzer};
use sift_core::{ElementId, FieldConfig, FieldValue, Hit, IndexError, IndexResult, SearchResult, ValueKind};
use sift_store::{Document, Generation};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const EXACT_BOOST: f32 = 1.0;
pub const PREFIX_BOOST: f32 = 0.7;
pub const FUZZY_BOOST: f32 = 0.5;
pub const PHRASE_BOOST: f32 = 1.0;

/// Most terms taken from a source document by [`similar`].
pub const SIMILAR_MAX_TERMS: usize = 25;
/// Shorter source terms carry too little signal for [`similar`].
pub const SIMILAR_MIN_WORD_LEN: usize = 3;

/// Fuzzy matching only kicks in for terms at least this long.
const FUZZY_MIN_LEN: usize = 3;
/// Maximum length difference between a term and a fuzzy matched token.
const FUZZY_MAX_EXTRA: usize = 2;

/// Equality on one indexed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Free text; may carry `field:value` filters for indexed fields.
    pub query: Option<String>,
    pub filters: Vec<FieldFilter>,
    pub locale: Option<String>,
    pub offset: usize,
    /// Page size. Zero only counts.
    pub limit: usize,
    /// Replaces relevance ordering when set.
    pub sort: Option<SortSpec>,
}

impl SearchRequest {
    pub fn new() -> Self { Self { limit: 20, ..Default::default() } }

    pub fn text(q: impl Into<String>) -> Self { Self { query: Some(q.into()), ..Self::new() } }

    pub fn with_filter(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.filters.push(FieldFilter { field: field.into(), value: value.into() });
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    pub fn sorted_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.sort = Some(SortSpec { field: field.into(), descending });
        self
    }
}

/// Documents like an existing one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarRequest {
    pub id: ElementId,
    /// Defaults to the source document's locale.
    pub locale: Option<String>,
    #[serde(default)]
    pub filters: Vec<FieldFilter>,
    /// Hits scoring below this are dropped; the best source term weighs 1.0.
    #[serde(default)]
    pub min_score: f32,
    pub offset: usize,
    pub limit: usize,
}

impl SimilarRequest {
    pub fn new(id: impl Into<ElementId>) -> Self {
        Self { id: id.into(), locale: None, filters: Vec::new(), min_score: 0.0, offset: 0, limit: 20 }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.filters.push(FieldFilter { field: field.into(), value: value.into() });
        self
    }

    pub fn min_score(mut self, min: f32) -> Self {
        self.min_score = min;
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }
}

/// Candidate counts after each evaluation stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchDebugInfo {
    pub total: usize,
    pub after_locale: usize,
    pub after_filters: usize,
    pub matched: usize,
}

struct Parsed {
    /// Free text left after inline filters were taken out.
    text: String,
    filters: Vec<(usize, String)>,
}

impl Parsed {
    fn has_text(&self) -> bool { !self.text.trim().is_empty() }
}

/// Query terms per document language, analyzed on first use.
struct QueryTerms<'q> {
    text: &'q str,
    by_lang: Vec<(Option<String>, Vec<String>)>,
}

impl<'q> QueryTerms<'q> {
    fn new(text: &'q str) -> Self { Self { text, by_lang: Vec::new() } }

    fn for_doc(&mut self, doc: &Document) -> &[String] {
        let pos = match self.by_lang.iter().position(|(l, _)| *l == doc.lang) {
            Some(pos) => pos,
            None => {
                let terms = Analyzer::for_locale(doc.lang.as_deref()).tokens(self.text);
                self.by_lang.push((doc.lang.clone(), terms));
                self.by_lang.len() - 1
            }
        };
        &self.by_lang[pos].1
    }
}

pub fn search(gen: &Generation, req: &SearchRequest) -> IndexResult<SearchResult<Hit>> {
    search_with_debug(gen, req).map(|(r, _)| r)
}

pub fn search_with_debug(gen: &Generation, req: &SearchRequest) -> IndexResult<(SearchResult<Hit>, SearchDebugInfo)> {
    let started = std::time::Instant::now();
    let fields = gen.fields();
    let parsed = parse(gen.type_name(), fields, req)?;
    let sort_pos = match &req.sort {
        Some(s) => Some(
            fields
                .iter()
                .position(|f| f.name == s.field)
                .ok_or_else(|| IndexError::invalid_field(gen.type_name(), &s.field, "unknown sort field"))?,
        ),
        None => None,
    };
    let lang = req.locale.as_deref().map(language).filter(|l| !l.is_empty());
    let matcher = SkimMatcherV2::default();

    let mut dbg = SearchDebugInfo { total: gen.len(), ..Default::default() };
    let mut query = QueryTerms::new(&parsed.text);
    let mut matched: Vec<(f32, &Arc<Document>)> = Vec::new();
    for doc in gen.iter() {
        // Neutral documents have no language and never match a requested one.
        if let Some(want) = lang.as_deref() {
            if doc.lang.as_deref() != Some(want) { continue; }
        }
        dbg.after_locale += 1;
        if !parsed.filters.iter().all(|(pos, val)| filter_matches(doc, &fields[*pos], val)) { continue; }
        dbg.after_filters += 1;
        if !parsed.has_text() {
            matched.push((0.0, doc));
            continue;
        }
        // Text that analyzes to nothing (stopwords only) matches nothing.
        let terms = query.for_doc(doc);
        if terms.is_empty() { continue; }
        if let Some(score) = score_doc(&matcher, doc, terms) {
            matched.push((score, doc));
        }
    }
    dbg.matched = matched.len();

    if let (Some(spec), Some(pos)) = (&req.sort, sort_pos) {
        let name = &fields[pos].name;
        matched.sort_by(|a, b| {
            let va = a.1.values(name).next();
            let vb = b.1.values(name).next();
            let ord = match (va, vb) {
                (Some(x), Some(y)) => if spec.descending { y.sort_cmp(x) } else { x.sort_cmp(y) },
                // Missing values go last either way.
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            ord.then_with(|| a.1.id.cmp(&b.1.id))
        });
    } else if parsed.has_text() {
        matched.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
    }
    // otherwise: insertion order as stored

    let total_hits = matched.len();
    let results: Vec<Hit> = matched
        .into_iter()
        .skip(req.offset)
        .take(req.limit)
        .map(|(score, doc)| Hit {
            id: doc.id.clone(),
            score,
            locale: doc.locale.clone(),
            fields: doc.stored_fields(fields),
        })
        .collect();

    metrics::histogram!("search_eval_ms", started.elapsed().as_secs_f64() * 1_000.0);
    metrics::histogram!("search_hits", total_hits as f64);
    tracing::debug!(index_type = gen.type_name(), epoch = gen.epoch(), total_hits, returned = results.len(), "search evaluated");
    Ok((SearchResult::new(results, total_hits), dbg))
}

/// Rank the documents sharing analyzed terms with `req.id`.
///
/// Terms of the source's analyzed fields are weighted by frequency in the
/// source times inverse document frequency among the candidates, and the
/// strongest [`SIMILAR_MAX_TERMS`] are kept. A candidate scores the sum of
/// the weights it contains, scaled so the strongest term counts 1.0. The
/// source itself never appears in its own result.
pub fn similar(gen: &Generation, req: &SimilarRequest) -> IndexResult<SearchResult<Hit>> {
    let started = std::time::Instant::now();
    let fields = gen.fields();
    let source = gen
        .get(&req.id)
        .ok_or_else(|| IndexError::NotFound { type_name: gen.type_name().to_string(), id: req.id.clone() })?;
    let mut filters: Vec<(usize, String)> = Vec::new();
    for f in req.filters.iter() {
        filters.push((indexed_field(gen.type_name(), fields, &f.field)?, filter_term(&f.value)));
    }
    let lang = match req.locale.as_deref() {
        Some(l) => Some(language(l)).filter(|l| !l.is_empty()),
        None => source.lang.clone(),
    };
    let candidates: Vec<&Arc<Document>> = gen
        .iter()
        .filter(|d| d.id != source.id)
        .filter(|d| lang.is_none() || d.lang == lang)
        .filter(|d| filters.iter().all(|(pos, val)| filter_matches(d, &fields[*pos], val)))
        .collect();

    let mut freq: BTreeMap<&str, usize> = BTreeMap::new();
    for t in analyzed_terms(source, fields).filter(|t| t.chars().count() >= SIMILAR_MIN_WORD_LEN) {
        *freq.entry(t).or_default() += 1;
    }
    let n = candidates.len() + 1;
    let mut weighted: Vec<(&str, f32)> = freq
        .into_iter()
        .map(|(term, tf)| {
            let df = 1 + candidates.iter().filter(|d| analyzed_terms(d, fields).any(|t| t == term)).count();
            (term, tf as f32 * idf(n, df))
        })
        .collect();
    weighted.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    weighted.truncate(SIMILAR_MAX_TERMS);
    let top = match weighted.first() {
        Some((_, w)) if *w > 0.0 => *w,
        _ => return Ok(SearchResult::empty()),
    };

    let mut matched: Vec<(f32, &Arc<Document>)> = candidates
        .into_iter()
        .filter_map(|d| {
            let score: f32 = weighted
                .iter()
                .filter(|(term, _)| analyzed_terms(d, fields).any(|t| t == *term))
                .map(|(_, w)| w / top)
                .sum();
            (score > 0.0 && score >= req.min_score).then_some((score, d))
        })
        .collect();
    matched.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));

    let total_hits = matched.len();
    let results: Vec<Hit> = matched
        .into_iter()
        .skip(req.offset)
        .take(req.limit)
        .map(|(score, doc)| Hit { id: doc.id.clone(), score, locale: doc.locale.clone(), fields: doc.stored_fields(fields) })
        .collect();
    metrics::histogram!("similar_eval_ms", started.elapsed().as_secs_f64() * 1_000.0);
    tracing::debug!(index_type = gen.type_name(), epoch = gen.epoch(), terms = weighted.len(), total_hits, "similar evaluated");
    Ok(SearchResult::new(results, total_hits))
}

fn analyzed_terms<'d>(doc: &'d Document, fields: &'d [FieldConfig]) -> impl Iterator<Item = &'d str> + 'd {
    doc.terms.iter().filter(move |ft| fields[ft.field].analyzed).flat_map(|ft| ft.terms())
}

fn idf(docs: usize, df: usize) -> f32 { 1.0 + (docs as f32 / (df as f32 + 1.0)).ln() }

fn parse(type_name: &str, fields: &[FieldConfig], req: &SearchRequest) -> IndexResult<Parsed> {
    let mut filters: Vec<(usize, String)> = Vec::new();
    for f in req.filters.iter() {
        let pos = indexed_field(type_name, fields, &f.field)?;
        filters.push((pos, filter_term(&f.value)));
    }
    let mut free: Vec<&str> = Vec::new();
    if let Some(q) = req.query.as_deref() {
        for tok in q.split_whitespace() {
            // Typed filter only when the prefix names an indexed field; otherwise free text.
            if let Some((name, value)) = tok.split_once(':') {
                if let Some(pos) = fields.iter().position(|f| f.name == name && f.indexed) {
                    if !value.is_empty() {
                        filters.push((pos, inline_term(fields[pos].value_kind, value)));
                        continue;
                    }
                }
            }
            free.push(tok);
        }
    }
    Ok(Parsed { text: free.join(" "), filters })
}

fn indexed_field(type_name: &str, fields: &[FieldConfig], name: &str) -> IndexResult<usize> {
    match fields.iter().position(|f| f.name == name) {
        Some(pos) if fields[pos].indexed => Ok(pos),
        Some(_) => Err(IndexError::invalid_field(type_name, name, "field is not indexed")),
        None => Err(IndexError::invalid_field(type_name, name, "unknown field")),
    }
}

fn filter_term(v: &FieldValue) -> String { v.render().to_lowercase() }

/// Inline filters arrive as text; dates are accepted as RFC 3339 or epoch millis.
fn inline_term(kind: ValueKind, raw: &str) -> String {
    if kind == ValueKind::Date {
        if let Ok(d) = chrono::DateTime::parse_from_rfc3339(raw) {
            return d.timestamp_millis().to_string();
        }
    }
    raw.to_lowercase()
}

fn filter_matches(doc: &Document, conf: &FieldConfig, want: &str) -> bool {
    doc.values(&conf.name).any(|v| v.render().to_lowercase() == want)
}

fn score_doc(matcher: &SkimMatcherV2, doc: &Document, terms: &[String]) -> Option<f32> {
    let mut score = 0.0f32;
    for term in terms {
        let best = doc
            .terms
            .iter()
            .map(|ft| ft.terms().map(|tok| term_score(matcher, tok, term)).fold(0.0f32, f32::max))
            .fold(0.0f32, f32::max);
        if best <= 0.0 { return None; }
        score += best;
    }
    if terms.len() > 1 && doc.terms.iter().any(|ft| ft.values.iter().any(|v| contains_phrase(v, terms))) {
        score += PHRASE_BOOST;
    }
    Some(score)
}

fn term_score(matcher: &SkimMatcherV2, token: &str, term: &str) -> f32 {
    if token == term { return EXACT_BOOST; }
    if token.starts_with(term) { return PREFIX_BOOST; }
    let tl = term.chars().count();
    if tl >= FUZZY_MIN_LEN && token.chars().count() <= tl + FUZZY_MAX_EXTRA && matcher.fuzzy_match(token, term).is_some() {
        return FUZZY_BOOST;
    }
    0.0
}

fn contains_phrase(tokens: &[String], terms: &[String]) -> bool {
    tokens.windows(terms.len()).any(|w| w.iter().zip(terms).all(|(a, b)| a == b))
}
