//! Locale aware text analysis shared by indexing and querying.
//!
//! Documents are analyzed with their own locale and queries with the
//! requested one. Without a locale only lowercasing and tokenization apply.

use once_cell::sync::Lazy;
use regex::Regex;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("static token regex"));

const EN_STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it", "no", "not",
    "of", "on", "or", "s", "such", "that", "the", "their", "then", "there", "these", "they", "this", "to", "was",
    "will", "with",
];

const DE_STOPWORDS: &[&str] = &[
    "aber", "als", "am", "an", "auch", "auf", "aus", "bei", "das", "dass", "dem", "den", "der", "des", "die",
    "ein", "eine", "einem", "einen", "einer", "eines", "es", "für", "fur", "im", "in", "ist", "mit", "nach",
    "nicht", "oder", "sich", "sie", "und", "von", "vor", "war", "wie", "zu", "zum", "zur",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lang {
    Neutral,
    English,
    German,
    Turkic,
    Other,
}

#[derive(Debug, Clone, Copy)]
pub struct Analyzer {
    lang: Lang,
}

/// Primary language subtag of a locale tag, lowercased (`de-AT` -> `de`).
pub fn language(locale: &str) -> String {
    locale.split(['-', '_']).next().unwrap_or("").trim().to_ascii_lowercase()
}

impl Analyzer {
    pub fn for_locale(locale: Option<&str>) -> Self {
        let lang = match locale.map(language).as_deref() {
            None | Some("") => Lang::Neutral,
            Some("en") => Lang::English,
            Some("de") => Lang::German,
            Some("tr") | Some("az") => Lang::Turkic,
            Some(_) => Lang::Other,
        };
        Self { lang }
    }

    /// Lowercase and fold `text` without splitting it.
    pub fn normalize(&self, text: &str) -> String {
        let lowered = match self.lang {
            Lang::Turkic => text.replace('I', "ı").replace('İ', "i").to_lowercase(),
            _ => text.to_lowercase(),
        };
        match self.lang {
            Lang::German => fold_german(&lowered),
            _ => lowered,
        }
    }

    /// Split normalized text into terms, dropping stopwords of the locale.
    pub fn tokens(&self, text: &str) -> Vec<String> {
        let norm = self.normalize(text);
        TOKEN_RE
            .find_iter(&norm)
            .map(|m| m.as_str())
            .filter(|t| !self.is_stopword(t))
            .map(str::to_string)
            .collect()
    }

    fn is_stopword(&self, t: &str) -> bool {
        match self.lang {
            Lang::English => EN_STOPWORDS.contains(&t),
            Lang::German => DE_STOPWORDS.contains(&t),
            _ => false,
        }
    }
}

fn fold_german(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            'ä' => out.push('a'),
            'ö' => out.push('o'),
            'ü' => out.push('u'),
            'ß' => out.push_str("ss"),
            _ => out.push(c),
        }
    }
    out
}
