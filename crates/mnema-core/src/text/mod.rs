//! Tokeniser / Normaliser
//!
//! Language-aware keyword projection, normalisation for persistence and
//! search, content extraction, and deterministic splitters. Queries pass
//! through the same normalisation as persisted text so FTS and vector
//! retrieval stay consistent.

mod extract;
mod keywords;
mod normalize;
mod split;

use serde::{Deserialize, Serialize};

pub use extract::{extract_content, html_to_text, markdown_to_text, strip_boilerplate, SourceKind};
pub use keywords::{keyword_layers, query_terms, KeywordLayers};
pub use normalize::{approx_token_count, normalize};
pub use split::{chunk_text, split_natural};

/// Supported content languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    #[default]
    En,
    Ja,
}

impl Lang {
    /// Language from the caller's `is_en` flag.
    pub fn from_is_en(is_en: bool) -> Self {
        if is_en { Lang::En } else { Lang::Ja }
    }

    pub fn is_en(&self) -> bool {
        matches!(self, Lang::En)
    }

    /// Guess from script composition: any meaningful kana/kanji share → Ja.
    pub fn detect(text: &str) -> Self {
        let mut cjk = 0usize;
        let mut total = 0usize;
        for ch in text.chars() {
            if ch.is_alphanumeric() {
                total += 1;
                if is_japanese_char(ch) {
                    cjk += 1;
                }
            }
        }
        if total > 0 && cjk * 10 >= total {
            Lang::Ja
        } else {
            Lang::En
        }
    }
}

/// The three FTS keyword projections indexed per chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FtsLayer {
    /// L0: content nouns only
    #[default]
    Nouns,
    /// L1: nouns plus base-form verbs
    NounsVerbs,
    /// L2: all content words
    All,
}

impl FtsLayer {
    /// Column name in the chunk FTS index.
    pub fn column(&self) -> &'static str {
        match self {
            FtsLayer::Nouns => "nouns",
            FtsLayer::NounsVerbs => "nouns_verbs",
            FtsLayer::All => "keywords_all",
        }
    }
}

pub(crate) fn is_kanji(ch: char) -> bool {
    matches!(ch, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' | '々' | '〆')
}

pub(crate) fn is_hiragana(ch: char) -> bool {
    matches!(ch, '\u{3040}'..='\u{309F}')
}

pub(crate) fn is_katakana(ch: char) -> bool {
    matches!(ch, '\u{30A0}'..='\u{30FF}' | '\u{31F0}'..='\u{31FF}')
}

pub(crate) fn is_japanese_char(ch: char) -> bool {
    is_kanji(ch) || is_hiragana(ch) || is_katakana(ch)
}
