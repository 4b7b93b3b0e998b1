//! FTS keyword layers
//!
//! Three projections per text: L0 content nouns, L1 nouns + base-form verbs
//! minus a stop-verb set, L2 all content words. English classification is
//! suffix/stopword-driven; Japanese is character-class morphology (kanji and
//! katakana runs carry the nouns, okurigana marks verbs and i-adjectives).
//! The same projection runs at index and query time, so approximate base
//! forms stay self-consistent.

use super::{is_hiragana, is_kanji, is_katakana, FtsLayer, Lang};
use crate::text::normalize;

/// The three keyword projections of one text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordLayers {
    pub nouns: String,
    pub nouns_verbs: String,
    pub keywords_all: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WordClass {
    Noun,
    Verb,
    Adjective,
    Adverb,
    Function,
}

/// Build all three layers for `text`.
pub fn keyword_layers(text: &str, lang: Lang) -> KeywordLayers {
    let normalized = normalize(text);
    let tokens = match lang {
        Lang::En => classify_en(&normalized),
        Lang::Ja => classify_ja(&normalized),
    };

    let mut nouns = Vec::new();
    let mut verbs = Vec::new();
    let mut modifiers = Vec::new();
    for (term, class) in tokens {
        match class {
            WordClass::Noun => nouns.push(term),
            WordClass::Verb => verbs.push(term),
            WordClass::Adjective | WordClass::Adverb => modifiers.push(term),
            WordClass::Function => {}
        }
    }

    let l0 = dedup_join(nouns.iter().map(String::as_str));
    let l1 = dedup_join(nouns.iter().chain(verbs.iter()).map(String::as_str));
    let l2 = dedup_join(
        nouns
            .iter()
            .chain(verbs.iter())
            .chain(modifiers.iter())
            .map(String::as_str),
    );

    KeywordLayers {
        nouns: l0,
        nouns_verbs: l1,
        keywords_all: l2,
    }
}

/// Query-side terms for the selected layer.
pub fn query_terms(text: &str, lang: Lang, layer: FtsLayer) -> Vec<String> {
    let layers = keyword_layers(text, lang);
    let joined = match layer {
        FtsLayer::Nouns => layers.nouns,
        FtsLayer::NounsVerbs => layers.nouns_verbs,
        FtsLayer::All => layers.keywords_all,
    };
    joined.split_whitespace().map(str::to_string).collect()
}

fn dedup_join<'a>(terms: impl Iterator<Item = &'a str>) -> String {
    let mut seen = std::collections::HashSet::new();
    let mut out = String::new();
    for term in terms {
        if term.is_empty() || !seen.insert(term.to_string()) {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(term);
    }
    out
}

// ---------------------------------------------------------------------------
// English
// ---------------------------------------------------------------------------

const STOPWORDS_EN: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "then", "else", "when", "while", "of", "in",
    "on", "at", "by", "for", "to", "from", "with", "without", "into", "onto", "over", "under",
    "as", "is", "am", "are", "was", "were", "be", "been", "being", "it", "its", "this", "that",
    "these", "those", "he", "she", "they", "them", "his", "her", "their", "we", "us", "our",
    "you", "your", "i", "me", "my", "not", "no", "nor", "so", "too", "very", "can", "will",
    "just", "than", "there", "here", "what", "which", "who", "whom", "about", "against",
    "between", "through", "during", "before", "after", "both", "each", "more", "most", "some",
    "such", "only", "own", "same", "also",
];

/// Verbs carrying no retrieval signal, excluded from every layer
const STOP_VERBS_EN: &[&str] = &[
    "have", "has", "had", "do", "does", "did", "make", "makes", "made", "get", "gets", "got",
    "take", "takes", "took", "go", "goes", "went", "come", "comes", "came", "say", "says",
    "said", "use", "used", "uses",
];

fn classify_en(text: &str) -> Vec<(String, WordClass)> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|token| {
            if STOPWORDS_EN.contains(&token) || STOP_VERBS_EN.contains(&token) {
                return (token.to_string(), WordClass::Function);
            }
            if token.chars().all(|c| c.is_ascii_digit()) {
                return (token.to_string(), WordClass::Noun);
            }
            if token.len() > 4 && token.ends_with("ly") {
                return (token.to_string(), WordClass::Adverb);
            }
            if is_adjective_en(token) {
                return (token.to_string(), WordClass::Adjective);
            }
            if let Some(base) = verb_base_en(token) {
                return (base, WordClass::Verb);
            }
            (token.to_string(), WordClass::Noun)
        })
        .collect()
}

fn is_adjective_en(token: &str) -> bool {
    token.len() > 4
        && ["ous", "ful", "ive", "able", "ible", "ic", "ish", "less"]
            .iter()
            .any(|s| token.ends_with(s))
}

/// Crude base form for inflected verbs; `None` when the token does not look
/// like a verb form.
fn verb_base_en(token: &str) -> Option<String> {
    let base = if let Some(stem) = token.strip_suffix("ied") {
        if stem.len() < 2 {
            return None;
        }
        format!("{stem}y")
    } else if token.len() > 5 && token.ends_with("ing") {
        token[..token.len() - 3].to_string()
    } else if token.len() > 4 && token.ends_with("ed") {
        token[..token.len() - 2].to_string()
    } else if token.ends_with("ize") || token.ends_with("ise") || token.ends_with("ify") {
        token.to_string()
    } else {
        return None;
    };

    // stopped → stop
    let bytes = base.as_bytes();
    if bytes.len() >= 2 && bytes[bytes.len() - 1] == bytes[bytes.len() - 2] && !base.ends_with("ss")
    {
        return Some(base[..base.len() - 1].to_string());
    }
    Some(base)
}

// ---------------------------------------------------------------------------
// Japanese
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JaRun {
    Kanji,
    Katakana,
    Hiragana,
    Latin,
    Other,
}

fn ja_run_of(ch: char) -> JaRun {
    if is_kanji(ch) {
        JaRun::Kanji
    } else if is_katakana(ch) && ch != 'ー' {
        JaRun::Katakana
    } else if is_hiragana(ch) {
        JaRun::Hiragana
    } else if ch.is_alphanumeric() {
        JaRun::Latin
    } else {
        JaRun::Other
    }
}

/// Hiragana endings that mark a preceding kanji stem as a verb
const VERB_ENDINGS_JA: &[char] = &['る', 'う', 'く', 'ぐ', 'す', 'つ', 'ぬ', 'ぶ', 'む'];

fn classify_ja(text: &str) -> Vec<(String, WordClass)> {
    // segment into same-class runs, prolonged-sound mark glued to katakana
    let mut runs: Vec<(String, JaRun)> = Vec::new();
    for ch in text.chars() {
        let class = ja_run_of(ch);
        if ch == 'ー' {
            if let Some((last, JaRun::Katakana)) = runs.last_mut().map(|(s, c)| (s, *c)) {
                last.push(ch);
                continue;
            }
        }
        match runs.last_mut() {
            Some((run, last_class)) if *last_class == class => run.push(ch),
            _ => runs.push((ch.to_string(), class)),
        }
    }

    let mut out = Vec::new();
    let mut i = 0;
    while i < runs.len() {
        let (run, class) = &runs[i];
        match class {
            JaRun::Kanji => {
                // kanji run followed by okurigana: single-kanji stems read as
                // verbs or i-adjectives, longer runs are (verbal) nouns
                let next_hira = matches!(runs.get(i + 1), Some((_, JaRun::Hiragana)));
                if next_hira && run.chars().count() == 1 {
                    let tail = &runs[i + 1].0;
                    if tail.ends_with('い') {
                        out.push((format!("{run}い"), WordClass::Adjective));
                    } else if tail.chars().last().is_some_and(|c| VERB_ENDINGS_JA.contains(&c))
                        || tail.ends_with("った")
                        || tail.ends_with("した")
                    {
                        out.push((run.clone(), WordClass::Verb));
                    } else {
                        out.push((run.clone(), WordClass::Noun));
                    }
                } else {
                    out.push((run.clone(), WordClass::Noun));
                }
            }
            JaRun::Katakana => {
                if run.chars().count() >= 2 {
                    out.push((run.clone(), WordClass::Noun));
                }
            }
            JaRun::Latin => {
                if !STOPWORDS_EN.contains(&run.as_str()) {
                    out.push((run.clone(), WordClass::Noun));
                }
            }
            // particles, auxiliaries, punctuation
            JaRun::Hiragana | JaRun::Other => {}
        }
        i += 1;
    }
    out
}
