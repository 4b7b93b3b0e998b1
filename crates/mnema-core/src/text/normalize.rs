//! Normalisation for persistence and search
//!
//! NFKC does the heavy lifting: fullwidth ASCII folds to halfwidth, and
//! halfwidth kana recomposes to fullwidth with dakuten/handakuten merged
//! back into single code points. The rest is stripping and collapsing.

use unicode_normalization::UnicodeNormalization;

/// Normalise text the same way for indexing and querying.
///
/// NFKC → lowercase → control/emoji/decoration strip → whitespace collapse.
pub fn normalize(text: &str) -> String {
    let folded: String = text.nfkc().collect();

    let mut out = String::with_capacity(folded.len());
    let mut last_was_space = true;
    for ch in folded.chars() {
        if ch.is_uppercase() {
            // lowercasing may expand to multiple chars
            for lowered in ch.to_lowercase() {
                push_normal(&mut out, lowered, &mut last_was_space);
            }
        } else {
            push_normal(&mut out, ch, &mut last_was_space);
        }
    }

    out.trim_end().to_string()
}

fn push_normal(out: &mut String, ch: char, last_was_space: &mut bool) {
    if ch.is_control() || is_emoji(ch) || is_decoration(ch) {
        return;
    }
    if ch.is_whitespace() {
        if !*last_was_space {
            out.push(' ');
            *last_was_space = true;
        }
        return;
    }
    out.push(ch);
    *last_was_space = false;
}

/// Emoji and pictographic blocks stripped from persisted text
fn is_emoji(ch: char) -> bool {
    matches!(ch,
        '\u{1F000}'..='\u{1FAFF}'
        | '\u{2600}'..='\u{27BF}'
        | '\u{2190}'..='\u{21FF}'
        | '\u{FE00}'..='\u{FE0F}'
        | '\u{200D}'
        | '\u{20E3}'
    )
}

/// Decorative symbols that carry no search value
fn is_decoration(ch: char) -> bool {
    matches!(ch,
        '\u{2500}'..='\u{257F}'   // box drawing
        | '\u{2580}'..='\u{259F}' // block elements
        | '\u{25A0}'..='\u{25FF}' // geometric shapes
        | '\u{2022}'              // bullet
        | '★' | '☆' | '※'
    )
}

/// Rough token estimate without a model tokeniser.
///
/// CJK runs count roughly one token per character, Latin text about one per
/// four characters.
pub fn approx_token_count(text: &str) -> u32 {
    let mut cjk = 0usize;
    let mut other = 0usize;
    for ch in text.chars() {
        if super::is_japanese_char(ch) {
            cjk += 1;
        } else if !ch.is_whitespace() {
            other += 1;
        }
    }
    (cjk + other.div_ceil(4)) as u32
}
