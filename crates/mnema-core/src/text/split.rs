//! Deterministic splitters: chunk windows and natural-boundary batches
//!
//! Both are pure functions of their inputs so chunk ids and memify batches
//! reproduce across runs and platforms.

/// Sentence enders, highest priority first (Japanese and Latin).
const SENTENCE_ENDERS: &[char] = &['。', '！', '？', '.', '\n', '!', '?'];

/// Fallback boundaries when no sentence ends inside the window.
const SOFT_BOUNDARIES: &[char] = &['、', ',', ' ', '　'];

/// Split a document into fixed windows of `chunk_chars` with `overlap_chars`
/// of trailing context repeated at the head of the next window.
pub fn chunk_text(text: &str, chunk_chars: usize, overlap_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() || chunk_chars == 0 {
        return Vec::new();
    }
    if chars.len() <= chunk_chars {
        return vec![text.to_string()];
    }

    let step = chunk_chars.saturating_sub(overlap_chars).max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let end = (start + chunk_chars).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Split `text` into batches of roughly `target_chars`, cutting at natural
/// Japanese/Latin boundaries within ±20 % of the target, with
/// `overlap_percent` of each cut repeated in the next batch. Batches shorter
/// than `min_chars` are folded into their predecessor.
pub fn split_natural(
    text: &str,
    target_chars: usize,
    overlap_percent: usize,
    min_chars: usize,
) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() || target_chars == 0 {
        return Vec::new();
    }
    if chars.len() <= target_chars {
        return vec![text.to_string()];
    }

    let lo_margin = target_chars - target_chars / 5;
    let hi_margin = target_chars + target_chars / 5;

    let mut batches: Vec<String> = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let remaining = chars.len() - start;
        if remaining <= hi_margin {
            let tail: String = chars[start..].iter().collect();
            if remaining < min_chars && !batches.is_empty() {
                // too small to stand alone
                let last = batches.last_mut().expect("non-empty");
                last.push_str(&tail);
            } else {
                batches.push(tail);
            }
            break;
        }

        let window_lo = start + lo_margin.max(1);
        let window_hi = (start + hi_margin).min(chars.len());
        let cut = find_boundary(&chars, window_lo, window_hi)
            .unwrap_or_else(|| (start + target_chars).min(chars.len()));

        batches.push(chars[start..cut].iter().collect());

        let batch_len = cut - start;
        let overlap = batch_len * overlap_percent / 100;
        start = cut.saturating_sub(overlap).max(start + 1);
    }
    batches
}

/// Last natural boundary inside `[lo, hi)`, sentence enders first.
fn find_boundary(chars: &[char], lo: usize, hi: usize) -> Option<usize> {
    if lo >= hi || hi > chars.len() {
        return None;
    }
    for boundary_set in [SENTENCE_ENDERS, SOFT_BOUNDARIES] {
        for idx in (lo..hi).rev() {
            if boundary_set.contains(&chars[idx]) {
                return Some(idx + 1);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_short_text_single() {
        assert_eq!(chunk_text("hello", 100, 10), vec!["hello".to_string()]);
    }

    #[test]
    fn test_chunk_contiguous_with_overlap() {
        let text: String = ('a'..='z').cycle().take(250).collect();
        let chunks = chunk_text(&text, 100, 20);
        assert!(chunks.len() >= 3);
        // each successive chunk starts 80 chars later
        let first: Vec<char> = chunks[0].chars().collect();
        let second: Vec<char> = chunks[1].chars().collect();
        assert_eq!(&first[80..100], &second[0..20]);
        // coverage: total non-overlapped chars equals input length
        let covered = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| {
                if i == 0 {
                    c.chars().count()
                } else {
                    c.chars().count().saturating_sub(20)
                }
            })
            .sum::<usize>();
        assert_eq!(covered, 250);
    }

    #[test]
    fn test_split_natural_prefers_sentence_enders() {
        let sentence = "これは一つの文です。";
        let text = sentence.repeat(40); // 400 chars
        let batches = split_natural(&text, 100, 20, 10);
        assert!(batches.len() >= 4);
        for batch in &batches[..batches.len() - 1] {
            assert!(
                batch.ends_with('。'),
                "batch should end at a sentence ender: {batch:?}"
            );
        }
    }

    #[test]
    fn test_split_natural_overlap_covers_input() {
        let text = "word ".repeat(2000); // 10 000 chars
        let batches = split_natural(&text, 1000, 20, 100);
        assert!(batches.len() >= 2);
        let total: usize = batches.iter().map(|b| b.chars().count()).sum();
        assert!(total >= text.chars().count());
    }

    #[test]
    fn test_split_natural_small_input_is_bulk() {
        let batches = split_natural("short text.", 1000, 20, 5);
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn test_split_natural_tiny_tail_folds_back() {
        let sentence = "A sentence that ends here. ";
        let text = sentence.repeat(42);
        let batches = split_natural(&text, 300, 0, 200);
        let tail_len = batches.last().unwrap().chars().count();
        assert!(tail_len >= 200, "tail of {tail_len} chars should have been folded");
        let total: usize = batches.iter().map(|b| b.chars().count()).sum();
        assert_eq!(total, text.chars().count());
    }

    #[test]
    fn test_splitters_deterministic() {
        let text = "知識。".repeat(500);
        assert_eq!(
            split_natural(&text, 200, 20, 50),
            split_natural(&text, 200, 20, 50)
        );
        assert_eq!(chunk_text(&text, 120, 30), chunk_text(&text, 120, 30));
    }
}
