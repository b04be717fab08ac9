//! Boundary deduplication for overlapping chunks.
//!
//! Consecutive chunks share an audio overlap, so their transcriptions
//! usually repeat a few words at the boundary. The duplicated run is
//! trimmed by aligning the tail of the previous text against the head of
//! the next one; recognition is never re-run.

/// Removes from the start of `text` the longest word run that also ends
/// `prev_tail`.
///
/// Matching is case-insensitive and ignores surrounding punctuation. At
/// most `max_words` words are considered, and a single-word match shorter
/// than `min_word_len` characters is left alone so that articles and
/// particles do not trigger false trims.
pub fn trim_overlap(prev_tail: &str, text: &str, max_words: usize, min_word_len: usize) -> String {
    if prev_tail.is_empty() || text.is_empty() || max_words == 0 {
        return text.to_string();
    }

    let prev_words: Vec<&str> = prev_tail.split_whitespace().collect();
    let next_words: Vec<&str> = text.split_whitespace().collect();

    let limit = max_words.min(prev_words.len()).min(next_words.len());

    // Longest suffix of prev_words equal to a prefix of next_words.
    let mut matched = 0;
    for k in (1..=limit).rev() {
        let suffix = &prev_words[prev_words.len() - k..];
        let prefix = &next_words[..k];
        if suffix
            .iter()
            .zip(prefix.iter())
            .all(|(a, b)| normalize(a) == normalize(b))
        {
            matched = k;
            break;
        }
    }

    if matched == 0 {
        return text.to_string();
    }
    if matched == 1 && normalize(next_words[0]).chars().count() < min_word_len {
        return text.to_string();
    }

    next_words[matched..].join(" ")
}

fn normalize(word: &str) -> String {
    word.trim_matches(|c: char| c.is_ascii_punctuation() || matches!(c, '。' | '、' | '「' | '」'))
        .to_lowercase()
}
