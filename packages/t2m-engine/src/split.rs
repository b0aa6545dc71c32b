//! Split strategies (spec.md §4.5 Split), grounded on
//! `sqlite_adapter.py::split_by_sentences/split_by_chunks/split_custom`.

use t2m_core::ir::SplitLang;

/// Sentence-tokenise by language-specific terminators, then merge every
/// `max_sentences` (default 1) sentences into one block.
pub fn split_by_sentences(text: &str, lang: SplitLang, max_sentences: usize) -> Vec<String> {
    let terminators: &[char] = match lang {
        SplitLang::Zh => &['。', '!', '?', '！', '？'],
        SplitLang::En => &['.', '!', '?'],
        SplitLang::Auto => &['.', '!', '?', '。', '！', '？'],
    };
    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if terminators.contains(&ch) {
            let trimmed = current.trim().to_string();
            if !trimmed.is_empty() {
                sentences.push(trimmed);
            }
            current.clear();
        }
    }
    let trailing = current.trim().to_string();
    if !trailing.is_empty() {
        sentences.push(trailing);
    }

    let max_sentences = max_sentences.max(1);
    if max_sentences == 1 {
        return sentences;
    }
    sentences
        .chunks(max_sentences)
        .map(|chunk| chunk.join(" "))
        .collect()
}

/// Fixed-size slicing (`chunk_size`) or near-equal partitioning
/// (`num_chunks`), measured in characters.
pub fn split_by_chunks(text: &str, chunk_size: Option<usize>, num_chunks: Option<usize>) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    let size = match (chunk_size, num_chunks) {
        (Some(size), _) if size > 0 => size,
        (_, Some(n)) if n > 0 => chars.len().div_ceil(n),
        _ => chars.len(),
    };
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

/// A markdown-heading split, triggered when the instruction mentions
/// headings or the text contains a `#` line.
pub fn split_by_headings(text: &str) -> Option<Vec<String>> {
    if !text.contains('#') {
        return None;
    }
    let mut blocks: Vec<String> = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.trim_start().starts_with('#') && !current.trim().is_empty() {
            blocks.push(current.trim().to_string());
            current.clear();
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        blocks.push(current.trim().to_string());
    }
    if blocks.len() > 1 {
        Some(blocks)
    } else {
        None
    }
}

/// A list-item split: lines starting with `1.`, `- `, `一、`, etc.
pub fn split_by_list_items(text: &str) -> Option<Vec<String>> {
    let is_list_marker = |line: &str| {
        let trimmed = line.trim_start();
        trimmed.starts_with("- ")
            || trimmed.starts_with("* ")
            || trimmed.starts_with("一、")
            || trimmed.starts_with("二、")
            || trimmed.starts_with("三、")
            || trimmed
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit())
                && (trimmed.contains(". ") || trimmed.contains('、'))
    };
    let items: Vec<String> = text
        .lines()
        .filter(|line| is_list_marker(line))
        .map(|line| line.trim().to_string())
        .collect();
    if items.len() > 1 {
        Some(items)
    } else {
        None
    }
}

/// Texts this short are never worth splitting further (spec.md §4.5
/// Split custom "tiny-text guard").
pub fn is_tiny(text: &str) -> bool {
    text.chars().count() <= 32
}

/// Normalise LLM-proposed split fragments: drop fragments shorter than 2
/// chars, dedupe preserving order, cap to `max_splits`.
pub fn normalize_fragments(fragments: Vec<String>, max_splits: Option<usize>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for f in fragments {
        let trimmed = f.trim().to_string();
        if trimmed.chars().count() < 2 {
            continue;
        }
        if seen.insert(trimmed.clone()) {
            out.push(trimmed);
        }
    }
    if let Some(max) = max_splits {
        out.truncate(max);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentences_are_split_on_terminators() {
        let text = "First sentence. Second sentence? Third sentence!";
        let parts = split_by_sentences(text, SplitLang::En, 1);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "First sentence.");
    }

    #[test]
    fn chunk_size_partitions_text_exactly() {
        let text = "abcdefghij";
        let parts = split_by_chunks(text, Some(4), None);
        assert_eq!(parts, vec!["abcd", "efgh", "ij"]);
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn num_chunks_yields_near_equal_partitions() {
        let text = "abcdefghij";
        let parts = split_by_chunks(text, None, Some(3));
        assert_eq!(parts.len(), 3);
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn heading_split_requires_a_hash() {
        assert!(split_by_headings("plain text").is_none());
        let text = "# Title\nbody\n# Other\nmore";
        let parts = split_by_headings(text).unwrap();
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn normalize_dedupes_and_drops_tiny_fragments() {
        let fragments = vec!["a".into(), "hello".into(), "hello".into(), "world".into()];
        let out = normalize_fragments(fragments, Some(1));
        assert_eq!(out, vec!["hello".to_string()]);
    }
}
