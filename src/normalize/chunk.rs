//! Splitting normalized text into overlapping retrieval-sized windows.
//!
//! Windows are measured in characters. Each cut prefers a paragraph break,
//! then a sentence boundary, before falling back to a hard cut; consecutive
//! windows overlap so no semantic unit is fully lost at a boundary.

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

/// A boundary candidate is only taken when it lands past this fraction of
/// the window, so a paragraph break near the window start cannot produce a
/// degenerate sliver.
const MIN_CUT_FRACTION: usize = 2;

/// Split normalized text into overlapping windows of roughly
/// `target_chars` characters with `overlap_chars` of overlap.
///
/// Guarantees:
/// - every returned window is non-empty (trimmed);
/// - the scan always makes forward progress, regardless of overlap;
/// - text shorter than one window is returned as a single chunk.
pub fn split_into_windows(text: &str, target_chars: usize, overlap_chars: usize) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() || target_chars == 0 {
        return Vec::new();
    }

    // Byte offset of every char, plus the end sentinel, so windows can be
    // sliced without ever landing inside a multi-byte character.
    let offsets: Vec<usize> = trimmed
        .char_indices()
        .map(|(byte, _)| byte)
        .chain(std::iter::once(trimmed.len()))
        .collect();
    let total_chars = offsets.len() - 1;

    if total_chars <= target_chars {
        return vec![trimmed.to_string()];
    }

    let mut windows = Vec::new();
    let mut start = 0usize;

    loop {
        let end = (start + target_chars).min(total_chars);
        let cut = if end == total_chars {
            end
        } else {
            pick_cut(trimmed, &offsets, start, end)
        };

        let window = trimmed[offsets[start]..offsets[cut]].trim();
        if !window.is_empty() {
            windows.push(window.to_string());
        }

        if cut >= total_chars {
            break;
        }
        // Step back by the overlap, but never behind the previous start.
        start = cut.saturating_sub(overlap_chars).max(start + 1);
    }

    windows
}

/// Choose the cut point (exclusive char index) for a window spanning
/// `[start, end)`: last paragraph break past the window midpoint, else last
/// sentence boundary past the midpoint, else a hard cut at `end`.
fn pick_cut(text: &str, offsets: &[usize], start: usize, end: usize) -> usize {
    let min_cut = start + (end - start) / MIN_CUT_FRACTION;
    let slice = &text[offsets[start]..offsets[end]];

    if let Some(pos) = slice.rfind("\n\n") {
        let cut = char_index_at(offsets, offsets[start] + pos);
        if cut > min_cut {
            return cut;
        }
    }

    if let Some(cut) = last_sentence_end(slice, offsets, start) {
        if cut > min_cut {
            return cut;
        }
    }

    end
}

/// Char index (exclusive) just after the last sentence-ending punctuation
/// followed by whitespace within the slice, if any.
fn last_sentence_end(slice: &str, offsets: &[usize], start: usize) -> Option<usize> {
    let slice_base = offsets[start];
    let mut last: Option<usize> = None;
    let mut prev: Option<char> = None;

    for (byte, c) in slice.char_indices() {
        if let Some(prev_char) = prev {
            if matches!(prev_char, '.' | '!' | '?' | '…') && c.is_whitespace() {
                // Cut right after the punctuation character.
                last = Some(char_index_at(offsets, slice_base + byte));
            }
        }
        prev = Some(c);
    }
    last
}

/// Translate an absolute byte offset back to its char index.
fn char_index_at(offsets: &[usize], byte: usize) -> usize {
    offsets
        .binary_search(&byte)
        .unwrap_or_else(|insertion| insertion)
}

/// Flatten a chunk to single-line text for storage and embedding: paragraph
/// breaks and newlines become single spaces. Chunk identity (the content
/// hash) and the embedding both treat the chunk as flat text.
pub fn clean_chunk_text(chunk: &str) -> String {
    static WS_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
    match WS_RUN_RE.replace_all(chunk.trim(), " ") {
        Cow::Borrowed(text) => text.to_string(),
        Cow::Owned(text) => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence(n: usize) -> String {
        format!("Esta es la frase número {n} del documento de prueba.")
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = split_into_windows("un texto corto", 1_000, 200);
        assert_eq!(chunks, vec!["un texto corto".to_string()]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(split_into_windows("   \n ", 1_000, 200).is_empty());
    }

    #[test]
    fn long_text_produces_overlapping_windows() {
        let text = (0..40).map(sentence).collect::<Vec<_>>().join(" ");
        let chunks = split_into_windows(&text, 400, 100);
        assert!(chunks.len() > 1);

        // Overlap: each window repeats its predecessor's tail. The tail is
        // shorter than the configured overlap, so it must appear verbatim.
        for pair in chunks.windows(2) {
            let tail: String = pair[0].chars().rev().take(50).collect::<String>();
            let tail: String = tail.chars().rev().collect();
            assert!(
                pair[1].contains(tail.trim()),
                "expected window to repeat its predecessor's tail: {:?}",
                tail
            );
        }
    }

    #[test]
    fn prefers_paragraph_breaks() {
        let first = "Primer párrafo con contenido suficiente para ocupar espacio en la ventana de prueba.";
        let second = "Segundo párrafo igualmente largo que debería quedar en el siguiente fragmento del documento.";
        let text = format!("{first}\n\n{second}");
        let chunks = split_into_windows(&text, 120, 20);
        assert!(chunks[0].ends_with("prueba."));
    }

    #[test]
    fn prefers_sentence_boundaries_over_hard_cuts() {
        let text = (0..10).map(sentence).collect::<Vec<_>>().join(" ");
        let chunks = split_into_windows(&text, 150, 30);
        assert!(chunks[0].ends_with('.'), "chunk was: {:?}", chunks[0]);
    }

    #[test]
    fn makes_progress_with_pathological_overlap() {
        // Overlap close to the target must not stall the scan.
        let text = "palabra ".repeat(300);
        let chunks = split_into_windows(&text, 100, 99);
        assert!(!chunks.is_empty());
        assert!(chunks.len() < 3_000, "scan must terminate quickly");
    }

    #[test]
    fn windows_respect_multibyte_boundaries() {
        let text = "ñandú y camión con acentuación ".repeat(60);
        let chunks = split_into_windows(&text, 100, 20);
        // Slicing inside a multi-byte char would have panicked above.
        assert!(chunks.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn flattens_paragraphs_to_single_line() {
        let chunk = "Primera línea.\n\nSegunda línea.\ntercera";
        assert_eq!(
            clean_chunk_text(chunk),
            "Primera línea. Segunda línea. tercera"
        );
    }

    #[test]
    fn flatten_trims_and_collapses_runs() {
        assert_eq!(clean_chunk_text("  a \t b \n c  "), "a b c");
    }
}
