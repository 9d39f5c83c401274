//! Quality heuristics deciding whether a chunk is worth storing.
//!
//! Embeddings and lexical index entries for near-empty or non-prose spans
//! waste storage and degrade ranking quality, so chunks are screened before
//! they ever reach deduplication or delivery.

use regex::Regex;
use std::sync::LazyLock;

/// Minimum chunk length in characters.
const MIN_CHARS: usize = 80;
/// Minimum chunk word count.
const MIN_WORDS: usize = 8;
/// Maximum tolerated digit-to-length ratio; above this the chunk is treated
/// as tabular/numeric noise.
const MAX_DIGIT_RATIO: f32 = 0.4;

/// Bare section headings ("Chapter 3", "Índice", "Capítulo 2.") that
/// sometimes survive cleaning as whole chunks.
static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:chapter|section|index|appendix|contents|cap[íi]tulo|secci[óo]n|[íi]ndice|anexo|ap[ée]ndice|tema|unidad)\s*\d*\.?$",
    )
    .unwrap()
});

/// Reason a chunk was rejected by the quality heuristics.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChunkRejection {
    #[error("chunk too short: {chars} chars (minimum {MIN_CHARS})")]
    TooShort { chars: usize },
    #[error("chunk has too few words: {words} (minimum {MIN_WORDS})")]
    TooFewWords { words: usize },
    #[error("chunk is a bare section heading")]
    BareHeading,
    #[error("chunk is digit-heavy: ratio {ratio:.2} exceeds {MAX_DIGIT_RATIO}")]
    DigitHeavy { ratio: f32 },
}

/// Validate a flattened chunk against the quality heuristics.
pub fn validate_chunk(text: &str) -> Result<(), ChunkRejection> {
    let trimmed = text.trim();

    let chars = trimmed.chars().count();
    if chars < MIN_CHARS {
        return Err(ChunkRejection::TooShort { chars });
    }

    let words = trimmed.split_whitespace().count();
    if words < MIN_WORDS {
        return Err(ChunkRejection::TooFewWords { words });
    }

    if HEADING_RE.is_match(trimmed) {
        return Err(ChunkRejection::BareHeading);
    }

    let digits = trimmed.chars().filter(char::is_ascii_digit).count();
    let ratio = digits as f32 / chars as f32;
    if ratio > MAX_DIGIT_RATIO {
        return Err(ChunkRejection::DigitHeavy { ratio });
    }

    Ok(())
}

/// Convenience predicate over [`validate_chunk`].
pub fn is_valid_chunk(text: &str) -> bool {
    validate_chunk(text).is_ok()
}
