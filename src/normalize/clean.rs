//! Ordered pipeline of pure text transforms for raw extracted documents.
//!
//! Each transform is a `&str -> Cow<'_, str>` function that only allocates
//! when it changes something, and each is unit-tested on its own. The
//! pipeline order is significant: page-artifact stripping runs before
//! dehyphenation (a page number may sit between the two halves of a split
//! word), and whitespace collapsing always runs last.

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

// ── Individual transforms ──────────────────────────────────────────────

/// Remove null bytes and U+FFFD replacement characters left behind by
/// broken text extraction, and fold CR/CRLF line endings to plain LF so
/// every later transform sees one newline convention.
pub(crate) fn strip_binary_artifacts(input: &str) -> Cow<'_, str> {
    if !input.chars().any(|c| matches!(c, '\0' | '\u{FFFD}' | '\r')) {
        return Cow::Borrowed(input);
    }
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\0' | '\u{FFFD}' => {}
            '\r' => {
                if chars.peek() != Some(&'\n') {
                    out.push('\n');
                }
            }
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

/// Normalize bullet glyphs to a plain dash so list items survive flattening.
pub(crate) fn normalize_bullets(input: &str) -> Cow<'_, str> {
    const BULLETS: &[char] = &['\u{2022}', '\u{25E6}', '\u{25AA}', '\u{25CF}', '\u{2023}', '\u{00B7}', '\u{2219}'];
    if !input.chars().any(|c| BULLETS.contains(&c)) {
        return Cow::Borrowed(input);
    }
    Cow::Owned(
        input
            .chars()
            .map(|c| if BULLETS.contains(&c) { '-' } else { c })
            .collect(),
    )
}

/// Drop lines that consist solely of a page number.
pub(crate) fn strip_page_number_lines(input: &str) -> Cow<'_, str> {
    static PAGE_NUMBER_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^[ \t]*\d{1,4}[ \t]*$\n?").unwrap());
    PAGE_NUMBER_RE.replace_all(input, "")
}

/// Drop localized "Page N (of M)" headers and footers.
///
/// Matches English and Spanish variants: "Page 3", "Page 3 of 12",
/// "Página 3 de 12", "Pág. 3".
pub(crate) fn strip_page_headers(input: &str) -> Cow<'_, str> {
    static PAGE_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?mi)^[ \t]*(?:page|p[áa]gina|p[áa]g\.?)[ \t]+\d{1,4}(?:[ \t]+(?:of|de)[ \t]+\d{1,4})?[ \t]*$\n?",
        )
        .unwrap()
    });
    PAGE_HEADER_RE.replace_all(input, "")
}

/// Drop table-of-contents lines: text followed by a run of dots and a page
/// number ("Introducción ........ 7").
pub(crate) fn strip_toc_lines(input: &str) -> Cow<'_, str> {
    static TOC_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^[^\n]{0,120}?(?:\.[ \t]*){3,}[ \t]*\d{1,4}[ \t]*$\n?").unwrap()
    });
    TOC_RE.replace_all(input, "")
}

/// Rejoin words split by a trailing hyphen across a line break
/// ("veloci-\ndad" → "velocidad").
pub(crate) fn rejoin_hyphenated_breaks(input: &str) -> Cow<'_, str> {
    static HYPHEN_BREAK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\p{L})-[ \t]*\n[ \t]*(\p{L})").unwrap());
    HYPHEN_BREAK_RE.replace_all(input, "$1$2")
}

/// Collapse artificially letter-spaced text ("h o l a" → "hola").
///
/// Runs of four or more single letters separated by single spaces are a
/// PDF-extraction artifact, not prose; real single-letter word sequences of
/// that length are vanishingly rare in the supported languages.
pub(crate) fn collapse_letter_spacing(input: &str) -> Cow<'_, str> {
    static SPACED_RUN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\b\p{L}(?: \p{L}){3,}\b").unwrap());
    SPACED_RUN_RE.replace_all(input, |caps: &regex::Captures<'_>| {
        caps[0].chars().filter(|c| !c.is_whitespace()).collect::<String>()
    })
}

/// Collapse runs of spaces/tabs, strip trailing whitespace per line, and cap
/// consecutive blank lines at one.
pub(crate) fn collapse_whitespace(input: &str) -> Cow<'_, str> {
    static SPACE_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]{2,}").unwrap());
    static TRAILING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)[ \t]+$").unwrap());
    static BLANK_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

    let spaces = SPACE_RUN_RE.replace_all(input, " ");
    let trailing = TRAILING_RE.replace_all(&spaces, "");
    let blanks = BLANK_RUN_RE.replace_all(&trailing, "\n\n");
    let result = blanks.trim();

    if result == input {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(result.to_string())
    }
}

// ── Pipeline ───────────────────────────────────────────────────────────

/// Clean raw extracted text into normalized prose ready for chunking.
///
/// Transform order:
/// 1. strip null bytes and replacement characters;
/// 2. normalize bullet glyphs to a plain dash;
/// 3. strip page-number-only lines;
/// 4. strip localized "Page N (of M)" headers/footers;
/// 5. strip table-of-contents dot-leader lines;
/// 6. rejoin hyphenated line breaks (after page artifacts are gone, so a
///    word split across a page boundary heals too);
/// 7. collapse letter-spaced runs;
/// 8. collapse whitespace and cap blank lines.
pub fn clean_raw_text(raw: &str) -> String {
    let step = strip_binary_artifacts(raw);
    let step = normalize_bullets(&step);
    let step = strip_page_number_lines(&step);
    let step = strip_page_headers(&step);
    let step = strip_toc_lines(&step);
    let step = rejoin_hyphenated_breaks(&step);
    let step = collapse_letter_spacing(&step);
    collapse_whitespace(&step).into_owned()
}
