//! Cleanup applied to text extracted from PDFs before it is chunked.
//!
//! PDF extraction yields one line per visual line, with page numbers,
//! running headers, URLs and e-mail addresses mixed into the prose. The
//! cleanup drops those and flattens the result into a single line of text
//! that can be split into sentences.

use std::sync::LazyLock;

use regex::Regex;

/// Lines with this many characters or fewer are treated as layout noise
/// (headers, captions, stray labels).
pub const MIN_LINE_CHARS: usize = 10;

/// URLs, bare `www` hosts, then e-mail addresses. Applied one after the
/// other, so an address whose domain starts with `www` keeps its local part.
static NOISE_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [r"http\S+", r"www\S+", r"\S+@\S+"]
        .map(|pattern| Regex::new(pattern).expect("noise pattern is valid"))
});

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

fn is_page_number(line: &str) -> bool {
    !line.is_empty() && line.bytes().all(|b| b.is_ascii_digit())
}

/// Flatten extracted text into a single cleaned line.
///
/// # Examples
///
/// ```
/// use docseek::text_util::clean_extracted_text;
///
/// let raw = "Rust is a systems language.\n12\nSee https://rust-lang.org for more.\n";
/// assert_eq!(
///     clean_extracted_text(raw),
///     "Rust is a systems language. See for more."
/// );
/// ```
pub fn clean_extracted_text(raw: &str) -> String {
    let joined = raw
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty())
        .filter(|line| !is_page_number(line))
        .filter(|line| line.chars().count() > MIN_LINE_CHARS)
        .collect::<Vec<_>>()
        .join(" ");

    let without_noise = NOISE_PATTERNS
        .iter()
        .fold(joined, |text, pattern| pattern.replace_all(&text, "").into_owned());
    WHITESPACE_RUN
        .replace_all(&without_noise, " ")
        .trim()
        .to_string()
}

/// Split cleaned text into sentences on `.`, keeping the period.
///
/// Fragments without any alphanumeric character (the dots of an ellipsis,
/// trailing whitespace) are dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
    text.split_inclusive('.')
        .map(str::trim)
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .map(str::to_string)
        .collect()
}
