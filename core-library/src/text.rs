//! Search-text normalization shared by import and the query compiler.

use regex::Regex;
use std::sync::LazyLock;

static CHORD_ELEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<chord\b[^>]*>.*?</chord>|<chord\b[^>]*/>").unwrap());

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Lowercase, fold every non-alphanumeric run to one space, trim.
pub fn normalize(s: &str) -> String {
    fold(s, |_| false)
}

/// Like [`normalize`] but keeps the `*` and `.` wildcards of a search pattern.
pub fn normalize_pattern(s: &str) -> String {
    fold(s, |c| c == '*' || c == '.')
}

fn fold(s: &str, keep: impl Fn(char) -> bool) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;
    for c in s.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() || keep(c) {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else {
            pending_space = true;
        }
    }
    out
}

/// Song markup reduced to its lyric text; chord annotations are dropped.
pub fn strip_markup(markup: &str) -> String {
    let without_chords = CHORD_ELEMENT.replace_all(markup, " ");
    TAG.replace_all(&without_chords, " ").into_owned()
}

/// Whether the markup carries chord annotations
pub fn has_chord_markup(markup: &str) -> bool {
    CHORD_ELEMENT.is_match(markup)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Silent  Night! "), "silent night");
        assert_eq!(normalize("O'Holy-Night"), "o holy night");
        assert_eq!(normalize("Şükürler Olsun"), "şükürler olsun");
        assert_eq!(normalize("!!!"), "");
    }

    #[test]
    fn test_normalize_pattern_keeps_wildcards() {
        assert_eq!(normalize_pattern("Sil*nt"), "sil*nt");
        assert_eq!(normalize_pattern("silen."), "silen.");
        assert_eq!(normalize_pattern("a, b"), "a b");
    }

    #[test]
    fn test_strip_markup() {
        let xml = "<song><verse><chord>G</chord>Silent <chord name=\"D\"/>night</verse></song>";
        assert_eq!(normalize(&strip_markup(xml)), "silent night");
        assert!(has_chord_markup(xml));
        assert!(!has_chord_markup("<verse>plain</verse>"));
    }
}
