//! Filename sanitization for document titles, folder names and user-supplied labels.

use regex::Regex;
use std::sync::OnceLock;

/// Default upper bound for a generated filename, including the timestamp prefix and extension.
pub const DEFAULT_MAX_LENGTH: usize = 200;

/// Characters reserved by callers for a `YYYY-MM-DD-HHMMSS_` prefix and `.txt` suffix.
const RESERVED_LENGTH: usize = 21;

const FALLBACK_NAME: &str = "untitled";

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("valid regex"))
}

fn disallowed_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w.\-]+").expect("valid regex"))
}

fn separator_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[_\s]+").expect("valid regex"))
}

/// Convert arbitrary text into a single safe path segment.
///
/// Traversal markers are rejected on the full name, before it is truncated to
/// `max_length - 21` characters (one character minimum). The result is never empty
/// and never contains `/`, `\` or `..`.
///
/// ```
/// use docsentry::sanitize::sanitize_filename;
///
/// assert_eq!(sanitize_filename("My Document: Draft #1", 200), "My_Document_Draft_1");
/// assert_eq!(sanitize_filename("../../etc/passwd", 200), "untitled");
/// ```
pub fn sanitize_filename(title: &str, max_length: usize) -> String {
    let safe = unsafe_chars().replace_all(title, "_");
    let safe = disallowed_runs().replace_all(&safe, "_");
    let safe = separator_runs().replace_all(&safe, "_");
    let allowed_length = max_length.saturating_sub(RESERVED_LENGTH).max(1);
    let fallback = || FALLBACK_NAME.chars().take(allowed_length).collect::<String>();

    let safe = safe.trim_matches('_');
    if is_rejected(safe) {
        return fallback();
    }

    let truncated: String = safe.chars().take(allowed_length).collect();
    let truncated = truncated.trim_matches('_');
    if is_rejected(truncated) {
        return fallback();
    }

    truncated.to_string()
}

fn is_rejected(name: &str) -> bool {
    name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\')
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_replaces_unsafe_characters() {
        assert_eq!(
            sanitize_filename("My Document: Draft #1", DEFAULT_MAX_LENGTH),
            "My_Document_Draft_1"
        );
        assert_eq!(sanitize_filename("a<b>c|d?e*f", DEFAULT_MAX_LENGTH), "a_b_c_d_e_f");
        assert_eq!(sanitize_filename("tab\there", DEFAULT_MAX_LENGTH), "tab_here");
    }

    #[test]
    fn test_keeps_dots_and_hyphens() {
        assert_eq!(
            sanitize_filename("release-notes.v2", DEFAULT_MAX_LENGTH),
            "release-notes.v2"
        );
    }

    #[test]
    fn test_path_traversal_becomes_untitled() {
        assert_eq!(sanitize_filename("../../etc/passwd", DEFAULT_MAX_LENGTH), "untitled");
        assert_eq!(sanitize_filename("..", DEFAULT_MAX_LENGTH), "untitled");
        assert_eq!(sanitize_filename("notes..txt", DEFAULT_MAX_LENGTH), "untitled");
        assert_eq!(sanitize_filename(".", DEFAULT_MAX_LENGTH), "untitled");
    }

    #[test]
    fn test_empty_and_symbol_only_inputs() {
        assert_eq!(sanitize_filename("", DEFAULT_MAX_LENGTH), "untitled");
        assert_eq!(sanitize_filename("   ", DEFAULT_MAX_LENGTH), "untitled");
        assert_eq!(sanitize_filename("///", DEFAULT_MAX_LENGTH), "untitled");
        assert_eq!(sanitize_filename("!!!", DEFAULT_MAX_LENGTH), "untitled");
    }

    #[test]
    fn test_truncates_to_reserved_length() {
        let long = "A".repeat(300);
        let result = sanitize_filename(&long, DEFAULT_MAX_LENGTH);
        assert_eq!(result.len(), 179);

        let result = sanitize_filename(&long, 50);
        assert_eq!(result.len(), 29);
    }

    #[test]
    fn test_traversal_marker_past_truncation_point() {
        let name = format!("{}..", "a".repeat(178));
        assert_eq!(sanitize_filename(&name, DEFAULT_MAX_LENGTH), "untitled");
    }

    #[test]
    fn test_unicode_word_characters_survive() {
        assert_eq!(sanitize_filename("Résumé 2025", DEFAULT_MAX_LENGTH), "Résumé_2025");
    }

    #[quickcheck]
    fn prop_sanitize_is_total(input: String) -> bool {
        let result = sanitize_filename(&input, DEFAULT_MAX_LENGTH);
        !result.is_empty()
            && !result.contains('/')
            && !result.contains('\\')
            && !result.contains("..")
            && result.chars().count() <= DEFAULT_MAX_LENGTH - 21
            && Regex::new(r"^[\w.\-]+$").expect("valid regex").is_match(&result)
    }

    #[quickcheck]
    fn prop_sanitize_is_idempotent(input: String) -> bool {
        let once = sanitize_filename(&input, DEFAULT_MAX_LENGTH);
        sanitize_filename(&once, DEFAULT_MAX_LENGTH) == once
    }
}
