const MAX_TITLE_CHARS: usize = 150;
const FALLBACK_NAME: &str = "video";

fn is_allowed(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-' | ' ')
}

fn trim_copy_utf8_safe(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        Some((cut, _)) => input[..cut].to_string(),
        None => input.to_string(),
    }
}

/// Turns a remote title into a filesystem-safe file stem.
///
/// Characters outside `[A-Za-z0-9_.\- ]` are dropped, the result is cut to at
/// most 150 characters, spaces become underscores, and an empty result falls
/// back to `video`. Applying it twice yields the same string.
pub fn sanitize_title(title: &str) -> String {
    let kept: String = title.chars().filter(|c| is_allowed(*c)).collect();
    let cut = trim_copy_utf8_safe(&kept, MAX_TITLE_CHARS);
    let out = cut.replace(' ', "_");
    if out.is_empty() {
        return FALLBACK_NAME.to_string();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_disallowed_characters() {
        assert_eq!(sanitize_title("Hello, World! #reel"), "Hello_World_reel");
        assert_eq!(sanitize_title("a/b\\c:d*e?f\"g<h>i|j"), "abcdefghij");
    }

    #[test]
    fn keeps_allow_set_punctuation() {
        assert_eq!(sanitize_title("clip-01_final.v2"), "clip-01_final.v2");
    }

    #[test]
    fn empty_results_fall_back_to_video() {
        assert_eq!(sanitize_title(""), "video");
        assert_eq!(sanitize_title("🎬🔥!!"), "video");
        assert_eq!(sanitize_title("日本語のタイトル"), "video");
    }

    #[test]
    fn whitespace_only_title_becomes_underscores() {
        assert_eq!(sanitize_title("   "), "___");
    }

    #[test]
    fn truncates_to_150_characters() {
        let long = "x".repeat(400);
        assert_eq!(sanitize_title(&long).chars().count(), 150);
    }

    #[test]
    fn truncation_counts_kept_characters_only() {
        let title = format!("{}{}", "é".repeat(200), "a".repeat(10));
        assert_eq!(sanitize_title(&title), "a".repeat(10));
    }

    #[test]
    fn truncation_never_splits_a_code_point() {
        let s = format!("{}é", "a".repeat(149));
        let cut = trim_copy_utf8_safe(&s, 149);
        assert_eq!(cut, "a".repeat(149));
        let cut = trim_copy_utf8_safe("ééé", 2);
        assert_eq!(cut, "éé");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let samples = [
            "",
            "   ",
            "Funny cat video 😹 (part 2)",
            "already_clean-name.mp4",
            "..",
            "a  b\tc\nd",
            "Ünïcödé Títle with spaces",
        ];
        for raw in samples {
            let once = sanitize_title(raw);
            assert_eq!(sanitize_title(&once), once, "input {raw:?}");
            assert!(!once.is_empty());
            assert!(once.chars().all(|c| c.is_ascii_alphanumeric() || "_.-".contains(c)));
        }
        let long = "word ".repeat(100);
        let once = sanitize_title(&long);
        assert_eq!(sanitize_title(&once), once);
    }
}
