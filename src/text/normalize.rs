//! Normalization of raw transcript fragments
//!
//! Speech recognizers emit text with stray newlines, doubled spaces and
//! inconsistent trailing whitespace. Everything entering the fusion pipeline
//! goes through `clean` first.

/// Closing quotes that may trail sentence-terminal punctuation.
const CLOSING_QUOTES: [char; 4] = ['"', '\'', '\u{201d}', '\u{2019}'];

/// Collapse all whitespace runs (including newlines) to single spaces and trim.
pub fn clean(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True if the trimmed text ends in `.`, `!` or `?`, optionally followed by
/// a closing quote.
pub fn is_complete_sentence(text: &str) -> bool {
    let trimmed = text.trim_end();
    let trimmed = trimmed.trim_end_matches(CLOSING_QUOTES);
    trimmed.ends_with(['.', '!', '?'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_collapses_whitespace() {
        assert_eq!(clean("hello   world"), "hello world");
        assert_eq!(clean("hello\nworld"), "hello world");
        assert_eq!(clean("  hello \t world \n"), "hello world");
    }

    #[test]
    fn test_clean_empty_and_blank() {
        assert_eq!(clean(""), "");
        assert_eq!(clean("   \n\t  "), "");
    }

    #[test]
    fn test_complete_sentence_terminal_punctuation() {
        assert!(is_complete_sentence("How are you?"));
        assert!(is_complete_sentence("Stop!"));
        assert!(is_complete_sentence("It works."));
        assert!(!is_complete_sentence("and then we"));
        assert!(!is_complete_sentence("trailing comma,"));
    }

    #[test]
    fn test_complete_sentence_closing_quote() {
        assert!(is_complete_sentence("she said \"done.\""));
        assert!(is_complete_sentence("he asked 'why?'"));
        assert!(is_complete_sentence("it ended.\u{201d}"));
    }

    #[test]
    fn test_complete_sentence_trailing_whitespace() {
        assert!(is_complete_sentence("It works.  "));
        assert!(!is_complete_sentence(""));
    }
}
