//! Lexical helpers shared by the domain, rule, and grammar compilers.
//!
//! None of the three textual DSLs (domain files, rules files, grammar
//! files) needs a real tokenizer: each is line-oriented, `#`-commented, and
//! whitespace-insensitive in the same small set of ways. This module factors
//! those shared mechanics out so the three compilers only have to worry
//! about their own grammar.
//!
//! ## What lives here
//!
//! - Blank-line and comment stripping.
//! - Tab normalization and whitespace collapsing (rules files tolerate
//!   mixed tabs/spaces and repeated spaces between tokens).
//! - Bracket-balance checks, used for `<...>` entity references, `<...>`
//!   grammar symbol references, and `{...}` action-string role references.
//! - A single predicate for "is this word a role reference" (capitalized)
//!   vs. a literal token (lowercase-initial), which every precondition,
//!   effect, and response-action parser leans on.

/// Return `true` if `line`, after trimming, is empty or a `#`-comment.
pub(crate) fn is_blank_or_comment(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

/// Return the non-blank, non-comment lines of `text`, each trimmed of
/// leading/trailing whitespace.
pub(crate) fn meaningful_lines(text: &str) -> Vec<&str> {
    text.lines().map(str::trim).filter(|line| !is_blank_or_comment(line)).collect()
}

/// Replace tabs with spaces and collapse runs of spaces down to one.
pub(crate) fn normalize_whitespace(text: &str) -> String {
    let mut out = text.replace('\t', " ");
    while out.contains("  ") {
        out = out.replace("  ", " ");
    }
    out
}

/// Return `true` if `text` contains the same number of `open` and `close`
/// characters. Does not check nesting order, matching the original DSL's
/// permissive bracket-counting validation.
pub(crate) fn brackets_balanced(text: &str, open: char, close: char) -> bool {
    text.chars().filter(|&c| c == open).count() == text.chars().filter(|&c| c == close).count()
}

/// Return `true` if `word`'s first character is uppercase, i.e. it should be
/// read as a role reference rather than a literal predicate token.
///
/// Capital-initial words in predicate templates are role references;
/// lowercase-initial words are literal tokens.
pub(crate) fn is_role_reference(word: &str) -> bool {
    word.chars().next().map(char::is_uppercase).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        assert!(is_blank_or_comment(""));
        assert!(is_blank_or_comment("   "));
        assert!(is_blank_or_comment("# a comment"));
        assert!(is_blank_or_comment("   # indented comment"));
        assert!(!is_blank_or_comment("alice : Person"));
    }

    #[test]
    fn meaningful_lines_strips_blanks_and_comments() {
        let text = "alice : Person\n\n# a comment\nbob : Person\n";
        assert_eq!(meaningful_lines(text), vec!["alice : Person", "bob : Person"]);
    }

    #[test]
    fn normalize_whitespace_collapses_tabs_and_runs() {
        assert_eq!(normalize_whitespace("a\t\tb   c"), "a b c");
    }

    #[test]
    fn brackets_balanced_counts_only() {
        assert!(brackets_balanced("<a> likes <b>", '<', '>'));
        assert!(!brackets_balanced("<a likes <b>", '<', '>'));
        assert!(brackets_balanced("no brackets here", '<', '>'));
    }

    #[test]
    fn role_reference_detection() {
        assert!(is_role_reference("Greeter"));
        assert!(!is_role_reference("is"));
        assert!(!is_role_reference(""));
    }
}
