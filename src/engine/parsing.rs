//! Parses driver responses into ordered code blocks and resolves the
//! `FINAL(...)`/`FINAL_VAR(...)` sentinels, including the bare-identifier
//! fallback path.

use regex::Regex;
use std::sync::LazyLock;

static CODE_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```repl\s*\n(.*?)```").expect("static regex is valid"));

static BARE_FINAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"FINAL\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*\)").expect("static regex is valid"));

/// Extracts all fenced `repl` code blocks from a driver response, in
/// the order they appear.
#[must_use]
pub fn extract_code_blocks(response: &str) -> Vec<String> {
    CODE_BLOCK_RE
        .captures_iter(response)
        .map(|c| c[1].to_string())
        .collect()
}

/// Text with every fenced `repl` block removed, for scanning the
/// plain-text remainder for a bare `FINAL(identifier)` fallback.
fn strip_code_blocks(response: &str) -> String {
    CODE_BLOCK_RE.replace_all(response, "").into_owned()
}

/// Looks for a bare `FINAL(identifier)` in the plain-text portion of a
/// response (outside any code fence). Returns the identifier name, to
/// be resolved against the namespace by the caller once the response's
/// code blocks have executed.
///
/// Per the adopted fallback rule: resolution happens *after* the code
/// blocks in the same response have run, so an identifier the response
/// just defined is visible.
#[must_use]
pub fn extract_bare_final_identifier(response: &str) -> Option<String> {
    let plain_text = strip_code_blocks(response);
    BARE_FINAL_RE
        .captures(&plain_text)
        .map(|c| c[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_single_code_block() {
        let response = "Let's check.\n```repl\nprint(1)\n```\nDone.";
        let blocks = extract_code_blocks(response);
        assert_eq!(blocks, vec!["print(1)\n"]);
    }

    #[test]
    fn test_extract_multiple_code_blocks_in_order() {
        let response = "```repl\na = 1\n```\nSome text.\n```repl\nb = 2\n```";
        let blocks = extract_code_blocks(response);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].contains("a = 1"));
        assert!(blocks[1].contains("b = 2"));
    }

    #[test]
    fn test_no_code_blocks() {
        let blocks = extract_code_blocks("just plain text FINAL(answer)");
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_bare_final_identifier_outside_code_block() {
        let response = "```repl\nanswer = 'John Carter'\n```\nFINAL(answer)";
        let id = extract_bare_final_identifier(response);
        assert_eq!(id.as_deref(), Some("answer"));
    }

    #[test]
    fn test_bare_final_inside_code_block_is_not_a_fallback_match() {
        // FINAL(...) inside a repl block is resolved by the sandbox itself,
        // via the FINAL python callable, not via this fallback path.
        let response = "```repl\nFINAL(answer)\n```";
        let id = extract_bare_final_identifier(response);
        assert!(id.is_none());
    }

    #[test]
    fn test_no_bare_final_present() {
        assert!(extract_bare_final_identifier("no sentinel here").is_none());
    }
}
