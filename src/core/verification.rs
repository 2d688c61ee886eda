//! Verification: the mechanical, post-`FINAL` check of citations and
//! quotes against the still-loaded documents. Attached to `QueryResult`
//! only when enabled; never blocks answer delivery.

use serde::{Deserialize, Serialize};

/// Result of checking one cited document index (`Doc N`, `context[N]`, `**N**`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationFinding {
    /// The cited document index as it appeared in the answer.
    pub doc_index: usize,
    /// Whether the index resolves to a loaded document.
    pub valid: bool,
    /// Why the citation was judged invalid, if it was.
    pub reason: Option<String>,
}

/// Result of checking one quoted substring (length ≥ 10, double- or
/// backtick-quoted) against the document it was attributed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteFinding {
    /// The quoted text, truncated to 60 characters for comparison.
    pub quote: String,
    /// Document index the quote was attributed to, if any.
    pub attributed_doc: Option<usize>,
    /// Whether the quote was found (case-insensitively) in the attributed document.
    pub valid: bool,
}

/// Structured result of the Citation Verifier pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Verification {
    /// Per-citation findings.
    pub citations: Vec<CitationFinding>,
    /// Per-quote findings.
    pub quotes: Vec<QuoteFinding>,
    /// Set when an internal exception during verification made the
    /// pass unable to complete; findings above are then empty. This is
    /// never treated as a query failure.
    pub unavailable: bool,
}

impl Verification {
    /// Builds the "verification unavailable" result used when the
    /// verifier itself fails; never propagated as an error.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Whether every citation and quote finding was valid.
    #[must_use]
    pub fn all_valid(&self) -> bool {
        !self.unavailable
            && self.citations.iter().all(|c| c.valid)
            && self.quotes.iter().all(|q| q.valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_has_no_findings() {
        let v = Verification::unavailable();
        assert!(v.unavailable);
        assert!(v.citations.is_empty());
        assert!(!v.all_valid());
    }

    #[test]
    fn test_all_valid_mixed() {
        let mut v = Verification::default();
        v.citations.push(CitationFinding {
            doc_index: 2,
            valid: true,
            reason: None,
        });
        assert!(v.all_valid());
        v.citations.push(CitationFinding {
            doc_index: 7,
            valid: false,
            reason: Some("out of range".to_string()),
        });
        assert!(!v.all_valid());
    }
}
