//! Citation Verifier: a purely mechanical, post-`FINAL` check of every
//! cited document index and quoted substring against the still-loaded
//! documents. Never calls an LLM; any internal failure degrades to
//! "verification unavailable", never an answer failure.

use regex::Regex;
use std::sync::LazyLock;

use crate::core::{CitationFinding, Document, QuoteFinding, Verification};

/// Minimum quoted-substring length the verifier checks; shorter quotes
/// are too likely to collide by chance to be meaningful evidence.
const MIN_QUOTE_LEN: usize = 10;
/// Quotes are truncated to this many characters before comparison.
const QUOTE_COMPARISON_LEN: usize = 60;

static DOC_N_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bDoc\s+(\d+)\b").expect("static regex is valid"));
static CONTEXT_INDEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"context\[(\d+)\]").expect("static regex is valid"));
static BOLD_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(\d+)\*\*").expect("static regex is valid"));
static DOUBLE_QUOTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]{10,})""#).expect("static regex is valid"));
static BACKTICK_QUOTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]{10,})`").expect("static regex is valid"));

/// Runs citation and quote verification against `answer`, resolving
/// indices against `documents`. Purely mechanical pattern matching over
/// already-validated strings; callers that want a hard guarantee a
/// verification failure never turns into a query failure should still
/// wrap this at the call site and fall back to [`Verification::unavailable`].
#[must_use]
pub fn verify(answer: &str, documents: &[Document]) -> Verification {
    let mut citations = Vec::new();
    let mut seen_indices = std::collections::HashSet::new();

    for re in [&*DOC_N_RE, &*CONTEXT_INDEX_RE, &*BOLD_NUMBER_RE] {
        for caps in re.captures_iter(answer) {
            let Ok(doc_index) = caps[1].parse::<usize>() else {
                continue;
            };
            if !seen_indices.insert(doc_index) {
                continue;
            }
            let valid = doc_index < documents.len();
            citations.push(CitationFinding {
                doc_index,
                valid,
                reason: (!valid).then(|| format!("document index {doc_index} is out of range")),
            });
        }
    }

    let mut quotes = Vec::new();
    for re in [&*DOUBLE_QUOTE_RE, &*BACKTICK_QUOTE_RE] {
        for caps in re.captures_iter(answer) {
            let raw = &caps[1];
            if raw.chars().count() < MIN_QUOTE_LEN {
                continue;
            }
            let truncated: String = raw.chars().take(QUOTE_COMPARISON_LEN).collect();
            let needle = truncated.to_lowercase();

            let attributed = citations
                .iter()
                .map(|c| c.doc_index)
                .find(|&idx| {
                    documents
                        .get(idx)
                        .is_some_and(|d| d.content.to_lowercase().contains(&needle))
                })
                .or_else(|| {
                    documents
                        .iter()
                        .position(|d| d.content.to_lowercase().contains(&needle))
                });

            let valid = attributed.is_some();
            quotes.push(QuoteFinding {
                quote: truncated,
                attributed_doc: attributed,
                valid,
            });
        }
    }

    Verification {
        citations,
        quotes,
        unavailable: false,
    }
}
