//! Core data model shared by every collaborating component: documents,
//! queries, traces, and verification results.

pub mod capture;
pub mod document;
pub mod query;
pub mod trace;
pub mod verification;

pub use capture::{CaptureRecord, CapturedException, SubCallRecord};
pub use document::Document;
pub use query::{CancelSignal, Query, QueryOptions, QueryResult, TerminalState, TokenUsage};
pub use trace::{Step, Trace, TraceHandle};
pub use verification::{CitationFinding, QuoteFinding, Verification};
