//! Enrichment pipeline
//!
//! Turns a list of raw address tokens into persisted host records, reporting
//! each item through an [`EventSink`].

mod normalize;
mod pipeline;
mod sink;

pub use normalize::{normalize, NOT_AVAILABLE};
pub use pipeline::{Credential, EnrichRequest, Enricher, ItemFailure};
pub use sink::{BatchCollector, BatchOutcome, BatchStatus, EnrichEvent, EventSink};

/// Split free text on any whitespace, dropping blanks
pub fn split_whitespace(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

/// Split uploaded file content into one token per line, trimmed, dropping blanks
pub fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
