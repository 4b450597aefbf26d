//! Error types for the audiocollage crate.

use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;

use crate::core::types::SourceId;
use crate::selection::UnmatchedSpan;

/// Errors that can occur while analysing, matching, or synthesizing audio.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollageError {
    /// Malformed or empty buffer, or a sample rate mismatch with no resampling step.
    #[error("invalid audio: {0}")]
    InvalidAudio(String),

    /// One or more target spans had no eligible candidate and the gap policy is `fail`.
    #[error(
        "no match found for {} target span(s): {}",
        .unmatched.len(),
        describe_unmatched(.unmatched)
    )]
    NoMatchFound { unmatched: Vec<UnmatchedSpan> },

    /// Cache capacity must be at least one entry.
    #[error("cache capacity must be positive, got {0}")]
    CacheCapacity(usize),

    /// A pitch or time transform produced non-finite samples.
    #[error("transform failed: {0}")]
    Transform(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A segment refers to a source that is not registered.
    #[error("unknown source: {0}")]
    UnknownSource(SourceId),

    /// A source id was registered twice.
    #[error("source {0} is already registered")]
    DuplicateSource(SourceId),

    /// The run was cancelled through its cancellation token.
    #[error("operation cancelled")]
    Cancelled,
}

/// Result type for collage operations.
pub type Result<T> = std::result::Result<T, CollageError>;

fn describe_unmatched(unmatched: &[UnmatchedSpan]) -> String {
    unmatched
        .iter()
        .map(|u| format!("[{}, {}) {}", u.span.start, u.span.end, u.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A failure isolated to a single source; the rest of the run continues.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFailure {
    pub source_id: SourceId,
    pub error: CollageError,
}

impl std::fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "source {}: {}", self.source_id, self.error)
    }
}

impl Serialize for SourceFailure {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("SourceFailure", 2)?;
        state.serialize_field("source_id", &self.source_id)?;
        state.serialize_field("error", &self.error.to_string())?;
        state.end()
    }
}
