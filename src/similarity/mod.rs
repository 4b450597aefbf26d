//! Sequence comparison and windowed candidate search.

pub mod distance;
pub mod matcher;

pub use distance::{similarity_from_cost, Alignment, DistanceMetric, SequenceComparator};
pub use matcher::{find_matches, Match, MatchReport, WindowMatches};
