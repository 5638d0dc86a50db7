//! Error types for the Waypoint data model.

use thiserror::Error;

/// Errors raised while parsing or validating model values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    /// Entity kind name not recognised
    #[error("unknown entity kind: {0}")]
    UnknownKind(String),

    /// Document path is malformed
    #[error("invalid document path '{path}': {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Document path does not have the shape its entity kind requires
    #[error("document '{path}' has no ancestor {levels} level(s) up")]
    MissingAncestor {
        /// The document path.
        path: String,
        /// How many document levels up the lookup went.
        levels: usize,
    },
}
