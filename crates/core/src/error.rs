//! Declaration-time error model.

use thiserror::Error;

/// Result type used when declaring job policies and kind hierarchies.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Error raised while declaring retry/discard rules or exception kinds.
///
/// These are programmer errors surfaced at job-type definition time, never
/// job failures. Job failures are modelled by `forgejobs_retry::Failure`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// A declaration was malformed (e.g. an empty exception kind set).
    #[error("invalid declaration: {0}")]
    InvalidDeclaration(String),

    /// Declaring a parent would make a kind its own ancestor.
    #[error("kind hierarchy cycle: {0}")]
    HierarchyCycle(String),

    /// A kind was already declared with a different parent.
    #[error("conflicting parent for kind: {0}")]
    ConflictingParent(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl PolicyError {
    pub fn invalid_declaration(msg: impl Into<String>) -> Self {
        Self::InvalidDeclaration(msg.into())
    }

    pub fn cycle(msg: impl Into<String>) -> Self {
        Self::HierarchyCycle(msg.into())
    }

    pub fn conflicting_parent(msg: impl Into<String>) -> Self {
        Self::ConflictingParent(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
