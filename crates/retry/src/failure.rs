//! Job failure value.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kind::ExceptionKind;

/// A failure raised by a job body (or by argument decoding before it).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct Failure {
    pub kind: ExceptionKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: impl Into<ExceptionKind>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Failure of the distinguished [`ExceptionKind::DESERIALIZATION`] kind.
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::DESERIALIZATION, message)
    }

    pub fn is_deserialization(&self) -> bool {
        self.kind == ExceptionKind::DESERIALIZATION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let failure = Failure::new("DefaultsError", "raised 1st time");
        assert_eq!(failure.to_string(), "DefaultsError: raised 1st time");
    }

    #[test]
    fn deserialization_failures_are_flagged() {
        assert!(Failure::deserialization("missing field `id`").is_deserialization());
        assert!(!Failure::new("Other", "x").is_deserialization());
    }
}
