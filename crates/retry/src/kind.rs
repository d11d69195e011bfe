//! Exception kinds and the explicit subtype table used to match them.

use std::borrow::Cow;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use forgejobs_core::{PolicyError, PolicyResult};

/// A named failure category.
///
/// Kinds are plain names; "is-a" relationships live in a [`KindHierarchy`]
/// rather than in the type system, so rules can be declared against a parent
/// kind and still match its descendants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExceptionKind(Cow<'static, str>);

impl ExceptionKind {
    /// Root of the hierarchy. Every kind without a declared parent is treated
    /// as a direct child of this one.
    pub const STANDARD: ExceptionKind = ExceptionKind::from_static("StandardError");

    /// Raised when job arguments cannot be decoded before the body runs.
    pub const DESERIALIZATION: ExceptionKind = ExceptionKind::from_static("DeserializationError");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ExceptionKind {
    fn from(value: &'static str) -> Self {
        Self::from_static(value)
    }
}

impl From<String> for ExceptionKind {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

static ROOT: ExceptionKind = ExceptionKind::STANDARD;

/// Child → parent table for exception kinds.
///
/// `is_a` is reflexive and transitive. Kinds that were never declared are
/// children of [`ExceptionKind::STANDARD`].
#[derive(Debug, Clone)]
pub struct KindHierarchy {
    parents: HashMap<ExceptionKind, ExceptionKind>,
}

impl Default for KindHierarchy {
    fn default() -> Self {
        let mut parents = HashMap::new();
        parents.insert(ExceptionKind::DESERIALIZATION, ExceptionKind::STANDARD);
        Self { parents }
    }
}

impl KindHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `child` as a subtype of `parent`.
    ///
    /// Re-declaring the same edge is a no-op. Declaring a different parent for
    /// an existing kind, or an edge that closes a cycle, is rejected.
    pub fn declare(
        &mut self,
        child: impl Into<ExceptionKind>,
        parent: impl Into<ExceptionKind>,
    ) -> PolicyResult<()> {
        let child = child.into();
        let parent = parent.into();

        if child == ExceptionKind::STANDARD {
            return Err(PolicyError::cycle(format!(
                "{child} is the root kind and cannot have a parent"
            )));
        }
        if let Some(existing) = self.parents.get(&child) {
            if *existing == parent {
                return Ok(());
            }
            return Err(PolicyError::conflicting_parent(format!(
                "{child} already extends {existing}, cannot extend {parent}"
            )));
        }
        if self.is_a(&parent, &child) {
            return Err(PolicyError::cycle(format!(
                "{child} cannot extend its own descendant {parent}"
            )));
        }

        self.parents.insert(child, parent);
        Ok(())
    }

    /// Builder-style [`declare`](Self::declare).
    pub fn with(
        mut self,
        child: impl Into<ExceptionKind>,
        parent: impl Into<ExceptionKind>,
    ) -> PolicyResult<Self> {
        self.declare(child, parent)?;
        Ok(self)
    }

    /// Direct parent of `kind` (`None` only for the root).
    pub fn parent_of(&self, kind: &ExceptionKind) -> Option<&ExceptionKind> {
        if *kind == ExceptionKind::STANDARD {
            return None;
        }
        Some(self.parents.get(kind).unwrap_or(&ROOT))
    }

    /// `kind` followed by each of its ancestors up to the root.
    pub fn lineage<'a>(&'a self, kind: &'a ExceptionKind) -> impl Iterator<Item = &'a ExceptionKind> {
        let mut next = Some(kind);
        std::iter::from_fn(move || {
            let current = next?;
            next = self.parent_of(current);
            Some(current)
        })
    }

    /// True when `kind` equals `ancestor` or descends from it.
    pub fn is_a(&self, kind: &ExceptionKind, ancestor: &ExceptionKind) -> bool {
        self.lineage(kind).any(|k| k == ancestor)
    }

    /// True when `kind` is-a any of `declared`.
    pub fn matches_any(&self, kind: &ExceptionKind, declared: &[ExceptionKind]) -> bool {
        declared.iter().any(|d| self.is_a(kind, d))
    }
}
