//! Retry and discard declarations for a job type.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use forgejobs_core::{JobId, PolicyError, PolicyResult};

use crate::failure::Failure;
use crate::kind::{ExceptionKind, KindHierarchy};
use crate::wait::WaitPolicy;

/// Identity of one declaration within a [`JobPolicy`].
///
/// Attempt counters are keyed by this id, not by exception kind: two
/// declarations listing the same kind count independently.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(u32);

impl RuleId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for RuleId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "rule#{}", self.0)
    }
}

/// How many retries a declaration allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attempts {
    /// Retry while the declaration's counter is at most this value.
    Limited(u32),
    /// Never exhaust.
    Unlimited,
}

impl Attempts {
    /// Whether a counter value (after increment) still earns a retry.
    pub fn allows(&self, count: u32) -> bool {
        match self {
            Attempts::Limited(limit) => count <= *limit,
            Attempts::Unlimited => true,
        }
    }
}

impl Default for Attempts {
    fn default() -> Self {
        Self::Limited(5)
    }
}

impl From<u32> for Attempts {
    fn from(limit: u32) -> Self {
        Self::Limited(limit)
    }
}

/// Passed to an exhaustion handler when a declaration runs out of attempts.
#[derive(Debug)]
pub struct ExhaustedEvent<'a> {
    pub job_id: JobId,
    pub job_name: &'a str,
    /// Executions of the job so far, including the failing one.
    pub executions: u32,
    pub rule: RuleId,
    /// Counter value for the declaration, including this failure.
    pub attempts: u32,
    pub failure: &'a Failure,
}

/// Passed to a discard handler when a failure is discarded.
#[derive(Debug)]
pub struct DiscardedEvent<'a> {
    pub job_id: JobId,
    pub job_name: &'a str,
    pub executions: u32,
    pub rule: RuleId,
    pub failure: &'a Failure,
}

/// Handler run once when a retry declaration is exhausted.
///
/// Returning `Err` escalates the returned failure instead of finishing the
/// lineage as handled.
pub type ExhaustHandler = Arc<dyn Fn(&ExhaustedEvent<'_>) -> Result<(), Failure> + Send + Sync>;

/// Handler run once when a failure is discarded.
pub type DiscardHandler = Arc<dyn Fn(&DiscardedEvent<'_>) -> Result<(), Failure> + Send + Sync>;

/// Builder for a retry declaration.
#[derive(Clone, Default)]
pub struct Retry {
    kinds: Vec<ExceptionKind>,
    wait: WaitPolicy,
    attempts: Attempts,
    on_exhausted: Option<ExhaustHandler>,
}

impl Retry {
    /// Retry on any of `kinds` (or their descendants), with exponential
    /// backoff and 5 attempts unless overridden.
    pub fn on<I, K>(kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<ExceptionKind>,
    {
        Self {
            kinds: kinds.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn wait(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    /// Allow `limit` retries before the declaration is exhausted.
    pub fn attempts(mut self, limit: u32) -> Self {
        self.attempts = Attempts::Limited(limit);
        self
    }

    pub fn unlimited(mut self) -> Self {
        self.attempts = Attempts::Unlimited;
        self
    }

    pub fn on_exhausted<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ExhaustedEvent<'_>) -> Result<(), Failure> + Send + Sync + 'static,
    {
        self.on_exhausted = Some(Arc::new(handler));
        self
    }
}

/// Builder for a discard declaration.
#[derive(Clone, Default)]
pub struct Discard {
    kinds: Vec<ExceptionKind>,
    on_discard: Option<DiscardHandler>,
}

impl Discard {
    pub fn on<I, K>(kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<ExceptionKind>,
    {
        Self {
            kinds: kinds.into_iter().map(Into::into).collect(),
            on_discard: None,
        }
    }

    pub fn on_discard<F>(mut self, handler: F) -> Self
    where
        F: Fn(&DiscardedEvent<'_>) -> Result<(), Failure> + Send + Sync + 'static,
    {
        self.on_discard = Some(Arc::new(handler));
        self
    }
}

/// A registered retry declaration.
#[derive(Clone)]
pub struct RetryRule {
    id: RuleId,
    kinds: Vec<ExceptionKind>,
    wait: WaitPolicy,
    attempts: Attempts,
    on_exhausted: Option<ExhaustHandler>,
}

impl RetryRule {
    pub fn id(&self) -> RuleId {
        self.id
    }

    pub fn kinds(&self) -> &[ExceptionKind] {
        &self.kinds
    }

    pub fn wait(&self) -> &WaitPolicy {
        &self.wait
    }

    pub fn attempts(&self) -> Attempts {
        self.attempts
    }

    pub fn on_exhausted(&self) -> Option<&ExhaustHandler> {
        self.on_exhausted.as_ref()
    }

    pub fn matches(&self, hierarchy: &KindHierarchy, kind: &ExceptionKind) -> bool {
        hierarchy.matches_any(kind, &self.kinds)
    }
}

impl core::fmt::Debug for RetryRule {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RetryRule")
            .field("id", &self.id)
            .field("kinds", &self.kinds)
            .field("wait", &self.wait)
            .field("attempts", &self.attempts)
            .field("on_exhausted", &self.on_exhausted.is_some())
            .finish()
    }
}

/// A registered discard declaration.
#[derive(Clone)]
pub struct DiscardRule {
    id: RuleId,
    kinds: Vec<ExceptionKind>,
    on_discard: Option<DiscardHandler>,
}

impl DiscardRule {
    pub fn id(&self) -> RuleId {
        self.id
    }

    pub fn kinds(&self) -> &[ExceptionKind] {
        &self.kinds
    }

    pub fn on_discard(&self) -> Option<&DiscardHandler> {
        self.on_discard.as_ref()
    }

    pub fn matches(&self, hierarchy: &KindHierarchy, kind: &ExceptionKind) -> bool {
        hierarchy.matches_any(kind, &self.kinds)
    }
}

impl core::fmt::Debug for DiscardRule {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DiscardRule")
            .field("id", &self.id)
            .field("kinds", &self.kinds)
            .field("on_discard", &self.on_discard.is_some())
            .finish()
    }
}

/// All retry and discard declarations of one job type.
///
/// Retry rules keep declaration order (first match wins). Discard rules are
/// consulted before any retry rule, so their relative order does not matter.
#[derive(Debug, Clone, Default)]
pub struct JobPolicy {
    retries: Vec<RetryRule>,
    discards: Vec<DiscardRule>,
    next_id: u32,
}

impl JobPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_retry(&mut self, retry: Retry) -> PolicyResult<RuleId> {
        if retry.kinds.is_empty() {
            return Err(PolicyError::invalid_declaration(
                "retry declaration needs at least one exception kind",
            ));
        }
        let id = self.allocate_id();
        self.retries.push(RetryRule {
            id,
            kinds: retry.kinds,
            wait: retry.wait,
            attempts: retry.attempts,
            on_exhausted: retry.on_exhausted,
        });
        Ok(id)
    }

    pub fn declare_discard(&mut self, discard: Discard) -> PolicyResult<RuleId> {
        if discard.kinds.is_empty() {
            return Err(PolicyError::invalid_declaration(
                "discard declaration needs at least one exception kind",
            ));
        }
        let id = self.allocate_id();
        self.discards.push(DiscardRule {
            id,
            kinds: discard.kinds,
            on_discard: discard.on_discard,
        });
        Ok(id)
    }

    pub fn retry_rules(&self) -> &[RetryRule] {
        &self.retries
    }

    pub fn discard_rules(&self) -> &[DiscardRule] {
        &self.discards
    }

    pub fn retry_rule(&self, id: RuleId) -> Option<&RetryRule> {
        self.retries.iter().find(|r| r.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.retries.is_empty() && self.discards.is_empty()
    }

    fn allocate_id(&mut self) -> RuleId {
        let id = RuleId(self.next_id);
        self.next_id += 1;
        id
    }
}
