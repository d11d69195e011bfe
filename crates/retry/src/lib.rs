//! `forgejobs-retry` — the retry policy engine.
//!
//! Given a failure raised by a job and the job type's declared rules, the
//! engine produces exactly one [`Decision`]: retry after a delay, discard,
//! hand off to an exhaustion handler, or escalate.
//!
//! ## Components
//!
//! - [`ExceptionKind`] / [`KindHierarchy`]: failure categories and their
//!   explicit ancestor table
//! - [`Failure`]: a raised failure (kind + message)
//! - [`WaitPolicy`]: delay computation per attempt
//! - [`JobPolicy`]: ordered retry declarations plus discard declarations
//! - [`AttemptCounters`]: per-declaration counters owned by a job lineage
//! - [`classify`]: the decision function
//!
//! The engine is pure: no IO, no sleeping, no shared state. Scheduling the
//! delay is the executor's job.

pub mod counter;
pub mod engine;
pub mod failure;
pub mod kind;
pub mod rule;
pub mod wait;

pub use counter::AttemptCounters;
pub use engine::{ClassifyContext, Decision, Escalation, classify, classify_with};
pub use failure::Failure;
pub use kind::{ExceptionKind, KindHierarchy};
pub use rule::{
    Attempts, Discard, DiscardHandler, DiscardRule, DiscardedEvent, ExhaustHandler,
    ExhaustedEvent, JobPolicy, Retry, RetryRule, RuleId,
};
pub use wait::{Jitter, WaitFn, WaitPolicy};
