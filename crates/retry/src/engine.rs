//! The classification step: failure + declarations + counters → decision.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use forgejobs_core::JobId;

use crate::counter::AttemptCounters;
use crate::failure::Failure;
use crate::kind::KindHierarchy;
use crate::rule::{DiscardedEvent, ExhaustedEvent, JobPolicy, RuleId};

/// Everything `classify` needs besides the failure, declarations and counters.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyContext<'a> {
    pub hierarchy: &'a KindHierarchy,
    pub job_id: JobId,
    pub job_name: &'a str,
    /// Executions of the job so far, including the failing one.
    pub executions: u32,
}

/// Why a failure terminated its lineage unhandled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// No declaration matched the failure's kind.
    Unmatched,
    /// The matching retry declaration ran out of attempts and has no handler.
    Exhausted { rule: RuleId, attempts: u32 },
    /// An exhaustion or discard handler returned a failure of its own.
    HandlerFailed { rule: RuleId },
}

impl core::fmt::Display for Escalation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Escalation::Unmatched => f.write_str("no retry or discard declaration matched"),
            Escalation::Exhausted { rule, attempts } => {
                write!(f, "{rule} exhausted after {attempts} attempts")
            }
            Escalation::HandlerFailed { rule } => write!(f, "handler for {rule} failed"),
        }
    }
}

/// Outcome of classifying one failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Re-enqueue after `wait`. `attempt` is the declaration's counter value.
    Retry {
        rule: RuleId,
        attempt: u32,
        wait: Duration,
    },
    /// Terminal, non-fatal. The discard handler (if any) already ran.
    Discard { rule: RuleId },
    /// Terminal, handled by the declaration's exhaustion handler.
    Exhausted { rule: RuleId, attempts: u32 },
    /// Terminal, fatal: `failure` must be surfaced to the caller.
    Escalate { failure: Failure, cause: Escalation },
}

impl Decision {
    pub fn is_retry(&self) -> bool {
        matches!(self, Decision::Retry { .. })
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_retry()
    }
}

/// Classify `failure` using the thread-local RNG for backoff jitter.
pub fn classify(
    failure: &Failure,
    policy: &JobPolicy,
    counters: &mut AttemptCounters,
    ctx: &ClassifyContext<'_>,
) -> Decision {
    classify_with(failure, policy, counters, ctx, &mut rand::thread_rng())
}

/// Classify `failure`, drawing backoff jitter from `rng`.
///
/// 1. A matching discard declaration wins outright; no counter changes.
/// 2. Otherwise the first matching retry declaration (in declaration order)
///    is selected and only its counter is incremented.
/// 3. Otherwise the failure escalates.
pub fn classify_with<R: Rng>(
    failure: &Failure,
    policy: &JobPolicy,
    counters: &mut AttemptCounters,
    ctx: &ClassifyContext<'_>,
    rng: &mut R,
) -> Decision {
    let kind = &failure.kind;

    if let Some(rule) = policy
        .discard_rules()
        .iter()
        .find(|r| r.matches(ctx.hierarchy, kind))
    {
        debug!(job_id = %ctx.job_id, job = ctx.job_name, rule = %rule.id(), kind = %kind, "discarding failure");

        if let Some(handler) = rule.on_discard() {
            let event = DiscardedEvent {
                job_id: ctx.job_id,
                job_name: ctx.job_name,
                executions: ctx.executions,
                rule: rule.id(),
                failure,
            };
            if let Err(handler_failure) = handler(&event) {
                return Decision::Escalate {
                    failure: handler_failure,
                    cause: Escalation::HandlerFailed { rule: rule.id() },
                };
            }
        }
        return Decision::Discard { rule: rule.id() };
    }

    let Some(rule) = policy
        .retry_rules()
        .iter()
        .find(|r| r.matches(ctx.hierarchy, kind))
    else {
        debug!(job_id = %ctx.job_id, job = ctx.job_name, kind = %kind, "no declaration matched");
        return Decision::Escalate {
            failure: failure.clone(),
            cause: Escalation::Unmatched,
        };
    };

    let attempt = counters.increment(rule.id());

    if rule.attempts().allows(attempt) {
        let wait = rule.wait().compute_with(attempt, rng);
        debug!(
            job_id = %ctx.job_id,
            job = ctx.job_name,
            rule = %rule.id(),
            attempt,
            wait_ms = wait.as_millis() as u64,
            "retry scheduled"
        );
        return Decision::Retry {
            rule: rule.id(),
            attempt,
            wait,
        };
    }

    match rule.on_exhausted() {
        Some(handler) => {
            let event = ExhaustedEvent {
                job_id: ctx.job_id,
                job_name: ctx.job_name,
                executions: ctx.executions,
                rule: rule.id(),
                attempts: attempt,
                failure,
            };
            match handler(&event) {
                Ok(()) => Decision::Exhausted {
                    rule: rule.id(),
                    attempts: attempt,
                },
                Err(handler_failure) => Decision::Escalate {
                    failure: handler_failure,
                    cause: Escalation::HandlerFailed { rule: rule.id() },
                },
            }
        }
        None => Decision::Escalate {
            failure: failure.clone(),
            cause: Escalation::Exhausted {
                rule: rule.id(),
                attempts: attempt,
            },
        },
    }
}
