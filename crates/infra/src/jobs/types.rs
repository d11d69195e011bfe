//! Core job types: execution state, status and outcomes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgejobs_retry::{AttemptCounters, Failure};

pub use forgejobs_core::JobId;

/// Queue used when a job definition does not name one.
pub const DEFAULT_QUEUE: &str = "default";

/// Job execution status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting to be picked up
    Pending,
    /// Currently being executed
    Running,
    /// Failed, re-enqueued until `scheduled_at`
    Retrying { error: String, attempt: u32 },
    /// Completed successfully
    Succeeded,
    /// Failure matched a discard declaration
    Discarded { error: String },
    /// Retry declaration exhausted, handled by its exhaustion handler
    Exhausted { error: String, attempts: u32 },
    /// Failure surfaced to the caller, moved to the dead-letter queue
    Escalated { error: String },
    /// Cancelled before it could run again
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded
                | JobStatus::Discarded { .. }
                | JobStatus::Exhausted { .. }
                | JobStatus::Escalated { .. }
                | JobStatus::Cancelled
        )
    }

    /// Waiting to run: either never run, or scheduled for a retry.
    pub fn is_claimable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Retrying { .. })
    }
}

/// A background job and its execution state for one lineage.
///
/// The id, `executions` and `counters` survive retries; a fresh enqueue
/// starts from zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID (lineage identity)
    pub id: JobId,
    /// Registered job definition name
    pub name: String,
    /// Queue the job is routed to
    pub queue: String,
    /// Serialized arguments
    pub arguments: serde_json::Value,
    /// Current status
    pub status: JobStatus,
    /// Number of times the body has been started
    pub executions: u32,
    /// Matched-failure counters per retry declaration
    pub counters: AttemptCounters,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// When the job was last updated
    pub updated_at: DateTime<Utc>,
    /// Earliest time the job may run (initial delay or retry backoff)
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Execution history
    pub history: Vec<JobAttemptRecord>,
}

/// Record of a job execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAttemptRecord {
    pub execution: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl Job {
    /// Create a new job.
    pub fn new(
        name: impl Into<String>,
        queue: impl Into<String>,
        arguments: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            name: name.into(),
            queue: queue.into(),
            arguments,
            status: JobStatus::Pending,
            executions: 0,
            counters: AttemptCounters::new(),
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            history: Vec::new(),
        }
    }

    /// Schedule the job for later execution.
    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Check if the job may run at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.scheduled_at {
            Some(at) => now >= at,
            None => true,
        }
    }

    /// When the job becomes ready (used for claim ordering).
    pub fn ready_at(&self) -> DateTime<Utc> {
        self.scheduled_at.unwrap_or(self.created_at)
    }

    /// Mark job as running.
    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.executions += 1;
        self.updated_at = now;
    }

    pub fn mark_succeeded(&mut self, started_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.status = JobStatus::Succeeded;
        self.scheduled_at = None;
        self.record(started_at, now, None);
    }

    /// Mark job as failed and waiting for a retry. The executor sets
    /// `scheduled_at` when it re-enqueues.
    pub fn mark_retrying(
        &mut self,
        failure: &Failure,
        attempt: u32,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        self.status = JobStatus::Retrying {
            error: failure.to_string(),
            attempt,
        };
        self.record(started_at, now, Some(failure));
    }

    pub fn mark_discarded(&mut self, failure: &Failure, started_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.status = JobStatus::Discarded {
            error: failure.to_string(),
        };
        self.scheduled_at = None;
        self.record(started_at, now, Some(failure));
    }

    pub fn mark_exhausted(
        &mut self,
        failure: &Failure,
        attempts: u32,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        self.status = JobStatus::Exhausted {
            error: failure.to_string(),
            attempts,
        };
        self.scheduled_at = None;
        self.record(started_at, now, Some(failure));
    }

    pub fn mark_escalated(&mut self, failure: &Failure, started_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.status = JobStatus::Escalated {
            error: failure.to_string(),
        };
        self.scheduled_at = None;
        self.record(started_at, now, Some(failure));
    }

    /// Mark job as cancelled.
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Cancelled;
        self.scheduled_at = None;
        self.updated_at = now;
    }

    /// Start a fresh lineage for the same arguments (dead-letter replay).
    pub fn restart_lineage(&mut self, now: DateTime<Utc>) {
        self.id = JobId::new();
        self.status = JobStatus::Pending;
        self.executions = 0;
        self.counters.reset();
        self.scheduled_at = None;
        self.history.clear();
        self.created_at = now;
        self.updated_at = now;
    }

    fn record(&mut self, started_at: DateTime<Utc>, now: DateTime<Utc>, failure: Option<&Failure>) {
        self.updated_at = now;
        self.history.push(JobAttemptRecord {
            execution: self.executions,
            started_at,
            finished_at: now,
            success: failure.is_none(),
            error: failure.map(ToString::to_string),
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
        });
    }
}

/// Result of running one attempt (or a whole inline lineage).
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Body completed without failure
    Succeeded,
    /// Failure matched a retry declaration; job re-enqueued
    RetryScheduled {
        attempt: u32,
        wait: Duration,
        at: DateTime<Utc>,
    },
    /// Failure matched a discard declaration
    Discarded,
    /// Retry declaration exhausted and its handler took over
    Exhausted { attempts: u32 },
    /// Lineage was cancelled before running again
    Cancelled,
}

impl JobOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobOutcome::RetryScheduled { .. })
    }
}

/// Entry in the dead-letter queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub job: Job,
    pub dead_lettered_at: DateTime<Utc>,
    pub reason: String,
}

impl DeadLetterEntry {
    pub fn new(job: Job, reason: String, at: DateTime<Utc>) -> Self {
        Self {
            job,
            dead_lettered_at: at,
            reason,
        }
    }
}
