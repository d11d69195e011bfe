//! Job executor: runs job bodies and applies retry decisions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use forgejobs_core::PolicyResult;
use forgejobs_retry::{
    ClassifyContext, Decision, Escalation, ExceptionKind, Failure, KindHierarchy, classify,
};

use crate::clock::{Clock, SystemClock};
use crate::config::{ExecutionMode, ExecutorConfig};

use super::arguments::{SerializationError, serialize_arguments};
use super::definition::{JobContext, JobDefinition};
use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobId, JobOutcome, JobStatus};

/// Executor error.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("no job registered under name: {0}")]
    UnknownJob(String),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error("job store error: {0}")]
    Store(#[from] JobStoreError),
    /// The retry could not be scheduled; the lineage ends here.
    #[error("failed to re-enqueue job {job_id}: {source}")]
    Reenqueue {
        job_id: JobId,
        #[source]
        source: JobStoreError,
    },
    /// A failure nobody handled. The job was moved to the dead-letter queue.
    #[error("job {job_id} escalated ({cause}): {failure}")]
    Escalated {
        job_id: JobId,
        failure: Failure,
        cause: Escalation,
    },
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result of one attempt run by a batch (`perform_ready`, `drain`).
pub type JobResult = Result<JobOutcome, ExecutorError>;

/// Handle to control running workers.
#[derive(Debug)]
pub struct JobExecutorHandle {
    workers: Vec<WorkerThread>,
    stats: Arc<Mutex<ExecutorStats>>,
    started: Instant,
}

#[derive(Debug)]
struct WorkerThread {
    shutdown: mpsc::Sender<()>,
    join: thread::JoinHandle<()>,
}

impl JobExecutorHandle {
    /// Request graceful shutdown and wait for every worker to finish its
    /// current job. Returns the final statistics.
    pub fn shutdown(self) -> ExecutorStats {
        stop_workers(self.workers);
        let mut stats = lock(&self.stats).clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }

    /// Get current executor statistics.
    pub fn stats(&self) -> ExecutorStats {
        let mut stats = lock(&self.stats).clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }
}

fn stop_workers(workers: Vec<WorkerThread>) {
    for w in &workers {
        let _ = w.shutdown.send(());
    }
    for w in workers {
        let _ = w.join.join();
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub jobs_discarded: u64,
    pub jobs_exhausted: u64,
    pub jobs_escalated: u64,
    pub jobs_cancelled: u64,
    /// Store/re-enqueue failures and unknown jobs
    pub jobs_errored: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

impl ExecutorStats {
    fn record(&mut self, result: &Result<JobOutcome, ExecutorError>) {
        self.jobs_processed += 1;
        match result {
            Ok(JobOutcome::Succeeded) => self.jobs_succeeded += 1,
            Ok(JobOutcome::RetryScheduled { .. }) => self.jobs_retried += 1,
            Ok(JobOutcome::Discarded) => self.jobs_discarded += 1,
            Ok(JobOutcome::Exhausted { .. }) => self.jobs_exhausted += 1,
            Ok(JobOutcome::Cancelled) => self.jobs_cancelled += 1,
            Err(ExecutorError::Escalated { .. }) => self.jobs_escalated += 1,
            Err(_) => self.jobs_errored += 1,
        }
    }
}

/// Background job executor.
///
/// Holds the registered job definitions and the kind hierarchy used to match
/// failures, claims ready jobs from a store, runs them, and turns each failure
/// into a retry, discard, exhaustion or escalation.
pub struct JobExecutor<S: JobStore, C: Clock = SystemClock> {
    store: S,
    clock: C,
    config: ExecutorConfig,
    hierarchy: KindHierarchy,
    definitions: HashMap<String, JobDefinition>,
}

impl<S: JobStore> JobExecutor<S, SystemClock> {
    /// Create a new executor on wall-clock time.
    pub fn new(store: S, config: ExecutorConfig) -> Self {
        Self::with_clock(store, SystemClock, config)
    }
}

impl<S: JobStore, C: Clock> JobExecutor<S, C> {
    pub fn with_clock(store: S, clock: C, config: ExecutorConfig) -> Self {
        Self {
            store,
            clock,
            config,
            hierarchy: KindHierarchy::new(),
            definitions: HashMap::new(),
        }
    }

    pub fn with_hierarchy(mut self, hierarchy: KindHierarchy) -> Self {
        self.hierarchy = hierarchy;
        self
    }

    /// Declare `child` as a subtype of `parent` for rule matching.
    pub fn declare_kind(
        &mut self,
        child: impl Into<ExceptionKind>,
        parent: impl Into<ExceptionKind>,
    ) -> PolicyResult<()> {
        self.hierarchy.declare(child, parent)
    }

    /// Register a job definition, replacing any with the same name.
    pub fn register(&mut self, definition: JobDefinition) {
        self.definitions
            .insert(definition.name().to_string(), definition);
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn hierarchy(&self) -> &KindHierarchy {
        &self.hierarchy
    }

    /// Enqueue a job to run as soon as possible.
    ///
    /// In [`ExecutionMode::Inline`] the whole lineage runs before this
    /// returns, and an escalation comes back as the error.
    pub fn enqueue<A>(&self, name: &str, arguments: &A) -> Result<JobId, ExecutorError>
    where
        A: Serialize + ?Sized,
    {
        self.enqueue_inner(name, arguments, None)
    }

    /// Enqueue a job that must not run before `at`.
    pub fn enqueue_at<A>(
        &self,
        name: &str,
        arguments: &A,
        at: DateTime<Utc>,
    ) -> Result<JobId, ExecutorError>
    where
        A: Serialize + ?Sized,
    {
        self.enqueue_inner(name, arguments, Some(at))
    }

    fn enqueue_inner<A>(
        &self,
        name: &str,
        arguments: &A,
        at: Option<DateTime<Utc>>,
    ) -> Result<JobId, ExecutorError>
    where
        A: Serialize + ?Sized,
    {
        let definition = self
            .definitions
            .get(name)
            .ok_or_else(|| ExecutorError::UnknownJob(name.to_string()))?;

        let arguments = serialize_arguments(arguments)?;
        let mut job = Job::new(name, definition.queue_name(), arguments, self.clock.now());
        job.scheduled_at = at;

        let job_id = self.store.enqueue(job)?;
        debug!(executor = %self.config.name, job_id = %job_id, job = name, "job enqueued");

        if self.config.mode == ExecutionMode::Inline {
            self.perform_lineage(job_id)?;
        }
        Ok(job_id)
    }

    /// Run one lineage to a terminal state, sleeping on the clock until each
    /// scheduled retry is due.
    pub fn perform_lineage(&self, job_id: JobId) -> Result<JobOutcome, ExecutorError> {
        loop {
            if let Some(job) = self.store.claim(job_id, self.clock.now())? {
                match self.run_job(job)? {
                    JobOutcome::RetryScheduled { at, .. } => self.clock.sleep_until(at),
                    terminal => return Ok(terminal),
                }
                continue;
            }

            let job = self
                .store
                .get(job_id)?
                .ok_or(JobStoreError::NotFound(job_id))?;
            match (&job.status, job.scheduled_at) {
                (JobStatus::Cancelled, _) => return Ok(JobOutcome::Cancelled),
                (status, Some(at)) if status.is_claimable() => self.clock.sleep_until(at),
                _ => return Err(JobStoreError::NotClaimable(job_id).into()),
            }
        }
    }

    /// Run one attempt of a claimed (running) job.
    ///
    /// Returns the outcome for handled cases. Unhandled failures are moved to
    /// the dead-letter queue and returned as [`ExecutorError::Escalated`].
    pub fn run_job(&self, mut job: Job) -> Result<JobOutcome, ExecutorError> {
        let Some(definition) = self.definitions.get(&job.name) else {
            let now = self.clock.now();
            let failure = Failure::new(
                "UnknownJobError",
                format!("no job registered under name: {}", job.name),
            );
            warn!(executor = %self.config.name, job_id = %job.id, job = %job.name, "no definition for job");
            let name = job.name.clone();
            job.mark_escalated(&failure, now, now);
            self.store.dead_letter(job, failure.to_string(), now)?;
            return Err(ExecutorError::UnknownJob(name));
        };

        let started = self.clock.now();
        debug!(
            executor = %self.config.name,
            job_id = %job.id,
            job = %job.name,
            executions = job.executions,
            "performing job"
        );

        let result = definition.perform(&JobContext {
            job_id: job.id,
            job_name: &job.name,
            queue: &job.queue,
            executions: job.executions,
            arguments: &job.arguments,
        });

        match result {
            Ok(()) => {
                job.mark_succeeded(started, self.clock.now());
                self.store.update(&job)?;
                debug!(job_id = %job.id, job = %job.name, "job completed successfully");
                Ok(JobOutcome::Succeeded)
            }
            Err(failure) => self.handle_failure(definition, job, failure, started),
        }
    }

    fn handle_failure(
        &self,
        definition: &JobDefinition,
        mut job: Job,
        failure: Failure,
        started: DateTime<Utc>,
    ) -> Result<JobOutcome, ExecutorError> {
        let ctx = ClassifyContext {
            hierarchy: &self.hierarchy,
            job_id: job.id,
            job_name: &job.name,
            executions: job.executions,
        };
        let decision = classify(&failure, definition.policy(), &mut job.counters, &ctx);
        let now = self.clock.now();

        match decision {
            Decision::Retry { rule, attempt, wait } => {
                job.mark_retrying(&failure, attempt, started, now);
                let at = self.re_enqueue(&mut job, wait)?;
                debug!(
                    job_id = %job.id,
                    job = %job.name,
                    rule = %rule,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %failure,
                    "job failed, re-enqueued"
                );
                Ok(JobOutcome::RetryScheduled { attempt, wait, at })
            }
            Decision::Discard { rule } => {
                job.mark_discarded(&failure, started, now);
                self.store.update(&job)?;
                info!(job_id = %job.id, job = %job.name, rule = %rule, error = %failure, "job discarded");
                Ok(JobOutcome::Discarded)
            }
            Decision::Exhausted { rule, attempts } => {
                job.mark_exhausted(&failure, attempts, started, now);
                self.store.update(&job)?;
                warn!(
                    job_id = %job.id,
                    job = %job.name,
                    rule = %rule,
                    attempts,
                    error = %failure,
                    "retries exhausted, handled"
                );
                Ok(JobOutcome::Exhausted { attempts })
            }
            Decision::Escalate { failure, cause } => {
                let job_id = job.id;
                job.mark_escalated(&failure, started, now);
                error!(job_id = %job_id, job = %job.name, cause = %cause, error = %failure, "job escalated");
                self.store
                    .dead_letter(job, format!("{cause}: {failure}"), now)?;
                Err(ExecutorError::Escalated {
                    job_id,
                    failure,
                    cause,
                })
            }
        }
    }

    /// Make `job` claimable again no earlier than `delay` from now.
    pub fn re_enqueue(&self, job: &mut Job, delay: Duration) -> Result<DateTime<Utc>, ExecutorError> {
        let job_id = job.id;
        let now = self.clock.now();
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        let at = now
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        job.scheduled_at = Some(at);
        job.updated_at = now;

        self.store.update(job).map_err(|source| {
            error!(job_id = %job_id, error = %source, "failed to re-enqueue job");
            ExecutorError::Reenqueue { job_id, source }
        })?;
        Ok(at)
    }

    /// Cancel a job waiting to run (pending or scheduled for a retry).
    pub fn cancel(&self, job_id: JobId) -> Result<Job, ExecutorError> {
        let job = self.store.cancel(job_id, self.clock.now())?;
        info!(executor = %self.config.name, job_id = %job_id, job = %job.name, "job cancelled");
        Ok(job)
    }

    /// Run every job that is ready now, until none is.
    ///
    /// Each attempt's result is collected in run order; an escalated lineage
    /// does not stop the others. Only store failures end the batch early.
    pub fn perform_ready(&self) -> Result<Vec<JobResult>, ExecutorError> {
        let mut results = Vec::new();
        while let Some(job) = self
            .store
            .claim_next(self.config.queue.as_deref(), self.clock.now())?
        {
            match self.run_job(job) {
                Err(ExecutorError::Store(e)) => return Err(ExecutorError::Store(e)),
                result => results.push(result),
            }
        }
        Ok(results)
    }

    /// Run ready jobs, then sleep until the next scheduled one, until no
    /// claimable job is left.
    pub fn drain(&self) -> Result<Vec<JobResult>, ExecutorError> {
        let mut outcomes = Vec::new();
        loop {
            outcomes.extend(self.perform_ready()?);
            match self.store.next_scheduled_at(self.config.queue.as_deref())? {
                Some(at) => self.clock.sleep_until(at),
                None => return Ok(outcomes),
            }
        }
    }
}

impl<S, C> JobExecutor<S, C>
where
    S: JobStore + 'static,
    C: Clock + 'static,
{
    /// Start `config.workers` background worker threads.
    pub fn spawn(self) -> Result<JobExecutorHandle, ExecutorError> {
        let stats = Arc::new(Mutex::new(ExecutorStats::default()));
        let worker_count = self.config.workers.max(1);
        let name = self.config.name.clone();
        let executor = Arc::new(self);

        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
            let worker_name = format!("{name}-{i}");
            let executor = executor.clone();
            let stats = stats.clone();

            let spawned = thread::Builder::new()
                .name(worker_name.clone())
                .spawn(move || worker_loop(executor, worker_name, shutdown_rx, stats));

            match spawned {
                Ok(join) => workers.push(WorkerThread {
                    shutdown: shutdown_tx,
                    join,
                }),
                Err(e) => {
                    stop_workers(workers);
                    return Err(e.into());
                }
            }
        }

        Ok(JobExecutorHandle {
            workers,
            stats,
            started: Instant::now(),
        })
    }
}

fn worker_loop<S: JobStore, C: Clock>(
    executor: Arc<JobExecutor<S, C>>,
    worker: String,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<ExecutorStats>>,
) {
    info!(worker = %worker, queue = ?executor.config.queue, "job worker started");
    let poll_interval = executor.config.poll_interval;

    loop {
        match shutdown_rx.try_recv() {
            Ok(()) | Err(mpsc::TryRecvError::Disconnected) => break,
            Err(mpsc::TryRecvError::Empty) => {}
        }

        let claimed = executor
            .store
            .claim_next(executor.config.queue.as_deref(), executor.clock.now());

        match claimed {
            Ok(Some(job)) => {
                debug!(worker = %worker, job_id = %job.id, job = %job.name, "claimed job");
                lock(&stats).current_running += 1;

                let result = executor.run_job(job);

                {
                    let mut s = lock(&stats);
                    s.current_running = s.current_running.saturating_sub(1);
                    s.record(&result);
                }

                if let Err(e) = result {
                    debug!(worker = %worker, error = %e, "job execution failed");
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                error!(worker = %worker, error = %e, "failed to claim job");
            }
        }

        // Idle: wait for the next poll or a shutdown request.
        match shutdown_rx.recv_timeout(poll_interval) {
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            _ => break,
        }
    }

    info!(worker = %worker, "job worker stopped");
}

fn lock(stats: &Mutex<ExecutorStats>) -> std::sync::MutexGuard<'_, ExecutorStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}
