//! Job storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use super::types::{DeadLetterEntry, Job, JobId, JobStatus};

/// Job store abstraction.
pub trait JobStore: Send + Sync {
    /// Enqueue a new job.
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError>;

    /// Get a job by ID.
    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Update a job.
    fn update(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Claim the next claimable job that is ready at `now`, marking it running.
    /// Returns None if no jobs are available.
    fn claim_next(&self, queue: Option<&str>, now: DateTime<Utc>)
    -> Result<Option<Job>, JobStoreError>;

    /// Claim a specific job if it is claimable and ready at `now`.
    fn claim(&self, job_id: JobId, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError>;

    /// Earliest `scheduled_at` among claimable jobs.
    fn next_scheduled_at(&self, queue: Option<&str>) -> Result<Option<DateTime<Utc>>, JobStoreError>;

    /// Cancel a pending or retrying job.
    fn cancel(&self, job_id: JobId, now: DateTime<Utc>) -> Result<Job, JobStoreError>;

    /// List jobs by status (variant only, payload ignored).
    fn list_by_status(&self, status: Option<&JobStatus>, limit: usize)
    -> Result<Vec<Job>, JobStoreError>;

    /// List jobs by definition name.
    fn list_by_name(&self, name: &str, limit: usize) -> Result<Vec<Job>, JobStoreError>;

    /// Move a job to the dead-letter queue.
    fn dead_letter(&self, job: Job, reason: String, at: DateTime<Utc>) -> Result<(), JobStoreError>;

    /// List dead-lettered jobs.
    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, JobStoreError>;

    /// Replay a dead-lettered job as a fresh lineage.
    fn retry_dead_letter(&self, job_id: JobId, now: DateTime<Utc>) -> Result<Job, JobStoreError>;

    /// Delete a dead-lettered job.
    fn delete_dead_letter(&self, job_id: JobId) -> Result<(), JobStoreError>;

    /// Get job statistics.
    fn stats(&self) -> Result<JobStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job {0} is not waiting to run and cannot be cancelled")]
    NotCancellable(JobId),
    #[error("job {0} is not waiting to run and cannot be claimed")]
    NotClaimable(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub running: usize,
    pub retrying: usize,
    pub succeeded: usize,
    pub discarded: usize,
    pub exhausted: usize,
    pub escalated: usize,
    pub cancelled: usize,
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    dead_letters: RwLock<HashMap<JobId, DeadLetterEntry>>,
}

fn poisoned() -> JobStoreError {
    JobStoreError::Storage("lock poisoned".to_string())
}

fn queue_matches(job: &Job, queue: Option<&str>) -> bool {
    queue.is_none_or(|q| job.queue == q)
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read_jobs(&self) -> Result<RwLockReadGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.jobs.read().map_err(|_| poisoned())
    }

    fn write_jobs(&self) -> Result<RwLockWriteGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.jobs.write().map_err(|_| poisoned())
    }

    fn read_dead_letters(
        &self,
    ) -> Result<RwLockReadGuard<'_, HashMap<JobId, DeadLetterEntry>>, JobStoreError> {
        self.dead_letters.read().map_err(|_| poisoned())
    }

    fn write_dead_letters(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<JobId, DeadLetterEntry>>, JobStoreError> {
        self.dead_letters.write().map_err(|_| poisoned())
    }
}

impl JobStore for InMemoryJobStore {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.write_jobs()?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.read_jobs()?.get(&job_id).cloned())
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.write_jobs()?;
        if !jobs.contains_key(&job.id) {
            return Err(JobStoreError::NotFound(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn claim_next(
        &self,
        queue: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.write_jobs()?;

        // Earliest-ready first, FIFO among equals.
        let next = jobs
            .values()
            .filter(|j| j.status.is_claimable() && j.is_ready(now) && queue_matches(j, queue))
            .min_by_key(|j| (j.ready_at(), j.created_at, j.id))
            .map(|j| j.id);

        Ok(next.and_then(|id| {
            jobs.get_mut(&id).map(|job| {
                job.mark_running(now);
                job.clone()
            })
        }))
    }

    fn claim(&self, job_id: JobId, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.write_jobs()?;
        match jobs.get_mut(&job_id) {
            Some(job) if job.status.is_claimable() && job.is_ready(now) => {
                job.mark_running(now);
                Ok(Some(job.clone()))
            }
            Some(_) => Ok(None),
            None => Err(JobStoreError::NotFound(job_id)),
        }
    }

    fn next_scheduled_at(
        &self,
        queue: Option<&str>,
    ) -> Result<Option<DateTime<Utc>>, JobStoreError> {
        Ok(self
            .read_jobs()?
            .values()
            .filter(|j| j.status.is_claimable() && queue_matches(j, queue))
            .filter_map(|j| j.scheduled_at)
            .min())
    }

    fn cancel(&self, job_id: JobId, now: DateTime<Utc>) -> Result<Job, JobStoreError> {
        let mut jobs = self.write_jobs()?;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        if !job.status.is_claimable() {
            return Err(JobStoreError::NotCancellable(job_id));
        }
        job.mark_cancelled(now);
        Ok(job.clone())
    }

    fn list_by_status(
        &self,
        status: Option<&JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.read_jobs()?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| {
                status.is_none_or(|s| std::mem::discriminant(&j.status) == std::mem::discriminant(s))
            })
            .cloned()
            .collect();

        result.sort_by_key(|j| (j.created_at, j.id));
        result.truncate(limit);
        Ok(result)
    }

    fn list_by_name(&self, name: &str, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.read_jobs()?;
        let mut result: Vec<_> = jobs.values().filter(|j| j.name == name).cloned().collect();

        result.sort_by_key(|j| (j.created_at, j.id));
        result.truncate(limit);
        Ok(result)
    }

    fn dead_letter(&self, job: Job, reason: String, at: DateTime<Utc>) -> Result<(), JobStoreError> {
        let mut jobs = self.write_jobs()?;
        let mut dls = self.write_dead_letters()?;

        jobs.remove(&job.id);
        dls.insert(job.id, DeadLetterEntry::new(job, reason, at));

        Ok(())
    }

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, JobStoreError> {
        let dls = self.read_dead_letters()?;
        let mut result: Vec<_> = dls.values().cloned().collect();

        result.sort_by_key(|e| (e.dead_lettered_at, e.job.id));
        result.truncate(limit);
        Ok(result)
    }

    fn retry_dead_letter(&self, job_id: JobId, now: DateTime<Utc>) -> Result<Job, JobStoreError> {
        let mut jobs = self.write_jobs()?;
        let mut dls = self.write_dead_letters()?;

        let entry = dls.remove(&job_id).ok_or(JobStoreError::NotFound(job_id))?;

        let mut job = entry.job;
        job.restart_lineage(now);

        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    fn delete_dead_letter(&self, job_id: JobId) -> Result<(), JobStoreError> {
        self.write_dead_letters()?
            .remove(&job_id)
            .map(|_| ())
            .ok_or(JobStoreError::NotFound(job_id))
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.read_jobs()?;
        let dls = self.read_dead_letters()?;

        let mut stats = JobStats::default();

        for job in jobs.values() {
            match &job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Retrying { .. } => stats.retrying += 1,
                JobStatus::Succeeded => stats.succeeded += 1,
                JobStatus::Discarded { .. } => stats.discarded += 1,
                JobStatus::Exhausted { .. } => stats.exhausted += 1,
                JobStatus::Escalated { .. } => stats.escalated += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats.escalated += dls.len();

        Ok(stats)
    }
}

impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        (**self).enqueue(job)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).get(job_id)
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).update(job)
    }

    fn claim_next(
        &self,
        queue: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, JobStoreError> {
        (**self).claim_next(queue, now)
    }

    fn claim(&self, job_id: JobId, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError> {
        (**self).claim(job_id, now)
    }

    fn next_scheduled_at(
        &self,
        queue: Option<&str>,
    ) -> Result<Option<DateTime<Utc>>, JobStoreError> {
        (**self).next_scheduled_at(queue)
    }

    fn cancel(&self, job_id: JobId, now: DateTime<Utc>) -> Result<Job, JobStoreError> {
        (**self).cancel(job_id, now)
    }

    fn list_by_status(
        &self,
        status: Option<&JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        (**self).list_by_status(status, limit)
    }

    fn list_by_name(&self, name: &str, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        (**self).list_by_name(name, limit)
    }

    fn dead_letter(&self, job: Job, reason: String, at: DateTime<Utc>) -> Result<(), JobStoreError> {
        (**self).dead_letter(job, reason, at)
    }

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, JobStoreError> {
        (**self).list_dead_letters(limit)
    }

    fn retry_dead_letter(&self, job_id: JobId, now: DateTime<Utc>) -> Result<Job, JobStoreError> {
        (**self).retry_dead_letter(job_id, now)
    }

    fn delete_dead_letter(&self, job_id: JobId) -> Result<(), JobStoreError> {
        (**self).delete_dead_letter(job_id)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::DEFAULT_QUEUE;
    use chrono::Duration;

    fn job(now: DateTime<Utc>) -> Job {
        Job::new("test", DEFAULT_QUEUE, serde_json::json!({}), now)
    }

    #[test]
    fn enqueue_and_claim() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();

        let job_id = store.enqueue(job(now)).unwrap();

        let claimed = store.claim_next(None, now).unwrap().unwrap();
        assert_eq!(claimed.id, job_id);
        assert!(matches!(claimed.status, JobStatus::Running));
        assert_eq!(claimed.executions, 1);

        // No more jobs
        assert!(store.claim_next(None, now).unwrap().is_none());
    }

    #[test]
    fn duplicate_enqueue_is_rejected() {
        let store = InMemoryJobStore::new();
        let job = job(Utc::now());

        store.enqueue(job.clone()).unwrap();
        assert!(matches!(
            store.enqueue(job),
            Err(JobStoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn scheduled_jobs_wait_until_due() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        let due = now + Duration::seconds(30);

        let job_id = store.enqueue(job(now).scheduled_at(due)).unwrap();

        assert!(store.claim_next(None, now).unwrap().is_none());
        assert!(store.claim(job_id, now).unwrap().is_none());
        assert_eq!(store.next_scheduled_at(None).unwrap(), Some(due));

        let claimed = store.claim_next(None, due).unwrap().unwrap();
        assert_eq!(claimed.id, job_id);
    }

    #[test]
    fn queue_filter_isolates_jobs() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();

        let mut mailers = job(now);
        mailers.queue = "mailers".to_string();
        store.enqueue(mailers).unwrap();

        assert!(store.claim_next(Some("default"), now).unwrap().is_none());
        assert!(store.claim_next(Some("mailers"), now).unwrap().is_some());
    }

    #[test]
    fn earliest_ready_job_is_claimed_first() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();

        let late = store.enqueue(job(now).scheduled_at(now - Duration::seconds(1))).unwrap();
        let early = store.enqueue(job(now).scheduled_at(now - Duration::seconds(10))).unwrap();

        assert_eq!(store.claim_next(None, now).unwrap().unwrap().id, early);
        assert_eq!(store.claim_next(None, now).unwrap().unwrap().id, late);
    }

    #[test]
    fn cancel_only_waiting_jobs() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();

        let waiting = store.enqueue(job(now).scheduled_at(now + Duration::seconds(5))).unwrap();
        let cancelled = store.cancel(waiting, now).unwrap();
        assert!(matches!(cancelled.status, JobStatus::Cancelled));
        assert!(store.claim(waiting, now + Duration::seconds(10)).unwrap().is_none());

        let running = store.enqueue(job(now)).unwrap();
        store.claim(running, now).unwrap();
        assert!(matches!(
            store.cancel(running, now),
            Err(JobStoreError::NotCancellable(_))
        ));
    }

    #[test]
    fn dead_letter_flow() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();

        let job_id = store.enqueue(job(now)).unwrap();
        let mut claimed = store.claim_next(None, now).unwrap().unwrap();
        claimed.counters.increment(forgejobs_retry::RuleId::new(0));
        claimed.mark_escalated(&forgejobs_retry::Failure::new("Boom", "x"), now, now);

        store
            .dead_letter(claimed, "no declaration matched".to_string(), now)
            .unwrap();

        // Job is no longer in main queue
        assert!(store.get(job_id).unwrap().is_none());

        // Job is in DLQ
        let dls = store.list_dead_letters(10).unwrap();
        assert_eq!(dls.len(), 1);
        assert_eq!(dls[0].job.id, job_id);

        // Replay starts a new lineage
        let retried = store.retry_dead_letter(job_id, now).unwrap();
        assert!(matches!(retried.status, JobStatus::Pending));
        assert_ne!(retried.id, job_id);
        assert!(retried.counters.is_empty());
        assert!(store.get(retried.id).unwrap().is_some());

        // DLQ is now empty
        assert!(store.list_dead_letters(10).unwrap().is_empty());
        assert!(matches!(
            store.delete_dead_letter(job_id),
            Err(JobStoreError::NotFound(_))
        ));
    }

    #[test]
    fn stats_tracking() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();

        for i in 0..5 {
            store
                .enqueue(Job::new("test", DEFAULT_QUEUE, serde_json::json!({ "i": i }), now))
                .unwrap();
        }

        let stats = store.stats().unwrap();
        assert_eq!(stats.pending, 5);

        store.claim_next(None, now).unwrap();
        store.claim_next(None, now).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.running, 2);
    }

    #[test]
    fn list_by_status_and_name() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();

        store.enqueue(job(now)).unwrap();
        store
            .enqueue(Job::new("other", DEFAULT_QUEUE, serde_json::json!({}), now))
            .unwrap();
        store.claim_next(Some(DEFAULT_QUEUE), now).unwrap();

        assert_eq!(store.list_by_status(Some(&JobStatus::Running), 10).unwrap().len(), 1);
        assert_eq!(store.list_by_status(None, 10).unwrap().len(), 2);
        assert_eq!(store.list_by_name("other", 10).unwrap().len(), 1);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Claims come out in ready order and never ahead of `now`.
            #[test]
            fn claims_respect_schedule(offsets in proptest::collection::vec(-100i64..100, 1..30), at in -100i64..100) {
                let store = InMemoryJobStore::new();
                let base = Utc::now();
                for offset in &offsets {
                    store.enqueue(job(base).scheduled_at(base + Duration::seconds(*offset))).unwrap();
                }

                let now = base + Duration::seconds(at);
                let mut claimed = Vec::new();
                while let Some(job) = store.claim_next(None, now).unwrap() {
                    claimed.push(job.scheduled_at.unwrap());
                }

                let expected = offsets.iter().filter(|o| **o <= at).count();
                prop_assert_eq!(claimed.len(), expected);
                prop_assert!(claimed.iter().all(|t| *t <= now));
                prop_assert!(claimed.windows(2).all(|w| w[0] <= w[1]));
            }
        }
    }
}
