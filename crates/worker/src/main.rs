use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use forgejobs_infra::clock::Clock;
use forgejobs_infra::config::ExecutorConfig;
use forgejobs_infra::jobs::{ExecutorError, InMemoryJobStore, JobDefinition, JobExecutor, JobStore};
use forgejobs_retry::{Discard, Failure, KindHierarchy, Retry, WaitPolicy};

/// Give up waiting for the demo jobs after this long.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize, Deserialize)]
struct Delivery {
    url: String,
    /// Time out this many times before succeeding
    timeouts: u32,
    gone: bool,
}

fn deliver_webhook() -> anyhow::Result<JobDefinition> {
    let definition = JobDefinition::new("DeliverWebhook", |ctx, delivery: Delivery| {
        if delivery.gone {
            return Err(Failure::new("Http::Gone", format!("{} returned 410", delivery.url)));
        }
        if ctx.executions <= delivery.timeouts {
            return Err(Failure::new(
                "Net::Timeout",
                format!("{} timed out (execution {})", delivery.url, ctx.executions),
            ));
        }
        tracing::info!(job_id = %ctx.job_id, url = %delivery.url, "webhook delivered");
        Ok(())
    })
    .queue("webhooks")
    .retry_on(
        Retry::on(["Net::Error"])
            .wait(WaitPolicy::linear(Duration::from_millis(100)))
            .attempts(3),
    )?
    .discard_on(Discard::on(["Http::Gone"]).on_discard(|event| {
        tracing::warn!(job_id = %event.job_id, error = %event.failure, "dropping delivery");
        Ok(())
    }))?;
    Ok(definition)
}

fn hierarchy() -> anyhow::Result<KindHierarchy> {
    Ok(KindHierarchy::new()
        .with("Net::Error", "StandardError")?
        .with("Net::Timeout", "Net::Error")?
        .with("Http::Gone", "StandardError")?)
}

fn deliveries() -> [Delivery; 4] {
    [
        Delivery {
            url: "https://example.com/hooks/a".to_string(),
            timeouts: 0,
            gone: false,
        },
        Delivery {
            url: "https://example.com/hooks/b".to_string(),
            timeouts: 2,
            gone: false,
        },
        Delivery {
            url: "https://example.com/hooks/c".to_string(),
            timeouts: 0,
            gone: true,
        },
        Delivery {
            url: "https://example.com/hooks/d".to_string(),
            timeouts: 10,
            gone: false,
        },
    ]
}

/// Enqueue every delivery and return how many escalated.
///
/// In inline mode each lineage runs inside `enqueue`, so an escalation shows
/// up here. The job is already dead-lettered; log it and keep going.
fn enqueue_deliveries<S, C>(
    executor: &JobExecutor<S, C>,
    deliveries: &[Delivery],
) -> anyhow::Result<usize>
where
    S: JobStore,
    C: Clock,
{
    let mut escalated = 0;
    for delivery in deliveries {
        match executor.enqueue("DeliverWebhook", delivery) {
            Ok(job_id) => {
                tracing::info!(job_id = %job_id, url = %delivery.url, "enqueued delivery");
            }
            Err(ExecutorError::Escalated {
                job_id,
                failure,
                cause,
            }) => {
                escalated += 1;
                tracing::warn!(job_id = %job_id, url = %delivery.url, %cause, error = %failure, "delivery escalated");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(escalated)
}

fn main() -> anyhow::Result<()> {
    forgejobs_observability::init();

    let config = ExecutorConfig::from_env().context("invalid executor configuration")?;
    let store = InMemoryJobStore::arc();

    let mut executor = JobExecutor::new(store.clone(), config).with_hierarchy(hierarchy()?);
    executor.register(deliver_webhook()?);

    enqueue_deliveries(&executor, &deliveries())?;

    let poll_interval = executor.config().poll_interval;
    let handle = executor.spawn().context("failed to start workers")?;

    let deadline = Instant::now() + DRAIN_TIMEOUT;
    loop {
        let stats = store.stats()?;
        if stats.pending + stats.running + stats.retrying == 0 {
            break;
        }
        if Instant::now() >= deadline {
            tracing::warn!(?stats, "timed out waiting for jobs");
            break;
        }
        thread::sleep(poll_interval);
    }

    let stats = handle.shutdown();
    tracing::info!(
        processed = stats.jobs_processed,
        succeeded = stats.jobs_succeeded,
        retried = stats.jobs_retried,
        discarded = stats.jobs_discarded,
        exhausted = stats.jobs_exhausted,
        escalated = stats.jobs_escalated,
        cancelled = stats.jobs_cancelled,
        "executor stopped"
    );

    for entry in store.list_dead_letters(100)? {
        tracing::error!(
            job_id = %entry.job.id,
            executions = entry.job.executions,
            reason = %entry.reason,
            "dead-lettered job"
        );
    }

    Ok(())
}
