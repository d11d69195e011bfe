//! Job type definitions: a body plus its retry/discard declarations.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use forgejobs_core::PolicyResult;
use forgejobs_retry::{Discard, Failure, JobPolicy, Retry};

use super::arguments::deserialize_arguments;
use super::types::{DEFAULT_QUEUE, JobId};

/// What a job body sees about the attempt it is running.
#[derive(Debug, Clone, Copy)]
pub struct JobContext<'a> {
    pub job_id: JobId,
    pub job_name: &'a str,
    pub queue: &'a str,
    /// 1 on the first run, 2 on the first retry, ...
    pub executions: u32,
    pub arguments: &'a serde_json::Value,
}

/// Type-erased job body.
pub type PerformFn = Arc<dyn Fn(&JobContext<'_>) -> Result<(), Failure> + Send + Sync>;

/// A registered job type.
#[derive(Clone)]
pub struct JobDefinition {
    name: String,
    queue: String,
    policy: JobPolicy,
    perform: PerformFn,
}

impl JobDefinition {
    /// Job whose arguments decode into `A` before `body` runs.
    ///
    /// Decoding failures are raised as `DeserializationError` failures and go
    /// through the declared retry/discard rules like any other failure.
    pub fn new<A, F>(name: impl Into<String>, body: F) -> Self
    where
        A: DeserializeOwned + 'static,
        F: Fn(&JobContext<'_>, A) -> Result<(), Failure> + Send + Sync + 'static,
    {
        Self::raw(name, move |ctx| {
            let arguments = deserialize_arguments::<A>(ctx.arguments)?;
            body(ctx, arguments)
        })
    }

    /// Job that reads its JSON arguments directly.
    pub fn raw<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&JobContext<'_>) -> Result<(), Failure> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            queue: DEFAULT_QUEUE.to_string(),
            policy: JobPolicy::new(),
            perform: Arc::new(body),
        }
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Declare a retry rule. Rules are matched in declaration order.
    pub fn retry_on(mut self, retry: Retry) -> PolicyResult<Self> {
        self.policy.declare_retry(retry)?;
        Ok(self)
    }

    /// Declare a discard rule. Discards take precedence over retries.
    pub fn discard_on(mut self, discard: Discard) -> PolicyResult<Self> {
        self.policy.declare_discard(discard)?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    pub fn policy(&self) -> &JobPolicy {
        &self.policy
    }

    pub fn perform(&self, ctx: &JobContext<'_>) -> Result<(), Failure> {
        (self.perform)(ctx)
    }
}

impl core::fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("queue", &self.queue)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Args {
        name: String,
    }

    fn ctx<'a>(arguments: &'a serde_json::Value) -> JobContext<'a> {
        JobContext {
            job_id: JobId::new(),
            job_name: "greet",
            queue: DEFAULT_QUEUE,
            executions: 1,
            arguments,
        }
    }

    #[test]
    fn typed_body_receives_decoded_arguments() {
        let def = JobDefinition::new("greet", |_ctx, args: Args| {
            if args.name == "ada" {
                Ok(())
            } else {
                Err(Failure::new("WrongName", args.name))
            }
        });

        let ok = serde_json::json!({ "name": "ada" });
        assert!(def.perform(&ctx(&ok)).is_ok());

        let wrong = serde_json::json!({ "name": "bob" });
        assert_eq!(def.perform(&ctx(&wrong)).unwrap_err().message, "bob");
    }

    #[test]
    fn undecodable_arguments_raise_deserialization_failure() {
        let def = JobDefinition::new("greet", |_ctx, _args: Args| Ok(()));

        let bad = serde_json::json!({ "nom": "ada" });
        let failure = def.perform(&ctx(&bad)).unwrap_err();
        assert!(failure.is_deserialization());
    }

    #[test]
    fn declarations_accumulate_on_the_policy() {
        let def = JobDefinition::raw("noop", |_| Ok(()))
            .queue("mailers")
            .retry_on(Retry::on(["A"]))
            .unwrap()
            .discard_on(Discard::on(["B"]))
            .unwrap();

        assert_eq!(def.queue_name(), "mailers");
        assert_eq!(def.policy().retry_rules().len(), 1);
        assert_eq!(def.policy().discard_rules().len(), 1);
    }
}
