use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use engine_core::{JobId, JobStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::{Backend, BackendSlot, Callable};
use crate::condition::Condition;
use crate::future::FutureHandle;
use crate::ledger::ResourceClass;

/// A job argument: either a literal value or a reference to another job's
/// eventual result, resolved just before the job transitions to `Running`.
#[derive(Clone)]
pub enum Arg {
    Value(Value),
    Future(FutureHandle),
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        Arg::Value(v)
    }
}

impl From<FutureHandle> for Arg {
    fn from(f: FutureHandle) -> Self {
        Arg::Future(f)
    }
}

/// A deferred unit of work with policy and lifecycle, submitted to an
/// [`crate::engine::Engine`].
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub func: Callable,
    pub args: Vec<Arg>,
    pub kwargs: BTreeMap<String, Arg>,
    pub status: JobStatus,
    pub retries: u32,
    pub retry_remain: u32,
    pub retry_delay: Duration,
    pub condition: Option<Condition>,
    pub wait_poll_interval: Duration,
    pub backend: Arc<dyn Backend>,
    pub dep_job_ids: Vec<JobId>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub future: FutureHandle,
    pub backend_slot: Option<BackendSlot>,
}

impl Job {
    /// Ledger classes required for this job: the backend's declared classes
    /// plus the universal `JobsTotal` class.
    pub fn resource_classes(&self) -> Vec<ResourceClass> {
        let mut classes = vec![ResourceClass::JobsTotal];
        classes.extend_from_slice(self.backend.resource_classes());
        classes
    }

    /// Structurally-comparable projection of a job, excluding the engine
    /// binding (backend, future, live lifecycle task).
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            name: self.name.clone(),
            status: self.status,
            retries: self.retries,
            retry_remain: self.retry_remain,
            dep_job_ids: self.dep_job_ids.clone(),
            created_at: self.created_at,
            submitted_at: self.submitted_at,
            stopped_at: self.stopped_at,
        }
    }
}

/// Serializable projection of a [`Job`], used for observability and the
/// round-trip invariant over job state. Excludes anything tied to the
/// live process (the callable, the backend, the future, the task handle).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub retries: u32,
    pub retry_remain: u32,
    pub dep_job_ids: Vec<JobId>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

/// Builder for [`Job`], mirroring the keyword-heavy constructor of the
/// system this engine generalizes from: retries, condition, naming and
/// poll interval are all optional with sane defaults.
pub struct JobBuilder {
    name: Option<String>,
    func: Callable,
    args: Vec<Arg>,
    kwargs: BTreeMap<String, Arg>,
    retries: u32,
    retry_delay: Duration,
    condition: Option<Condition>,
    wait_poll_interval: Duration,
    backend: Arc<dyn Backend>,
    done_callback: Option<Box<dyn FnMut(&Value) + Send + 'static>>,
    error_callback: Option<Box<dyn FnMut(&anyhow::Error) + Send + 'static>>,
}

impl JobBuilder {
    pub fn new(func: Callable, backend: Arc<dyn Backend>) -> Self {
        Self {
            name: None,
            func,
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            retries: 0,
            retry_delay: Duration::ZERO,
            condition: None,
            wait_poll_interval: Duration::from_millis(10),
            backend,
            done_callback: None,
            error_callback: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn args(mut self, args: Vec<Arg>) -> Self {
        self.args = args;
        self
    }

    pub fn kwargs(mut self, kwargs: BTreeMap<String, Arg>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn retries(mut self, retries: u32, retry_delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn wait_poll_interval(mut self, interval: Duration) -> Self {
        self.wait_poll_interval = interval;
        self
    }

    pub fn on_done(mut self, cb: impl FnMut(&Value) + Send + 'static) -> Self {
        self.done_callback = Some(Box::new(cb));
        self
    }

    pub fn on_error(mut self, cb: impl FnMut(&anyhow::Error) + Send + 'static) -> Self {
        self.error_callback = Some(Box::new(cb));
        self
    }

    pub fn build(self) -> Job {
        let id = JobId::new();
        let future = FutureHandle::new(id);
        if let Some(cb) = self.done_callback {
            future.add_done_callback(cb);
        }
        if let Some(cb) = self.error_callback {
            future.add_error_callback(cb);
        }
        let name = self.name.unwrap_or_else(|| match &self.func {
            Callable::Inline(_) => "<inline>".to_string(),
            Callable::Named { reference, .. } => reference.clone(),
        });
        Job {
            id,
            name,
            func: self.func,
            args: self.args,
            kwargs: self.kwargs,
            status: JobStatus::Created,
            retries: self.retries,
            retry_remain: self.retries,
            retry_delay: self.retry_delay,
            condition: self.condition,
            wait_poll_interval: self.wait_poll_interval,
            backend: self.backend,
            dep_job_ids: Vec::new(),
            created_at: Utc::now(),
            submitted_at: None,
            stopped_at: None,
            future,
            backend_slot: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Callable;
    use crate::test_support::NoopBackend;

    #[test]
    fn builder_defaults_name_from_named_callable() {
        let backend = Arc::new(NoopBackend::default());
        let job = JobBuilder::new(
            Callable::Named {
                reference: "square".into(),
                payload: serde_json::json!(null),
            },
            backend,
        )
        .build();
        assert_eq!(job.name, "square");
        assert_eq!(job.status, JobStatus::Created);
        assert_eq!(job.retry_remain, job.retries);
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let backend = Arc::new(NoopBackend::default());
        let job = JobBuilder::new(
            Callable::Named {
                reference: "noop".into(),
                payload: serde_json::json!(null),
            },
            backend,
        )
        .name("my-job")
        .build();
        let snapshot = job.snapshot();
        let encoded = serde_json::to_string(&snapshot).unwrap();
        let decoded: JobSnapshot = serde_json::from_str(&encoded).unwrap();
        assert_eq!(snapshot, decoded);
    }
}
