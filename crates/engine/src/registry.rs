use std::collections::HashMap;

use engine_core::{EngineError, JobId, JobStatus};

use crate::condition::JobStatusLookup;
use crate::job::Job;

/// Indexed collection of every known job, owned exclusively by the
/// scheduler thread. Partition views are derived on demand from `status`
/// rather than maintained as separate collections, so a job's status and
/// its partition membership can never disagree.
#[derive(Default)]
pub struct JobRegistry {
    jobs: HashMap<JobId, Job>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, job: Job) {
        self.jobs.insert(job.id, job);
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(&id)
    }

    pub fn require(&self, id: JobId) -> Result<&Job, EngineError> {
        self.jobs.get(&id).ok_or(EngineError::NotFound(id))
    }

    pub fn require_mut(&mut self, id: JobId) -> Result<&mut Job, EngineError> {
        self.jobs.get_mut(&id).ok_or(EngineError::NotFound(id))
    }

    pub fn remove(&mut self, id: JobId) -> Option<Job> {
        self.jobs.remove(&id)
    }

    pub fn ids_with_status(&self, status: JobStatus) -> Vec<JobId> {
        self.jobs
            .values()
            .filter(|j| j.status == status)
            .map(|j| j.id)
            .collect()
    }

    pub fn pending_ids(&self) -> Vec<JobId> {
        self.ids_with_status(JobStatus::Pending)
    }

    pub fn has_live_jobs(&self) -> bool {
        self.jobs
            .values()
            .any(|j| !j.status.is_terminal())
    }

    pub fn all_ids(&self) -> Vec<JobId> {
        self.jobs.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl JobStatusLookup for JobRegistry {
    fn status_of(&self, id: JobId) -> Option<JobStatus> {
        self.jobs.get(&id).map(|j| j.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Callable;
    use crate::job::JobBuilder;
    use crate::test_support::NoopBackend;
    use std::sync::Arc;

    fn make_job(registry: &mut JobRegistry) -> JobId {
        let backend = Arc::new(NoopBackend::default());
        let job = JobBuilder::new(
            Callable::Named {
                reference: "noop".into(),
                payload: serde_json::json!(null),
            },
            backend,
        )
        .build();
        let id = job.id;
        registry.insert(job);
        id
    }

    #[test]
    fn status_partition_always_agrees_with_job_status() {
        let mut registry = JobRegistry::new();
        let id = make_job(&mut registry);
        assert_eq!(registry.ids_with_status(JobStatus::Created), vec![id]);

        registry.get_mut(id).unwrap().status = JobStatus::Pending;
        assert_eq!(registry.ids_with_status(JobStatus::Created), Vec::<JobId>::new());
        assert_eq!(registry.pending_ids(), vec![id]);
    }

    #[test]
    fn require_missing_job_is_not_found() {
        let registry = JobRegistry::new();
        let err = registry.require(JobId::new()).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn has_live_jobs_ignores_terminal_jobs() {
        let mut registry = JobRegistry::new();
        let id = make_job(&mut registry);
        assert!(registry.has_live_jobs());
        registry.get_mut(id).unwrap().status = JobStatus::Done;
        assert!(!registry.has_live_jobs());
    }
}
