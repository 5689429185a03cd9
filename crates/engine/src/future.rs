use std::sync::{Arc, Mutex};

use engine_core::{EngineError, JobId};
use serde_json::Value;

type DoneCallback = Box<dyn FnMut(&Value) + Send>;
type ErrorCallback = Box<dyn FnMut(&anyhow::Error) + Send>;

enum Outcome {
    Unset,
    Value(Value),
    Error(Arc<anyhow::Error>),
}

struct Inner {
    job_id: JobId,
    outcome: Outcome,
    done_callbacks: Vec<DoneCallback>,
    error_callbacks: Vec<ErrorCallback>,
}

/// Observable container for a job's eventual result. Identity equality only
/// (pointer equality on the shared inner state); never rebound to a
/// different job after construction.
///
/// The scheduler thread is the sole writer of the outcome; arbitrary caller
/// threads may read it or register callbacks concurrently, so the inner
/// state is the one piece of engine state guarded by a lock.
#[derive(Clone)]
pub struct FutureHandle {
    inner: Arc<Mutex<Inner>>,
}

impl FutureHandle {
    pub fn new(job_id: JobId) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                job_id,
                outcome: Outcome::Unset,
                done_callbacks: Vec::new(),
                error_callbacks: Vec::new(),
            })),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.inner.lock().unwrap().job_id
    }

    /// Returns the stored value, or `InvalidState` if the job has not
    /// finished successfully.
    pub fn result(&self) -> Result<Value, EngineError> {
        let inner = self.inner.lock().unwrap();
        match &inner.outcome {
            Outcome::Value(v) => Ok(v.clone()),
            _ => Err(EngineError::InvalidState(inner.job_id)),
        }
    }

    /// The stored error, if the job failed.
    pub fn exception(&self) -> Option<Arc<anyhow::Error>> {
        match &self.inner.lock().unwrap().outcome {
            Outcome::Error(e) => Some(e.clone()),
            _ => None,
        }
    }

    pub fn add_done_callback(&self, cb: impl FnMut(&Value) + Send + 'static) {
        self.inner.lock().unwrap().done_callbacks.push(Box::new(cb));
    }

    pub fn add_error_callback(&self, cb: impl FnMut(&anyhow::Error) + Send + 'static) {
        self.inner.lock().unwrap().error_callbacks.push(Box::new(cb));
    }

    /// Called once, on the scheduler thread, when the job completes
    /// successfully. Fires every done-callback in insertion order, catching
    /// and logging panics so one misbehaving callback cannot break another.
    pub fn complete(&self, value: Value) {
        let mut inner = self.inner.lock().unwrap();
        inner.outcome = Outcome::Value(value.clone());
        for cb in inner.done_callbacks.iter_mut() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(&value)));
            if let Err(_panic) = result {
                tracing::error!(job_id = %inner.job_id, "done callback panicked");
            }
        }
    }

    /// Called once, on the scheduler thread, when the job fails terminally.
    pub fn fail(&self, error: anyhow::Error) {
        let error = Arc::new(error);
        let mut inner = self.inner.lock().unwrap();
        inner.outcome = Outcome::Error(error.clone());
        for cb in inner.error_callbacks.iter_mut() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(&error)));
            if let Err(_panic) = result {
                tracing::error!(job_id = %inner.job_id, "error callback panicked");
            }
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self.inner.lock().unwrap().outcome, Outcome::Unset)
    }

    /// Clears a settled outcome back to `Unset` for a rerun, preserving
    /// this handle's identity and its registered callbacks so downstream
    /// jobs holding an `Arg::Future` onto it keep pointing at the same
    /// future and see it fire again on the next completion.
    pub(crate) fn reset(&self) {
        self.inner.lock().unwrap().outcome = Outcome::Unset;
    }
}

impl PartialEq for FutureHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for FutureHandle {}

impl std::fmt::Debug for FutureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FutureHandle({})", self.job_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn done_callback_fires_once_with_value() {
        let handle = FutureHandle::new(JobId::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        handle.add_done_callback(move |v| {
            assert_eq!(v, &serde_json::json!(4));
            count2.fetch_add(1, Ordering::SeqCst);
        });
        handle.complete(serde_json::json!(4));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(handle.result().unwrap(), serde_json::json!(4));
    }

    #[test]
    fn result_before_completion_is_invalid_state() {
        let handle = FutureHandle::new(JobId::new());
        assert!(handle.result().is_err());
    }

    #[test]
    fn identity_equality_not_value_equality() {
        let a = FutureHandle::new(JobId::new());
        let b = a.clone();
        let c = FutureHandle::new(JobId::new());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn panicking_callback_does_not_block_others() {
        let handle = FutureHandle::new(JobId::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        handle.add_done_callback(|_| panic!("boom"));
        handle.add_done_callback(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        handle.complete(serde_json::json!(null));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
