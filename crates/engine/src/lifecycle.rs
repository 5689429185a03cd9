use std::cell::RefCell;
use std::rc::Rc;

use engine_core::{EngineError, JobId};
use serde_json::Value;

use crate::condition::Condition;
use crate::engine::{EngineEvent, EngineState};
use crate::job::Arg;

pub(crate) type Shared = Rc<RefCell<EngineState>>;

/// Internal failure raised while resolving a job's arguments. Never
/// surfaced past this module.
enum ResolveFailure {
    /// An upstream dependency is itself `Failed`/`Cancelled`; the current
    /// job is cancelled in turn.
    Stop,
    /// Resolution reached a dependency that was neither terminal nor
    /// resolvable — a scheduler bug, not a user-reachable outcome. The
    /// current job is forced to `Failed` rather than `Cancelled` so it
    /// reads as an engine defect, not a normal dependency-chain outcome.
    InvariantViolation(EngineError),
}

/// Derive the auto-condition from future-typed arguments and conjoin it
/// with any explicit condition, exactly once, at emission.
pub(crate) fn resolve_dependencies(shared: &Shared, job_id: JobId) {
    let mut state = shared.borrow_mut();
    let job = match state.registry.get(job_id) {
        Some(j) => j,
        None => return,
    };
    let dep_ids: Vec<JobId> = job
        .args
        .iter()
        .chain(job.kwargs.values())
        .filter_map(|arg| match arg {
            Arg::Future(f) => Some(f.job_id()),
            Arg::Value(_) => None,
        })
        .collect();
    if dep_ids.is_empty() {
        return;
    }
    let after_others = Condition::AfterOthers(dep_ids.clone());
    let job = state
        .registry
        .get_mut(job_id)
        .expect("job removed from registry while its own lifecycle task holds it");
    job.condition = Some(match job.condition.take() {
        Some(existing) => existing.and(after_others),
        None => after_others,
    });
    job.dep_job_ids = dep_ids;
}

/// Drives one job from `Pending` through to a terminal state. Spawned via
/// `spawn_local` onto the scheduler thread's single-threaded runtime; every
/// `RefCell` borrow here is scoped to end before the next `.await` point so
/// no borrow is ever held across a suspension.
pub(crate) async fn run_job(shared: Shared, job_id: JobId) {
    loop {
        let still_pending = {
            let state = shared.borrow();
            state
                .registry
                .get(job_id)
                .map(|j| j.status == engine_core::JobStatus::Pending)
                .unwrap_or(false)
        };
        if !still_pending {
            return;
        }

        let (runnable, classes, poll_interval) = {
            let state = shared.borrow();
            let job = state
                .registry
                .get(job_id)
                .expect("job removed from registry while its own lifecycle task holds it");
            let runnable = job
                .condition
                .as_ref()
                .map(|c| c.satisfied(&state.registry))
                .unwrap_or(true);
            (runnable, job.resource_classes(), job.wait_poll_interval)
        };

        if !runnable {
            tokio::time::sleep(poll_interval).await;
            continue;
        }

        let acquired = shared.borrow_mut().ledger.acquire_all(&classes, 1);
        if !acquired {
            tokio::time::sleep(poll_interval).await;
            continue;
        }

        match resolve_args(&shared, job_id) {
            Ok((args, kwargs)) => {
                let (backend, func) = {
                    let mut state = shared.borrow_mut();
                    let job = state
                        .registry
                        .get_mut(job_id)
                        .expect("job removed from registry while its own lifecycle task holds it");
                    job.status = engine_core::JobStatus::Running;
                    let backend = job.backend.clone();
                    let func = job.func.clone();
                    drop(job);
                    state.emit(EngineEvent::JobStatusChanged {
                        id: job_id,
                        status: engine_core::JobStatus::Running,
                    });
                    (backend, func)
                };

                let (slot, fut) = backend.start(&func, args, kwargs);
                {
                    let mut state = shared.borrow_mut();
                    let job = state
                        .registry
                        .get_mut(job_id)
                        .expect("job removed from registry while its own lifecycle task holds it");
                    job.backend_slot = Some(slot);
                }

                let result = fut.await;
                match result {
                    Ok(value) => {
                        on_done(&shared, job_id, value);
                        return;
                    }
                    Err(err) => {
                        if on_failed(&shared, job_id, err).await {
                            // retried: loop back around as freshly pending.
                            continue;
                        }
                        return;
                    }
                }
            }
            Err(ResolveFailure::Stop) => {
                cancel_internal(&shared, job_id, &classes).await;
                return;
            }
            Err(ResolveFailure::InvariantViolation(err)) => {
                fail_internal(&shared, job_id, &classes, err);
                return;
            }
        }
    }
}

fn resolve_args(
    shared: &Shared,
    job_id: JobId,
) -> Result<(Vec<Value>, serde_json::Map<String, Value>), ResolveFailure> {
    let state = shared.borrow();
    let job = state
        .registry
        .get(job_id)
        .expect("job removed from registry while its own lifecycle task holds it");
    if job.dep_job_ids.is_empty() {
        let args: Vec<Value> = job
            .args
            .iter()
            .map(|a| match a {
                Arg::Value(v) => v.clone(),
                Arg::Future(_) => unreachable!("future arg without a recorded dependency"),
            })
            .collect();
        let kwargs = job
            .kwargs
            .iter()
            .map(|(k, a)| match a {
                Arg::Value(v) => (k.clone(), v.clone()),
                Arg::Future(_) => unreachable!("future arg without a recorded dependency"),
            })
            .collect();
        return Ok((args, kwargs));
    }
    drop(state);

    let resolve_one = |shared: &Shared, arg: &Arg| -> Result<Value, ResolveFailure> {
        match arg {
            Arg::Value(v) => Ok(v.clone()),
            Arg::Future(future) => {
                let upstream_id = future.job_id();
                let state = shared.borrow();
                let upstream = state.registry.get(upstream_id);
                match upstream.map(|j| j.status) {
                    Some(engine_core::JobStatus::Done) => Ok(future.result().unwrap_or(Value::Null)),
                    Some(engine_core::JobStatus::Failed) | Some(engine_core::JobStatus::Cancelled) => {
                        tracing::warn!(
                            job = %job_id,
                            upstream = %upstream_id,
                            "cancelling job because an upstream dependency did not complete"
                        );
                        Err(ResolveFailure::Stop)
                    }
                    _ => {
                        let message = format!(
                            "job {job_id} attempted to resolve non-terminal dependency {upstream_id}"
                        );
                        tracing::error!(job = %job_id, upstream = %upstream_id, "{message}");
                        Err(ResolveFailure::InvariantViolation(
                            EngineError::InternalInvariantViolation(job_id, message),
                        ))
                    }
                }
            }
        }
    };

    let state = shared.borrow();
    let job = state
        .registry
        .get(job_id)
        .expect("job removed from registry while its own lifecycle task holds it");
    let arg_list: Vec<Arg> = job.args.clone_refs();
    let kwarg_list: Vec<(String, Arg)> = job
        .kwargs
        .iter()
        .map(|(k, v)| (k.clone(), v.clone_ref()))
        .collect();
    drop(state);

    let mut args = Vec::with_capacity(arg_list.len());
    for arg in &arg_list {
        args.push(resolve_one(shared, arg)?);
    }
    let mut kwargs = serde_json::Map::new();
    for (k, arg) in &kwarg_list {
        kwargs.insert(k.clone(), resolve_one(shared, arg)?);
    }
    Ok((args, kwargs))
}

fn on_done(shared: &Shared, job_id: JobId, value: Value) {
    let mut state = shared.borrow_mut();
    let job = state
        .registry
        .get_mut(job_id)
        .expect("job removed from registry while its own lifecycle task holds it");
    tracing::info!(job = %job_id, name = %job.name, "job done");
    job.future.complete(value);
    job.status = engine_core::JobStatus::Done;
    job.stopped_at = Some(chrono::Utc::now());
    let classes = job.resource_classes();
    let backend = job.backend.clone();
    if let Some(mut slot) = job.backend_slot.take() {
        backend.clear_context(&mut slot);
    }
    state.ledger.release_all(&classes, 1);
    state.emit(EngineEvent::JobDone { id: job_id });
}

/// Returns `true` if the job was re-queued for a retry (caller should loop),
/// `false` if it reached the terminal `Failed` state.
async fn on_failed(shared: &Shared, job_id: JobId, err: anyhow::Error) -> bool {
    let (retry_remain, retry_delay) = {
        let mut state = shared.borrow_mut();
        let job = state
            .registry
            .get_mut(job_id)
            .expect("job removed from registry while its own lifecycle task holds it");
        tracing::error!(job = %job_id, name = %job.name, error = %err, "job failed");
        job.future.fail(err);
        let classes = job.resource_classes();
        let backend = job.backend.clone();
        if let Some(mut slot) = job.backend_slot.take() {
            backend.clear_context(&mut slot);
        }
        state.ledger.release_all(&classes, 1);
        (job.retry_remain, job.retry_delay)
    };

    if retry_remain > 0 {
        {
            let mut state = shared.borrow_mut();
            let job = state
                .registry
                .get_mut(job_id)
                .expect("job removed from registry while its own lifecycle task holds it");
            job.status = engine_core::JobStatus::Pending;
            job.retry_remain -= 1;
        }
        tokio::time::sleep(retry_delay).await;
        resolve_dependencies(shared, job_id);
        true
    } else {
        let mut state = shared.borrow_mut();
        let job = state
            .registry
            .get_mut(job_id)
            .expect("job removed from registry while its own lifecycle task holds it");
        job.status = engine_core::JobStatus::Failed;
        job.stopped_at = Some(chrono::Utc::now());
        state.emit(EngineEvent::JobFailed { id: job_id });
        false
    }
}

async fn cancel_internal(shared: &Shared, job_id: JobId, classes: &[crate::ledger::ResourceClass]) {
    let (backend, mut slot) = {
        let mut state = shared.borrow_mut();
        let job = state
            .registry
            .get_mut(job_id)
            .expect("job removed from registry while its own lifecycle task holds it");
        (job.backend.clone(), job.backend_slot.take())
    };
    if let Some(slot) = slot.as_mut() {
        backend.cancel_running(slot).await;
        backend.clear_context(slot);
    }
    let mut state = shared.borrow_mut();
    let job = state
        .registry
        .get_mut(job_id)
        .expect("job removed from registry while its own lifecycle task holds it");
    job.status = engine_core::JobStatus::Cancelled;
    job.stopped_at = Some(chrono::Utc::now());
    state.ledger.release_all(classes, 1);
    state.emit(EngineEvent::JobCancelled { id: job_id });
}

/// Forces a job to `Failed` after an internal invariant violation during
/// dependency resolution — never reached through a normal dependency
/// chain, so it is kept distinct from `cancel_internal`'s `Cancelled`
/// outcome.
fn fail_internal(shared: &Shared, job_id: JobId, classes: &[crate::ledger::ResourceClass], err: EngineError) {
    let mut state = shared.borrow_mut();
    let job = state
        .registry
        .get_mut(job_id)
        .expect("job removed from registry while its own lifecycle task holds it");
    tracing::error!(job = %job_id, error = %err, "job forced to failed by an internal invariant violation");
    job.future.fail(anyhow::Error::from(err));
    job.status = engine_core::JobStatus::Failed;
    job.stopped_at = Some(chrono::Utc::now());
    state.ledger.release_all(classes, 1);
    state.emit(EngineEvent::JobFailed { id: job_id });
}

/// Marks a still-`pending` job cancelled without touching the ledger (no
/// slot was ever acquired). Used by the `Cancel`/`CancelAll` command
/// handlers in the engine loop, not by the lifecycle task itself.
pub(crate) fn cancel_pending(shared: &Shared, job_id: JobId) {
    let mut state = shared.borrow_mut();
    let changed = match state.registry.get_mut(job_id) {
        Some(job) if !job.status.is_terminal() => {
            job.status = engine_core::JobStatus::Cancelled;
            job.stopped_at = Some(chrono::Utc::now());
            true
        }
        _ => false,
    };
    if changed {
        state.emit(EngineEvent::JobCancelled { id: job_id });
    }
}

impl Arg {
    fn clone_ref(&self) -> Arg {
        match self {
            Arg::Value(v) => Arg::Value(v.clone()),
            Arg::Future(f) => Arg::Future(f.clone()),
        }
    }
}

trait ArgSliceExt {
    fn clone_refs(&self) -> Vec<Arg>;
}

impl ArgSliceExt for Vec<Arg> {
    fn clone_refs(&self) -> Vec<Arg> {
        self.iter().map(Arg::clone_ref).collect()
    }
}
