use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use engine_core::{EngineError, EngineResult, JobId};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::{JoinHandle, LocalSet};

use crate::config::EngineConfig;
use crate::job::Job;
use crate::ledger::ResourceLedger;
use crate::lifecycle::{self, Shared};
use crate::registry::JobRegistry;

/// Event stream published as jobs move through the lifecycle. Mirrors the
/// tagged-enum shape this lineage's other event-emitting engines use for
/// their `EngineEvent` broadcast channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    Started,
    JobSubmitted { id: JobId },
    JobStatusChanged { id: JobId, status: engine_core::JobStatus },
    JobDone { id: JobId },
    JobFailed { id: JobId },
    JobCancelled { id: JobId },
    Warning { message: String },
    Stopped,
}

/// Point-in-time summary of the engine, published on a `watch` channel for
/// dashboards/UIs that want the latest state without replaying every event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub pending: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub jobs_remaining: Option<u64>,
}

pub(crate) struct EngineState {
    pub registry: JobRegistry,
    pub ledger: ResourceLedger,
    pub cache_root: PathBuf,
    event_tx: broadcast::Sender<EngineEvent>,
    snapshot_tx: watch::Sender<EngineSnapshot>,
}

impl EngineState {
    pub(crate) fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
        self.publish_snapshot();
    }

    fn publish_snapshot(&self) {
        use engine_core::JobStatus::*;
        let snapshot = EngineSnapshot {
            pending: self.registry.ids_with_status(Pending).len(),
            running: self.registry.ids_with_status(Running).len(),
            done: self.registry.ids_with_status(Done).len(),
            failed: self.registry.ids_with_status(Failed).len(),
            cancelled: self.registry.ids_with_status(Cancelled).len(),
            jobs_remaining: self.ledger.remaining(crate::ledger::ResourceClass::JobsTotal),
        };
        let _ = self.snapshot_tx.send(snapshot);
    }
}

pub(crate) enum Command {
    Submit(Job),
    Cancel(JobId, oneshot::Sender<()>),
    CancelAll(oneshot::Sender<()>),
    Remove(JobId, oneshot::Sender<()>),
    Status(JobId, oneshot::Sender<Option<engine_core::JobStatus>>),
    /// Cooperative equivalent of `wait`: awaits every currently-live
    /// lifecycle task instead of polling the snapshot counts.
    Join(Option<Duration>, oneshot::Sender<()>),
    /// Resets a terminal job back to `pending` and re-emits it in place,
    /// reusing its existing `JobId`/`FutureHandle` so downstream jobs that
    /// already reference its future keep pointing at the right place.
    Rerun(JobId, oneshot::Sender<EngineResult<()>>),
    Stop(oneshot::Sender<()>),
}

pub(crate) struct SchedulerThread {
    pub cmd_tx: tokio::sync::mpsc::UnboundedSender<Command>,
    pub event_rx_factory: broadcast::Sender<EngineEvent>,
    pub snapshot_rx: watch::Receiver<EngineSnapshot>,
    pub join: std::thread::JoinHandle<()>,
}

/// Spawns the dedicated scheduler thread: a single-threaded Tokio runtime
/// plus a `LocalSet`, so every job's lifecycle task and all registry/ledger
/// mutation happen on exactly one OS thread with no cross-thread locking —
/// generalizing this lineage's `EngineRuntime` event loop from a single
/// fixed backend to the pluggable `Backend` contract.
pub(crate) fn spawn_scheduler_thread(config: EngineConfig, engine_id: String) -> SchedulerThread {
    let (cmd_tx, mut cmd_rx) = tokio::sync::mpsc::unbounded_channel::<Command>();
    let (event_tx, _) = broadcast::channel(1024);
    let event_tx_for_thread = event_tx.clone();
    let (snapshot_tx, snapshot_rx) = watch::channel(EngineSnapshot::default());

    let cache_root = config
        .cache_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(".executor").join(&engine_id));

    let join = std::thread::Builder::new()
        .name("engine-scheduler".to_string())
        .spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build scheduler runtime");
            let local = LocalSet::new();

            let state = Rc::new(RefCell::new(EngineState {
                registry: JobRegistry::new(),
                ledger: ResourceLedger::new(
                    config.jobs_capacity(),
                    config.threads_capacity(),
                    config.processes_capacity(),
                    config.cluster_capacity(),
                ),
                cache_root,
                event_tx: event_tx_for_thread,
                snapshot_tx,
            }));

            local.block_on(&rt, run_command_loop(state, &mut cmd_rx));
        })
        .expect("failed to spawn scheduler thread");

    SchedulerThread {
        cmd_tx,
        event_rx_factory: event_tx,
        snapshot_rx,
        join,
    }
}

async fn run_command_loop(
    state: Shared,
    cmd_rx: &mut tokio::sync::mpsc::UnboundedReceiver<Command>,
) {
    state.borrow().emit(EngineEvent::Started);
    tracing::info!("engine scheduler started");

    let mut tasks: HashMap<JobId, JoinHandle<()>> = HashMap::new();

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Command::Submit(job) => {
                let job_id = job.id;
                {
                    let mut st = state.borrow_mut();
                    let mut job = job;
                    job.status = engine_core::JobStatus::Pending;
                    job.submitted_at = Some(chrono::Utc::now());
                    st.registry.insert(job);
                    st.emit(EngineEvent::JobSubmitted { id: job_id });
                }
                lifecycle::resolve_dependencies(&state, job_id);
                let shared = state.clone();
                let handle = tokio::task::spawn_local(async move {
                    lifecycle::run_job(shared, job_id).await;
                });
                tasks.insert(job_id, handle);
            }
            Command::Cancel(id, reply) => {
                cancel_one(&state, &mut tasks, id).await;
                let _ = reply.send(());
            }
            Command::CancelAll(reply) => {
                let ids = state.borrow().registry.all_ids();
                for id in ids {
                    cancel_one(&state, &mut tasks, id).await;
                }
                let _ = reply.send(());
            }
            Command::Remove(id, reply) => {
                cancel_one(&state, &mut tasks, id).await;
                state.borrow_mut().registry.remove(id);
                let _ = reply.send(());
            }
            Command::Status(id, reply) => {
                let status = state.borrow().registry.get(id).map(|j| j.status);
                let _ = reply.send(status);
            }
            Command::Join(timeout, reply) => {
                let handles: Vec<JoinHandle<()>> = tasks.drain().map(|(_, h)| h).collect();
                match timeout {
                    Some(d) => {
                        let _ = tokio::time::timeout(d, join_all(handles)).await;
                    }
                    None => {
                        join_all(handles).await;
                    }
                }
                let _ = reply.send(());
            }
            Command::Rerun(id, reply) => {
                let result = rerun_one(&state, &mut tasks, id);
                let _ = reply.send(result);
            }
            Command::Stop(reply) => {
                let ids = state.borrow().registry.all_ids();
                for id in ids {
                    cancel_one(&state, &mut tasks, id).await;
                }
                state.borrow().emit(EngineEvent::Stopped);
                tracing::info!("engine scheduler stopped");
                let _ = reply.send(());
                break;
            }
        }
    }
}

async fn cancel_one(state: &Shared, tasks: &mut HashMap<JobId, JoinHandle<()>>, id: JobId) {
    let was_running = state
        .borrow()
        .registry
        .get(id)
        .map(|j| j.status == engine_core::JobStatus::Running)
        .unwrap_or(false);
    let was_pending = state
        .borrow()
        .registry
        .get(id)
        .map(|j| j.status == engine_core::JobStatus::Pending)
        .unwrap_or(false);

    if !was_running && !was_pending {
        return;
    }

    if let Some(handle) = tasks.remove(&id) {
        handle.abort();
    }

    if was_running {
        let classes = state
            .borrow()
            .registry
            .get(id)
            .map(|j| j.resource_classes())
            .unwrap_or_default();
        let (backend, mut slot) = {
            let mut st = state.borrow_mut();
            match st.registry.get_mut(id) {
                Some(job) => (job.backend.clone(), job.backend_slot.take()),
                None => return,
            }
        };
        if let Some(slot) = slot.as_mut() {
            backend.cancel_running(slot).await;
            backend.clear_context(slot);
        }
        let mut st = state.borrow_mut();
        if let Some(job) = st.registry.get_mut(id) {
            job.status = engine_core::JobStatus::Cancelled;
            job.stopped_at = Some(chrono::Utc::now());
        }
        st.ledger.release_all(&classes, 1);
        st.emit(EngineEvent::JobCancelled { id });
    } else {
        lifecycle::cancel_pending(state, id);
    }
}

/// Resets a terminal job to `pending` in place and re-emits it, without
/// touching the registry entry's identity (its `JobId`/`FutureHandle`
/// stay the same, so downstream `Arg::Future` references remain valid).
fn rerun_one(state: &Shared, tasks: &mut HashMap<JobId, JoinHandle<()>>, id: JobId) -> EngineResult<()> {
    {
        let mut st = state.borrow_mut();
        let job = st.registry.require_mut(id)?;
        if !job.status.is_terminal() {
            return Err(EngineError::InvalidState(id));
        }
        job.status = engine_core::JobStatus::Pending;
        job.retry_remain = job.retries;
        job.submitted_at = Some(chrono::Utc::now());
        job.stopped_at = None;
        job.backend_slot = None;
        job.future.reset();
    }
    lifecycle::resolve_dependencies(state, id);
    let shared = state.clone();
    let handle = tokio::task::spawn_local(async move {
        lifecycle::run_job(shared, id).await;
    });
    tasks.insert(id, handle);
    state.borrow().emit(EngineEvent::JobSubmitted { id });
    Ok(())
}
