use std::path::PathBuf;
use std::time::{Duration, Instant};

use engine_core::{EngineError, EngineResult, JobId, JobStatus};
use tokio::sync::{broadcast, oneshot, watch};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::{spawn_scheduler_thread, Command, EngineEvent, EngineSnapshot, SchedulerThread};
use crate::future::FutureHandle;
use crate::job::Job;

/// Owns the scheduler thread and exposes the engine's control surface.
///
/// Every mutating operation exists in a synchronous form that blocks the
/// calling thread (safe to call from plain, non-async code) and a
/// cooperative `_async`-suffixed form that yields instead of blocking
/// (safe to call from inside a host application's own async runtime, e.g.
/// the `engine-cli` binary). Both forms round-trip through the same
/// command channel onto the scheduler thread; neither touches registry or
/// ledger state directly.
///
/// Construct via [`Engine::start`]; call [`Engine::stop`] (or drop an
/// [`EngineGuard`]) to release it.
pub struct Engine {
    id: String,
    cache_root: PathBuf,
    cmd_tx: tokio::sync::mpsc::UnboundedSender<Command>,
    event_tx: broadcast::Sender<EngineEvent>,
    snapshot_rx: watch::Receiver<EngineSnapshot>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Engine {
    /// Start the scheduler thread with the given configuration.
    pub fn start(config: EngineConfig) -> Self {
        let id = Uuid::new_v4().to_string();
        let cache_root = config
            .cache_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(".executor").join(&id));
        let SchedulerThread {
            cmd_tx,
            event_rx_factory,
            snapshot_rx,
            join,
        } = spawn_scheduler_thread(config, id.clone());
        Self {
            id,
            cache_root,
            cmd_tx,
            event_tx: event_rx_factory,
            snapshot_rx,
            thread: Some(join),
        }
    }

    /// Scoped acquisition: the returned guard calls [`Engine::stop`] on
    /// every exit path, including panics, mirroring the source system's
    /// context-manager usage of its engine.
    pub fn scoped(config: EngineConfig) -> EngineGuard {
        EngineGuard(Some(Self::start(config)))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Root of this engine's scratch directory tree, `<cache_path>/<id>`.
    pub fn cache_dir(&self) -> &std::path::Path {
        &self.cache_root
    }

    /// Scratch directory for a single job. Computed only; not created here.
    pub fn job_cache_dir(&self, job_id: JobId) -> PathBuf {
        self.cache_root.join(job_id.to_string())
    }

    /// Subscribe to the engine's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Latest published snapshot of engine state.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Register and emit `job`, returning its future handle immediately
    /// without blocking the caller. Non-blocking in both the sync and
    /// async worlds: it is a single channel send.
    pub fn submit(&self, job: Job) -> FutureHandle {
        let future = job.future.clone();
        let _ = self.cmd_tx.send(Command::Submit(job));
        future
    }

    /// Cooperative cancel: idempotent on terminal jobs. Blocks the calling
    /// thread until the scheduler has released the job's resources.
    pub fn cancel(&self, job_id: JobId) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Cancel(job_id, tx)).is_ok() {
            let _ = rx.blocking_recv();
        }
    }

    /// Async equivalent of [`Engine::cancel`].
    pub async fn cancel_async(&self, job_id: JobId) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Cancel(job_id, tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Cancel every non-terminal job; returns once all have reached a
    /// terminal state.
    pub fn cancel_all(&self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::CancelAll(tx)).is_ok() {
            let _ = rx.blocking_recv();
        }
    }

    /// Async equivalent of [`Engine::cancel_all`].
    pub async fn cancel_all_async(&self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::CancelAll(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Cancel and unregister a job.
    pub fn remove(&self, job_id: JobId) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Remove(job_id, tx)).is_ok() {
            let _ = rx.blocking_recv();
        }
    }

    /// Async equivalent of [`Engine::remove`].
    pub async fn remove_async(&self, job_id: JobId) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Remove(job_id, tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Current status of a job, if it is still registered.
    pub fn job_status(&self, job_id: JobId) -> Option<JobStatus> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(Command::Status(job_id, tx)).ok()?;
        rx.blocking_recv().ok().flatten()
    }

    /// Async equivalent of [`Engine::job_status`].
    pub async fn job_status_async(&self, job_id: JobId) -> Option<JobStatus> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(Command::Status(job_id, tx)).ok()?;
        rx.await.ok().flatten()
    }

    /// Block until `job_id` reaches a terminal state or `timeout` elapses.
    /// This is an observation timeout: it never cancels the job itself.
    pub fn wait_job(&self, job_id: JobId, timeout: Option<Duration>) -> EngineResult<JobStatus> {
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            match self.job_status(job_id) {
                Some(status) if status.is_terminal() => return Ok(status),
                Some(_) => {}
                None => return Err(EngineError::NotFound(job_id)),
            }
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Err(EngineError::InvalidState(job_id));
                }
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    /// Async equivalent of [`Engine::wait_job`].
    pub async fn wait_job_async(
        &self,
        job_id: JobId,
        timeout: Option<Duration>,
    ) -> EngineResult<JobStatus> {
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            match self.job_status_async(job_id).await {
                Some(status) if status.is_terminal() => return Ok(status),
                Some(_) => {}
                None => return Err(EngineError::NotFound(job_id)),
            }
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Err(EngineError::InvalidState(job_id));
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Block until no job is `Running` or `Pending`, or `timeout` elapses.
    pub fn wait(&self, timeout: Option<Duration>, poll: Duration) {
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            let snapshot = self.snapshot();
            if snapshot.pending == 0 && snapshot.running == 0 {
                return;
            }
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return;
                }
            }
            std::thread::sleep(poll);
        }
    }

    /// Async equivalent of [`Engine::wait`], the cooperative counterpart of
    /// awaiting every currently-live lifecycle task.
    pub async fn wait_async(&self, timeout: Option<Duration>, poll: Duration) {
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            let snapshot = self.snapshot();
            if snapshot.pending == 0 && snapshot.running == 0 {
                return;
            }
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return;
                }
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Cooperative equivalent of [`Engine::wait`]: instead of polling the
    /// published snapshot counts, blocks until every currently-live
    /// lifecycle task has actually finished running (or `timeout` elapses).
    pub fn join(&self, timeout: Option<Duration>) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Join(timeout, tx)).is_ok() {
            let _ = rx.blocking_recv();
        }
    }

    /// Async equivalent of [`Engine::join`].
    pub async fn join_async(&self, timeout: Option<Duration>) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Join(timeout, tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Resubmit a terminal job in place: resets its status to `pending` and
    /// re-emits it, reusing its existing `JobId` and `FutureHandle` so any
    /// downstream job whose argument already references this job's future
    /// keeps pointing at the right place. Fails with `InvalidState` if the
    /// job is not currently terminal, or `NotFound` if it no longer exists.
    pub fn rerun(&self, job_id: JobId) -> EngineResult<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Rerun(job_id, tx))
            .map_err(|_| EngineError::EngineStopped)?;
        rx.blocking_recv().map_err(|_| EngineError::EngineStopped)?
    }

    /// Async equivalent of [`Engine::rerun`].
    pub async fn rerun_async(&self, job_id: JobId) -> EngineResult<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Rerun(job_id, tx))
            .map_err(|_| EngineError::EngineStopped)?;
        rx.await.map_err(|_| EngineError::EngineStopped)?
    }

    /// Stop the scheduler thread: cancels every live job, then joins the
    /// thread. Idempotent. Must not be called from inside an async runtime
    /// (it blocks); use [`Engine::stop_async`] there instead.
    pub fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let (tx, rx) = oneshot::channel();
            let _ = self.cmd_tx.send(Command::Stop(tx));
            let _ = rx.blocking_recv();
            let _ = thread.join();
        }
    }

    /// Async equivalent of [`Engine::stop`]: awaits acknowledgement instead
    /// of blocking, but still joins the OS thread via `spawn_blocking` so
    /// the calling async task is not left holding a detached scheduler.
    pub async fn stop_async(&mut self) {
        if let Some(thread) = self.thread.take() {
            let (tx, rx) = oneshot::channel();
            let _ = self.cmd_tx.send(Command::Stop(tx));
            let _ = rx.await;
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Best-effort, non-blocking shutdown signal. Callers that need a
        // guaranteed, awaited shutdown should call `stop`/`stop_async`
        // explicitly before the engine goes out of scope; blocking here
        // would panic if we happen to be dropped inside an async runtime.
        if let Some(thread) = self.thread.take() {
            let (tx, _rx) = oneshot::channel();
            let _ = self.cmd_tx.send(Command::Stop(tx));
            drop(thread);
        }
    }
}

/// RAII scope for [`Engine`]: guarantees `stop` on every exit path,
/// including panics, the Rust analogue of the source system's `with
/// Engine(...)` context-manager usage.
pub struct EngineGuard(Option<Engine>);

impl std::ops::Deref for EngineGuard {
    type Target = Engine;
    fn deref(&self) -> &Engine {
        self.0.as_ref().expect("engine guard used after drop")
    }
}

impl Drop for EngineGuard {
    fn drop(&mut self) {
        if let Some(mut engine) = self.0.take() {
            engine.stop();
        }
    }
}
