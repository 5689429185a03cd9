use std::any::Any;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::ledger::ResourceClass;

/// Interpretation of a job's callable. `Inline` is meaningful to an
/// in-process backend; `Named` carries a reference plus a JSON payload for
/// out-of-process or cluster backends.
#[derive(Clone)]
pub enum Callable {
    Inline(std::sync::Arc<dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync>),
    Named { reference: String, payload: Value },
}

impl std::fmt::Debug for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Callable::Inline(_) => write!(f, "Callable::Inline(..)"),
            Callable::Named { reference, .. } => {
                write!(f, "Callable::Named({reference})")
            }
        }
    }
}

/// Opaque handle to a job's in-flight execution on its backend, used only
/// for cancellation. Populated while the job is `Running`.
pub type BackendSlot = Box<dyn Any + Send>;

/// Capability contract an execution backend must satisfy. Object-safe via
/// `async-trait` so the engine can hold backends behind `Arc<dyn Backend>`
/// and select among them at submission time.
///
/// `engine-cli` supplies `InlineBackend` and `ThreadBackend` as worked
/// reference implementations; subprocess and cluster backends are
/// documented by this contract only.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Ledger classes this backend consumes in addition to the universal
    /// `JobsTotal` class.
    fn resource_classes(&self) -> &[ResourceClass];

    /// Begin running `func` with the already-resolved `args`/`kwargs`.
    /// Returns a `BackendSlot` populated synchronously, before execution is
    /// ever polled, so `cancel_running`/`clear_context` can always reach
    /// whatever state this call sets up — together with the future that
    /// resolves to the job's result or an error to be recorded against its
    /// future.
    fn start(
        &self,
        func: &Callable,
        args: Vec<Value>,
        kwargs: serde_json::Map<String, Value>,
    ) -> (BackendSlot, BoxFuture<'static, anyhow::Result<Value>>);

    /// Cancel an in-flight execution identified by `slot`. A no-op is
    /// acceptable for backends that cannot preempt.
    async fn cancel_running(&self, slot: &mut BackendSlot);

    /// Release any backend-held state after completion or cancellation.
    fn clear_context(&self, slot: &mut BackendSlot);
}
