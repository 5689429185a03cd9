//! Reference implementations of the engine's `Backend` capability contract.
//!
//! These are worked examples, not part of the scheduler core: an
//! application embedding `engine` is expected to supply its own, the way
//! this one supplies `InlineBackend` and `ThreadBackend`.

use async_trait::async_trait;
use engine::{Backend, BackendSlot, Callable, ResourceClass};
use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend received a named callable `{reference}` with no local handler registered")]
    UnknownNamedCallable { reference: String },
}

/// Runs a job's callable directly on the scheduler thread. Consumes only
/// the universal `jobs_total` class: there is no additional concurrency
/// limit to enforce since nothing but the scheduler itself runs the work.
#[derive(Default)]
pub struct InlineBackend;

#[async_trait]
impl Backend for InlineBackend {
    fn resource_classes(&self) -> &[ResourceClass] {
        &[]
    }

    fn start(
        &self,
        func: &Callable,
        args: Vec<Value>,
        _kwargs: serde_json::Map<String, Value>,
    ) -> (BackendSlot, BoxFuture<'static, anyhow::Result<Value>>) {
        let fut: BoxFuture<'static, anyhow::Result<Value>> = match func {
            Callable::Inline(f) => {
                let f = f.clone();
                Box::pin(async move { f(&args) })
            }
            Callable::Named { reference, .. } => {
                let reference = reference.clone();
                Box::pin(async move { Err(BackendError::UnknownNamedCallable { reference }.into()) })
            }
        };
        (Box::new(()), fut)
    }

    async fn cancel_running(&self, _slot: &mut BackendSlot) {}

    fn clear_context(&self, _slot: &mut BackendSlot) {}
}

/// Runs a job's callable on Tokio's blocking thread pool, so it cannot
/// stall the scheduler loop and genuinely overlaps with other running
/// jobs. Consumes the `threads` class in addition to `jobs_total`.
#[derive(Default)]
pub struct ThreadBackend;

#[async_trait]
impl Backend for ThreadBackend {
    fn resource_classes(&self) -> &[ResourceClass] {
        &[ResourceClass::Threads]
    }

    fn start(
        &self,
        func: &Callable,
        args: Vec<Value>,
        _kwargs: serde_json::Map<String, Value>,
    ) -> (BackendSlot, BoxFuture<'static, anyhow::Result<Value>>) {
        match func {
            Callable::Inline(f) => {
                let f = f.clone();
                let handle = tokio::task::spawn_blocking(move || f(&args));
                let abort = handle.abort_handle();
                let fut: BoxFuture<'static, anyhow::Result<Value>> =
                    Box::pin(async move { handle.await? });
                (Box::new(abort), fut)
            }
            Callable::Named { reference, .. } => {
                let reference = reference.clone();
                let fut: BoxFuture<'static, anyhow::Result<Value>> =
                    Box::pin(async move { Err(BackendError::UnknownNamedCallable { reference }.into()) });
                (Box::new(()), fut)
            }
        }
    }

    async fn cancel_running(&self, slot: &mut BackendSlot) {
        // Aborting a spawn_blocking task stops us from awaiting it further;
        // the OS thread underneath keeps running the closure to completion
        // since blocking work cannot be preempted.
        if let Some(abort) = slot.downcast_mut::<tokio::task::AbortHandle>() {
            abort.abort();
        }
    }

    fn clear_context(&self, _slot: &mut BackendSlot) {}
}
