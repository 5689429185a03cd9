use async_trait::async_trait;
use engine::{Backend, BackendSlot, Callable, ResourceClass};
use futures::future::BoxFuture;
use serde_json::Value;

/// Minimal reference backend for the engine crate's own integration tests:
/// runs `Callable::Inline` closures via `spawn_blocking` so that
/// concurrently-running jobs actually overlap in wall time. Analogous to
/// the `InlineBackend`/`ThreadBackend` worked examples shipped by
/// `engine-cli`, kept separate so the core crate's tests don't depend on
/// the demo crate.
#[derive(Default)]
pub struct TestBackend;

#[async_trait]
impl Backend for TestBackend {
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
                let fut: BoxFuture<'static, anyhow::Result<Value>> = Box::pin(async move {
                    anyhow::bail!("TestBackend cannot run named callable `{reference}`")
                });
                (Box::new(()), fut)
            }
        }
    }

    async fn cancel_running(&self, slot: &mut BackendSlot) {
        if let Some(abort) = slot.downcast_mut::<tokio::task::AbortHandle>() {
            abort.abort();
        }
    }

    fn clear_context(&self, _slot: &mut BackendSlot) {}
}

/// A backend whose jobs never finish on their own, for cancellation tests.
#[derive(Default)]
pub struct HangingBackend;

#[async_trait]
impl Backend for HangingBackend {
    fn resource_classes(&self) -> &[ResourceClass] {
        &[]
    }

    fn start(
        &self,
        _func: &Callable,
        _args: Vec<Value>,
        _kwargs: serde_json::Map<String, Value>,
    ) -> (BackendSlot, BoxFuture<'static, anyhow::Result<Value>>) {
        let fut: BoxFuture<'static, anyhow::Result<Value>> = Box::pin(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            }
        });
        (Box::new(()), fut)
    }

    async fn cancel_running(&self, _slot: &mut BackendSlot) {}

    fn clear_context(&self, _slot: &mut BackendSlot) {}
}

/// A backend that always fails, for retry tests.
pub struct AlwaysFailBackend;

#[async_trait]
impl Backend for AlwaysFailBackend {
    fn resource_classes(&self) -> &[ResourceClass] {
        &[]
    }

    fn start(
        &self,
        _func: &Callable,
        _args: Vec<Value>,
        _kwargs: serde_json::Map<String, Value>,
    ) -> (BackendSlot, BoxFuture<'static, anyhow::Result<Value>>) {
        (
            Box::new(()),
            Box::pin(async move { anyhow::bail!("synthetic failure") }),
        )
    }

    async fn cancel_running(&self, _slot: &mut BackendSlot) {}

    fn clear_context(&self, _slot: &mut BackendSlot) {}
}
