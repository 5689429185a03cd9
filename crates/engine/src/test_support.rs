//! Minimal backend used by in-crate unit tests that need a `Backend` but
//! don't care what it does. The full exercised backends live in the
//! `engine-cli` crate's `tests/common` harness.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::backend::{Backend, BackendSlot, Callable};
use crate::ledger::ResourceClass;

#[derive(Default)]
pub struct NoopBackend;

#[async_trait]
impl Backend for NoopBackend {
    fn resource_classes(&self) -> &[ResourceClass] {
        &[]
    }

    fn start(
        &self,
        _func: &Callable,
        _args: Vec<Value>,
        _kwargs: serde_json::Map<String, Value>,
    ) -> (BackendSlot, BoxFuture<'static, anyhow::Result<Value>>) {
        (Box::new(()), Box::pin(async { Ok(Value::Null) }))
    }

    async fn cancel_running(&self, _slot: &mut BackendSlot) {}

    fn clear_context(&self, _slot: &mut BackendSlot) {}
}
