mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{AlwaysFailBackend, HangingBackend, TestBackend};
use engine::{Callable, Engine, EngineConfig, JobBuilder, JobStatus};
use serde_json::json;

fn inline(f: impl Fn(&[serde_json::Value]) -> anyhow::Result<serde_json::Value> + Send + Sync + 'static) -> Callable {
    Callable::Inline(Arc::new(f))
}

#[test]
fn value_return() {
    let engine = Engine::start(EngineConfig::default());
    let backend = Arc::new(TestBackend);
    let job = JobBuilder::new(
        inline(|args| Ok(json!(args[0].as_i64().unwrap() * args[0].as_i64().unwrap()))),
        backend,
    )
    .args(vec![json!(2).into()])
    .build();
    let id = job.id;
    let future = engine.submit(job);
    let status = engine.wait_job(id, Some(Duration::from_secs(2))).unwrap();
    assert_eq!(status, JobStatus::Done);
    assert_eq!(future.result().unwrap(), json!(4));
}

#[test]
fn parallel_speedup() {
    let mut config = EngineConfig::default();
    config.max_threads = None;
    let engine = Engine::start(config);
    let backend = Arc::new(TestBackend);

    let start = Instant::now();
    let mut ids = Vec::new();
    for _ in 0..2 {
        let job = JobBuilder::new(
            inline(|_| {
                std::thread::sleep(Duration::from_millis(300));
                Ok(json!(null))
            }),
            backend.clone(),
        )
        .build();
        ids.push(job.id);
        engine.submit(job);
    }
    for id in ids {
        engine.wait_job(id, Some(Duration::from_secs(2))).unwrap();
    }
    assert!(start.elapsed() < Duration::from_millis(800));
}

#[test]
fn error_callback_fires_once_on_failure() {
    let engine = Engine::start(EngineConfig::default());
    let backend = Arc::new(AlwaysFailBackend);
    let count = Arc::new(AtomicUsize::new(0));
    let count2 = count.clone();
    let job = JobBuilder::new(inline(|_| Ok(json!(null))), backend)
        .on_error(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        })
        .build();
    let id = job.id;
    engine.submit(job);
    let status = engine.wait_job(id, Some(Duration::from_secs(2))).unwrap();
    assert_eq!(status, JobStatus::Failed);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn retry_exhausts_then_fails() {
    let engine = Engine::start(EngineConfig::default());
    let backend = Arc::new(AlwaysFailBackend);
    let job = JobBuilder::new(inline(|_| Ok(json!(null))), backend)
        .retries(2, Duration::from_millis(10))
        .build();
    let id = job.id;
    engine.submit(job);
    let status = engine.wait_job(id, Some(Duration::from_secs(2))).unwrap();
    assert_eq!(status, JobStatus::Failed);
}

#[test]
fn dependency_propagates_result() {
    let engine = Engine::start(EngineConfig::default());
    let backend = Arc::new(TestBackend);
    let upstream = JobBuilder::new(inline(|_| Ok(json!(10))), backend.clone()).build();
    let upstream_future = engine.submit(upstream);

    let downstream = JobBuilder::new(inline(|args| Ok(args[0].clone())), backend)
        .args(vec![upstream_future.into()])
        .build();
    let downstream_id = downstream.id;
    let downstream_future = engine.submit(downstream);

    let status = engine
        .wait_job(downstream_id, Some(Duration::from_secs(2)))
        .unwrap();
    assert_eq!(status, JobStatus::Done);
    assert_eq!(downstream_future.result().unwrap(), json!(10));
}

#[test]
fn failed_upstream_cancels_downstream() {
    let engine = Engine::start(EngineConfig::default());
    let backend = Arc::new(AlwaysFailBackend);
    let upstream = JobBuilder::new(inline(|_| Ok(json!(null))), backend).build();
    let upstream_future = engine.submit(upstream);

    let inline_backend = Arc::new(TestBackend);
    let downstream = JobBuilder::new(inline(|args| Ok(args[0].clone())), inline_backend)
        .args(vec![upstream_future.into()])
        .build();
    let downstream_id = downstream.id;
    engine.submit(downstream);

    let status = engine
        .wait_job(downstream_id, Some(Duration::from_secs(2)))
        .unwrap();
    assert_eq!(status, JobStatus::Cancelled);
}

#[test]
fn cancel_pending_and_running_release_ledger() {
    let mut config = EngineConfig::default();
    config.max_jobs = Some(1);
    let engine = Engine::start(config);
    let backend = Arc::new(HangingBackend);

    let running = JobBuilder::new(inline(|_| Ok(json!(null))), backend.clone()).build();
    let running_id = running.id;
    engine.submit(running);

    // Give the first job a moment to actually start and consume the slot.
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(engine.job_status(running_id), Some(JobStatus::Running));

    let pending = JobBuilder::new(inline(|_| Ok(json!(null))), backend).build();
    let pending_id = pending.id;
    engine.submit(pending);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(engine.job_status(pending_id), Some(JobStatus::Pending));

    engine.cancel(pending_id);
    engine.cancel(running_id);

    assert_eq!(
        engine.wait_job(pending_id, Some(Duration::from_secs(2))).unwrap(),
        JobStatus::Cancelled
    );
    assert_eq!(
        engine.wait_job(running_id, Some(Duration::from_secs(2))).unwrap(),
        JobStatus::Cancelled
    );

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.jobs_remaining, Some(1));
}

