mod backends;
mod cli;
mod shutdown;

use std::sync::Arc;

use clap::Parser;
use engine::{Engine, EngineConfig, EngineEvent, JobBuilder};
use tokio::sync::mpsc;

use backends::{InlineBackend, ThreadBackend};
use cli::Cli;
use shutdown::{spawn_ctrl_c_handler, ShutdownController, ShutdownEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = EngineConfig {
        max_jobs: cli.max_jobs,
        max_threads: cli.max_threads,
        max_processes: None,
        max_dask_jobs: None,
        cache_path: cli.cache_path.clone(),
    };

    let mut engine = Engine::start(config);
    tracing::info!(engine_id = %engine.id(), "engine started");

    let inline_backend = Arc::new(InlineBackend);
    let thread_backend = Arc::new(ThreadBackend);

    let mut job_ids = Vec::new();
    for i in 0..cli.job_count {
        let backend: Arc<dyn engine::Backend> = if i % 2 == 0 {
            inline_backend.clone()
        } else {
            thread_backend.clone()
        };
        let fail_every = cli.fail_every;
        let job = JobBuilder::new(
            engine::Callable::Inline(Arc::new(move |args| {
                if fail_every != 0 && i % fail_every == 0 {
                    anyhow::bail!("demo job {i} was configured to fail");
                }
                Ok(args.first().cloned().unwrap_or(serde_json::json!(i)))
            })),
            backend,
        )
        .name(format!("demo-job-{i}"))
        .args(vec![serde_json::json!(i).into()])
        .retries(2, std::time::Duration::from_millis(100))
        .build();
        job_ids.push(job.id);
        engine.submit(job);
    }

    let controller = Arc::new(ShutdownController::default());
    let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_ctrl_c_handler(controller, shutdown_tx);

    let mut events = engine.subscribe();
    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(EngineEvent::JobDone { id }) => tracing::info!(%id, "job done"),
                    Ok(EngineEvent::JobFailed { id }) => tracing::warn!(%id, "job failed"),
                    Ok(EngineEvent::JobCancelled { id }) => tracing::warn!(%id, "job cancelled"),
                    Ok(EngineEvent::Stopped) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
            shutdown = shutdown_rx.recv() => {
                match shutdown {
                    Some(ShutdownEvent::Graceful) => {
                        tracing::info!("shutdown requested, cancelling outstanding jobs");
                        engine.cancel_all_async().await;
                    }
                    Some(ShutdownEvent::Immediate) | None => break,
                }
            }
        }

        let snapshot = engine.snapshot();
        if snapshot.pending == 0 && snapshot.running == 0 {
            break;
        }
    }

    for id in job_ids {
        if let Some(status) = engine.job_status_async(id).await {
            println!("{id}: {status}");
        }
    }

    engine.stop_async().await;
    Ok(())
}
