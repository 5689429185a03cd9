use std::path::PathBuf;

use clap::Parser;

fn parse_optional_u64(s: &str) -> Result<Option<u64>, std::num::ParseIntError> {
    if s.eq_ignore_ascii_case("unbounded") {
        Ok(None)
    } else {
        s.parse().map(Some)
    }
}

/// Demo harness for the job execution engine: submits a small fixed batch
/// of example jobs and prints their lifecycle events until they settle.
#[derive(Parser, Debug)]
#[command(name = "engine-cli", version, about)]
pub struct Cli {
    /// Capacity of the universal jobs_total class, or "unbounded".
    #[arg(long, env = "EXECUTOR_MAX_JOBS", default_value = "20", value_parser = parse_optional_u64)]
    pub max_jobs: Option<u64>,

    /// Capacity of the thread backend class, or "unbounded".
    #[arg(long, env = "EXECUTOR_MAX_THREADS", default_value = "unbounded", value_parser = parse_optional_u64)]
    pub max_threads: Option<u64>,

    /// Root directory for per-engine and per-job scratch space.
    #[arg(long, env = "EXECUTOR_CACHE_PATH")]
    pub cache_path: Option<PathBuf>,

    /// Number of demo jobs to submit.
    #[arg(long, default_value_t = 4)]
    pub job_count: u32,

    /// Simulated failure rate for demo jobs, used to exercise retries.
    #[arg(long, default_value_t = 0)]
    pub fail_every: u32,
}
