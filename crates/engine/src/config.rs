use std::path::PathBuf;

use engine_core::{ConfigError, EngineResult};
use serde::{Deserialize, Serialize};

use crate::ledger::Capacity;

fn default_max_jobs() -> Option<u64> {
    Some(20)
}

/// Engine-wide resource and storage configuration. Can be built directly as
/// a struct (the common path) or layered on top of a TOML file plus
/// environment overrides via [`EngineConfig::loader`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of the universal `jobs_total` class. `None` is unbounded.
    pub max_jobs: Option<u64>,
    /// Capacity of the thread backend class.
    pub max_threads: Option<u64>,
    /// Capacity of the subprocess backend class.
    pub max_processes: Option<u64>,
    /// Capacity of the cluster backend class.
    pub max_dask_jobs: Option<u64>,
    /// Root directory for per-engine and per-job scratch space. Defaults to
    /// `.executor/<engine-id>` when unset, computed at engine construction
    /// time since the engine id is not known until then.
    pub cache_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_jobs: default_max_jobs(),
            max_threads: None,
            max_processes: None,
            max_dask_jobs: None,
            cache_path: None,
        }
    }
}

impl EngineConfig {
    pub fn jobs_capacity(&self) -> Capacity {
        Capacity(self.max_jobs)
    }

    pub fn threads_capacity(&self) -> Capacity {
        Capacity(self.max_threads)
    }

    pub fn processes_capacity(&self) -> Capacity {
        Capacity(self.max_processes)
    }

    pub fn cluster_capacity(&self) -> Capacity {
        Capacity(self.max_dask_jobs)
    }

    /// Load configuration layering, in order: built-in defaults, an
    /// optional TOML file at `path`, then `EXECUTOR_`-prefixed environment
    /// variables. Following this lineage's config-layering convention for
    /// crates that keep settings in a file.
    pub fn from_file_and_env(path: Option<&str>) -> EngineResult<Self> {
        let mut builder = config::Config::builder().add_source(
            config::Config::try_from(&EngineConfig::default())
                .map_err(|e| ConfigError::Load(e.to_string()))?,
        );
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("EXECUTOR"));
        let built = builder
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        built
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_max_jobs_is_twenty() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_jobs, Some(20));
        assert_eq!(cfg.max_threads, None);
    }
}
