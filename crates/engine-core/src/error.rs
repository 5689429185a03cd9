use crate::id::JobId;

/// Error taxonomy for the engine's public surface.
///
/// The lifecycle task's own internal control-flow signal for a cancelled
/// upstream dependency is deliberately absent here: it never escapes the
/// lifecycle task. `InternalInvariantViolation` is the one variant raised
/// from inside that same resolution path, for the case that should be
/// unreachable in practice — it is allowed to escape because it forces
/// the job to `Failed` rather than being swallowed as an ordinary
/// dependency-chain outcome.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("job {0} is not in a valid state for this operation")]
    InvalidState(JobId),

    #[error("job {0} cannot be emitted: {1}")]
    EmitError(JobId, String),

    #[error("job {0} failed: {1}")]
    BackendFailure(JobId, #[source] anyhow::Error),

    #[error("internal invariant violated for job {0}: {1}")]
    InternalInvariantViolation(JobId, String),

    #[error("job {0} not found in registry")]
    NotFound(JobId),

    #[error("engine is shutting down")]
    EngineStopped,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while loading or validating an `EngineConfig`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error("invalid configuration value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
