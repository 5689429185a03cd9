//! Shared identifiers, status enum, and error taxonomy for the job engine.
//!
//! Kept as its own crate so that backend implementations (in `engine-cli` or
//! elsewhere) can depend on the vocabulary types without pulling in the full
//! scheduler.

mod error;
mod id;
mod status;

pub use error::{ConfigError, EngineError, EngineResult};
pub use id::JobId;
pub use status::JobStatus;
