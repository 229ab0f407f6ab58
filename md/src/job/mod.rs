//! Job control
//!
//! [`JobManager`] owns the registry of running pipelines and their
//! cancellation tokens; durable job state lives behind the state actor.

mod cancel;
mod manager;

pub use cancel::CancelToken;
pub use manager::{JobManager, JobManagerConfig};
