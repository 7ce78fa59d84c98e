// Build lifecycle: the record model, executor and worker pool.

pub mod executor;
pub mod pool;
mod types;

pub use executor::{BuildContext, ExecutionError, execute};
pub use pool::{DispatchError, WorkerPool};
pub use types::{BuildRecord, BuildState, Command};
