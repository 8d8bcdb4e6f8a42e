pub mod batch;
mod client;
pub mod executor;
pub mod handler;
pub mod predict;

pub use executor::DedicatedExecutor;
use uuid::Uuid;

// Generic types for task-specific data
type TaskId = Uuid;
