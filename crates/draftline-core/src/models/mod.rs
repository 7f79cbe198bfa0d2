pub mod config;
pub mod error;
pub mod status;
pub mod task;

pub use config::{AiMode, HybridPreference, ModeConfig};
pub use error::{CoreError, CoreErrorKind};
pub use status::{AvailabilityState, BackendTarget, LatencyClass, ServiceStatus, SyncStatus};
pub use task::{DEFAULT_MAX_RETRIES, Task, TaskId, TaskKind, TaskStatus};
