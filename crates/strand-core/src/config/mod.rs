pub mod backoff;
pub mod daemon;
pub mod sqlite;

pub use backoff::BackoffStrategy;
pub use daemon::DaemonConfig;
pub use sqlite::{SqliteConfig, SynchronousMode};
