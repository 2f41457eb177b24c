//! Sliding-window rate limiting for calls to the cloud API.

mod config;
mod limiter;
mod store;

pub use config::{ClassLimit, RateLimitBackend, RateLimitConfig};
pub use limiter::{Decision, LimitClass, RateLimiter};
pub use store::{Acquire, MemoryWindowStore, RateLimitError, SqliteWindowStore, WindowStore};

use std::path::Path;
use std::sync::Arc;

/// Build the window store selected by the configuration.
pub fn create_window_store(
    config: &RateLimitConfig,
    db_path: &Path,
) -> Result<Arc<dyn WindowStore>, RateLimitError> {
    Ok(match config.backend {
        RateLimitBackend::Sqlite => Arc::new(SqliteWindowStore::new(db_path)?),
        RateLimitBackend::Memory => Arc::new(MemoryWindowStore::new()),
    })
}
