//! Cross-cutting services module
//!
//! Building blocks the engine is assembled from: proxy rotation, retry
//! backoff, tick scheduling, the activity log, and event fan-out.

pub mod activity_log;
pub mod backoff;
pub mod events;
pub mod proxy;
pub mod scheduler;

// Re-export commonly used types
pub use activity_log::{ActivityLog, DEFAULT_LOG_CAPACITY, LogEntry, Severity};
pub use backoff::{Backoff, BackoffStrategy, RetryDecision, RetryPolicy};
pub use events::{BotEvent, EventBus, EventHandler, LoggingHandler, RetryEvent};
pub use proxy::{
    ProxyDescriptor, ProxyHealth, ProxyHealthReport, ProxyParseError, ProxyPool, ProxyPoolConfig,
    ProxyScheme, ProxyStats, RotationStrategy,
};
pub use scheduler::{TickScheduler, deadline_after};
