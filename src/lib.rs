//! # visabot-rs
//!
//! An appointment polling engine: connects to a booking portal through a
//! rotating proxy pool, logs in, polls for open slots, and books the ones an
//! operator confirms.
//!
//! The portal itself, captcha solving, and notification delivery are
//! capabilities the caller injects. The crate owns the state machine around
//! them.
//!
//! ## Features
//!
//! - Explicit phase table from connect to booking, with retry and escalation
//! - Round-robin or random proxy rotation with cooldown-based health
//! - Fixed, linear, or capped exponential backoff with optional jitter
//! - Non-overlapping polling ticks that never queue a catch-up check
//! - Bounded activity log plus an event stream for UIs
//! - 2captcha adapter for challenges shown by the booking form
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use visabot_rs::{BotConfig, BotController, SiteClient};
//!
//! async fn run(site: Arc<dyn SiteClient>) -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BotConfig::from_json_file("bot.json")?;
//!     let bot = BotController::new(site);
//!     bot.start(config).await?;
//!     println!("status: {}", bot.status());
//!     Ok(())
//! }
//! ```

mod bot;

pub mod config;
pub mod engine;
pub mod external_deps;
pub mod modules;

pub use crate::bot::{
    BotController,
    BotControllerBuilder,
    BotError,
    BotResult,
    BotSnapshot,
    BotStatus,
};

pub use crate::config::{
    AppointmentCriteria,
    BotConfig,
    CaptchaSettings,
    ConfigError,
    Credentials,
    EngineSettings,
    NotificationConfig,
    ProxySettings,
    Secret,
    ValidationError,
};

pub use crate::engine::{
    AppointmentDetails,
    ConnectionStatus,
    EngineEvent,
    EnginePhase,
    FatalError,
    InvalidTransition,
};

pub use crate::external_deps::captcha::{
    CaptchaChallenge,
    CaptchaConfig,
    CaptchaKind,
    CaptchaResult,
    CaptchaSolver,
    CaptchaToken,
    SolveError,
    TwoCaptchaSolver,
};

pub use crate::external_deps::notify::{
    DeliveryError,
    Destination,
    LogNotificationSink,
    Notification,
    NotificationSink,
};

pub use crate::external_deps::site::{
    AuthError,
    BookingError,
    ConnectError,
    FormHandle,
    NavError,
    QueryError,
    SiteClient,
    SiteSession,
    SlotInfo,
};

pub use crate::modules::{
    ActivityLog,
    Backoff,
    BackoffStrategy,
    BotEvent,
    EventBus,
    EventHandler,
    LogEntry,
    LoggingHandler,
    ProxyDescriptor,
    ProxyHealth,
    ProxyHealthReport,
    ProxyParseError,
    ProxyPool,
    ProxyPoolConfig,
    ProxyScheme,
    RetryDecision,
    RetryEvent,
    RetryPolicy,
    RotationStrategy,
    Severity,
    TickScheduler,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
