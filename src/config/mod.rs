//! Settings and configuration module
//!
//! Provides the bot configuration with:
//! - JSON loading in the dashboard's shape
//! - Defaults for every tuning knob
//! - Start-time validation

pub mod settings;
pub mod validation;

pub use settings::{
    AppointmentCriteria, BotConfig, CaptchaSettings, ConfigError, Credentials, EngineSettings,
    NotificationConfig, ProxySettings, Secret,
};
pub use validation::ValidationError;
