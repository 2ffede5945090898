//! Bot configuration model.
//!
//! The JSON shape follows the dashboard's configuration object: camelCase
//! keys, with the dashboard's original field names accepted as aliases.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::modules::backoff::{BackoffStrategy, RetryPolicy};
use crate::modules::proxy::{ProxyPoolConfig, RotationStrategy, redact_entry};

/// String that never shows up in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Secret(<empty>)")
        } else {
            f.write_str("Secret(***)")
        }
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Credentials {
    pub email: String,
    pub password: Secret,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationConfig {
    pub email: String,
    #[serde(alias = "whatsapp")]
    pub phone: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppointmentCriteria {
    pub location: String,
    pub visa_type: String,
    pub visa_sub_type: String,
    pub categories: BTreeSet<String>,
    #[serde(rename = "retryIntervalSeconds", alias = "retryInterval")]
    pub retry_interval_secs: u64,
}

impl AppointmentCriteria {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn accepts_category(&self, category: &str) -> bool {
        self.categories.contains(category)
    }
}

impl Default for AppointmentCriteria {
    fn default() -> Self {
        Self {
            location: "Rabat".into(),
            visa_type: "Long Stay Visa".into(),
            visa_sub_type: "JOB SEARCH".into(),
            categories: ["Normal", "Premium", "Prime Time"]
                .into_iter()
                .map(String::from)
                .collect(),
            retry_interval_secs: 30,
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxySettings {
    #[serde(alias = "enable")]
    pub enabled: bool,
    #[serde(alias = "list")]
    pub proxies: Vec<String>,
    #[serde(rename = "rotationIntervalMinutes", alias = "rotationInterval")]
    pub rotation_interval_mins: u64,
}

impl ProxySettings {
    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_interval_mins.saturating_mul(60))
    }

    /// Non-blank proxy lines, trimmed, with their 1-based line number.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &str)> {
        self.proxies
            .iter()
            .enumerate()
            .map(|(idx, line)| (idx + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty())
    }
}

// Raw lines may embed proxy passwords.
impl fmt::Debug for ProxySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proxies: Vec<String> = self.entries().map(|(_, line)| redact_entry(line)).collect();
        f.debug_struct("ProxySettings")
            .field("enabled", &self.enabled)
            .field("proxies", &proxies)
            .field("rotation_interval_mins", &self.rotation_interval_mins)
            .finish()
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            proxies: Vec::new(),
            rotation_interval_mins: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptchaSettings {
    #[serde(alias = "enable")]
    pub enabled: bool,
    pub api_key: Secret,
}

impl Default for CaptchaSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: Secret::default(),
        }
    }
}

/// Retry, escalation and shutdown tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    pub backoff_strategy: BackoffStrategy,
    /// Defaults to the appointment retry interval when unset.
    pub base_delay_secs: Option<u64>,
    pub max_delay_secs: u64,
    pub jitter: f64,
    pub max_consecutive_failures: u32,
    pub proxy_cooldown_secs: u64,
    pub rotation_strategy: RotationStrategy,
    pub shutdown_grace_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            backoff_strategy: BackoffStrategy::Exponential,
            base_delay_secs: None,
            max_delay_secs: 300,
            jitter: 0.0,
            max_consecutive_failures: 5,
            proxy_cooldown_secs: 300,
            rotation_strategy: RotationStrategy::RoundRobin,
            shutdown_grace_ms: 2_000,
        }
    }
}

impl EngineSettings {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Full configuration submitted with `start`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    pub credentials: Credentials,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub appointment: AppointmentCriteria,
    #[serde(default)]
    pub proxy: ProxySettings,
    #[serde(default)]
    pub captcha: CaptchaSettings,
    #[serde(default)]
    pub engine: EngineSettings,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl BotConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let base = self
            .engine
            .base_delay_secs
            .unwrap_or(self.appointment.retry_interval_secs);
        RetryPolicy {
            strategy: self.engine.backoff_strategy,
            base_delay: Duration::from_secs(base),
            max_delay: Duration::from_secs(self.engine.max_delay_secs),
            jitter: self.engine.jitter.clamp(0.0, 1.0),
            max_consecutive_failures: self.engine.max_consecutive_failures,
        }
    }

    pub fn proxy_pool_config(&self) -> ProxyPoolConfig {
        ProxyPoolConfig {
            rotation_strategy: self.engine.rotation_strategy,
            cooldown: Duration::from_secs(self.engine.proxy_cooldown_secs),
        }
    }
}
