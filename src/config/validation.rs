//! Start-time configuration checks.

use thiserror::Error;

use super::settings::BotConfig;
use crate::modules::proxy::{ProxyDescriptor, ProxyParseError};

/// Longest accepted retry, backoff or cooldown delay.
pub const MAX_DELAY_SECS: u64 = 24 * 60 * 60;
/// Longest accepted proxy rotation interval.
pub const MAX_ROTATION_MINS: u64 = 24 * 60;

/// Configuration rejected before the engine starts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing BLS credentials")]
    MissingCredentials,
    #[error("At least one appointment category must be selected")]
    NoCategories,
    #[error("Retry interval must be greater than zero")]
    InvalidRetryInterval,
    #[error("Proxy rotation is enabled but the proxy list is empty")]
    EmptyProxyList,
    #[error("Invalid proxy entry on line {line}: {source}")]
    InvalidProxy {
        line: usize,
        #[source]
        source: ProxyParseError,
    },
    #[error("Proxy rotation interval must be greater than zero")]
    InvalidRotationInterval,
    #[error("Captcha solving is enabled but no API key is set")]
    MissingCaptchaKey,
    #[error("Maximum consecutive failures must be at least 1")]
    InvalidFailureThreshold,
    #[error("{setting} must not exceed 24 hours")]
    IntervalTooLong { setting: &'static str },
}

impl BotConfig {
    /// Checks every start-time invariant, reporting the first violation.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.credentials.email.trim().is_empty() || self.credentials.password.is_empty() {
            return Err(ValidationError::MissingCredentials);
        }
        if self.appointment.categories.iter().all(|c| c.trim().is_empty()) {
            return Err(ValidationError::NoCategories);
        }
        if self.appointment.retry_interval_secs == 0 {
            return Err(ValidationError::InvalidRetryInterval);
        }
        let delays = [
            ("Retry interval", Some(self.appointment.retry_interval_secs)),
            ("Base retry delay", self.engine.base_delay_secs),
            ("Maximum retry delay", Some(self.engine.max_delay_secs)),
            ("Proxy cooldown", Some(self.engine.proxy_cooldown_secs)),
        ];
        for (setting, secs) in delays {
            if secs.is_some_and(|secs| secs > MAX_DELAY_SECS) {
                return Err(ValidationError::IntervalTooLong { setting });
            }
        }
        if self.proxy.enabled {
            if self.proxy.rotation_interval_mins == 0 {
                return Err(ValidationError::InvalidRotationInterval);
            }
            if self.proxy.rotation_interval_mins > MAX_ROTATION_MINS {
                return Err(ValidationError::IntervalTooLong {
                    setting: "Proxy rotation interval",
                });
            }
            self.proxy_descriptors()?;
        }
        if self.captcha.enabled && self.captcha.api_key.is_empty() {
            return Err(ValidationError::MissingCaptchaKey);
        }
        if self.engine.max_consecutive_failures == 0 {
            return Err(ValidationError::InvalidFailureThreshold);
        }
        Ok(())
    }

    /// Parses the proxy list. Empty when proxying is disabled.
    pub fn proxy_descriptors(&self) -> Result<Vec<ProxyDescriptor>, ValidationError> {
        if !self.proxy.enabled {
            return Ok(Vec::new());
        }
        let descriptors = self
            .proxy
            .entries()
            .map(|(line, entry)| {
                entry
                    .parse::<ProxyDescriptor>()
                    .map_err(|source| ValidationError::InvalidProxy { line, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if descriptors.is_empty() {
            return Err(ValidationError::EmptyProxyList);
        }
        Ok(descriptors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;

    fn valid() -> BotConfig {
        let mut config = BotConfig::default();
        config.credentials.email = "me@example.com".into();
        config.credentials.password = Secret::new("pw");
        config.proxy.proxies = vec!["1.2.3.4:8080".into()];
        config.captcha.api_key = Secret::new("key");
        config
    }

    #[test]
    fn accepts_complete_config() {
        assert_eq!(valid().validate(), Ok(()));
    }

    #[test]
    fn rejects_each_broken_invariant() {
        let mut config = valid();
        config.credentials.password = Secret::default();
        assert_eq!(config.validate(), Err(ValidationError::MissingCredentials));
        assert_eq!(
            ValidationError::MissingCredentials.to_string(),
            "Missing BLS credentials"
        );

        let mut config = valid();
        config.appointment.categories.clear();
        assert_eq!(config.validate(), Err(ValidationError::NoCategories));

        let mut config = valid();
        config.appointment.retry_interval_secs = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidRetryInterval));

        let mut config = valid();
        config.proxy.proxies = vec!["  ".into()];
        assert_eq!(config.validate(), Err(ValidationError::EmptyProxyList));

        let mut config = valid();
        config.proxy.proxies.push("bogus".into());
        assert_eq!(
            config.validate(),
            Err(ValidationError::InvalidProxy {
                line: 2,
                source: ProxyParseError::Format,
            })
        );

        let mut config = valid();
        config.captcha.api_key = Secret::default();
        assert_eq!(config.validate(), Err(ValidationError::MissingCaptchaKey));
    }

    #[test]
    fn rejects_intervals_past_a_day() {
        let mut config = valid();
        config.appointment.retry_interval_secs = u64::MAX;
        assert_eq!(
            config.validate(),
            Err(ValidationError::IntervalTooLong {
                setting: "Retry interval"
            })
        );
        assert_eq!(
            config.validate().unwrap_err().to_string(),
            "Retry interval must not exceed 24 hours"
        );

        let mut config = valid();
        config.proxy.rotation_interval_mins = MAX_ROTATION_MINS + 1;
        assert_eq!(
            config.validate(),
            Err(ValidationError::IntervalTooLong {
                setting: "Proxy rotation interval"
            })
        );

        let mut config = valid();
        config.engine.max_delay_secs = u64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::IntervalTooLong { .. })
        ));

        let mut config = valid();
        config.appointment.retry_interval_secs = MAX_DELAY_SECS;
        config.proxy.rotation_interval_mins = MAX_ROTATION_MINS;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn disabled_features_skip_their_checks() {
        let mut config = valid();
        config.proxy.enabled = false;
        config.proxy.proxies.clear();
        config.captcha.enabled = false;
        config.captcha.api_key = Secret::default();
        assert_eq!(config.validate(), Ok(()));
        assert!(config.proxy_descriptors().unwrap().is_empty());
    }
}
