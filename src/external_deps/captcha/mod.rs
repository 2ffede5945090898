//! Captcha solver integrations.
//!
//! The engine only needs a token for the challenge the booking form shows;
//! how that token is obtained stays behind [`CaptchaSolver`]. The bundled
//! [`TwoCaptchaSolver`] talks to 2captcha-compatible HTTP APIs.

mod twocaptcha;

pub use twocaptcha::TwoCaptchaSolver;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// High-level configuration that controls captcha solving behaviour.
#[derive(Debug, Clone)]
pub struct CaptchaConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptchaKind {
    #[default]
    RecaptchaV2,
    Turnstile,
}

/// Challenge presented by the booking form.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptchaChallenge {
    pub kind: CaptchaKind,
    pub site_key: String,
    pub page_url: Url,
    pub action: Option<String>,
}

impl CaptchaChallenge {
    pub fn new(kind: CaptchaKind, site_key: impl Into<String>, page_url: Url) -> Self {
        Self {
            kind,
            site_key: site_key.into(),
            page_url,
            action: None,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

/// Solved challenge token.
#[derive(Clone, PartialEq, Eq)]
pub struct CaptchaToken {
    pub token: String,
}

impl CaptchaToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for CaptchaToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptchaToken")
            .field("token", &format_args!("<{} chars>", self.token.len()))
            .finish()
    }
}

/// Common result type returned by captcha solvers.
pub type CaptchaResult = Result<CaptchaToken, SolveError>;

/// Shared interface implemented by captcha vendors.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    fn name(&self) -> &'static str;
    async fn solve(&self, challenge: &CaptchaChallenge) -> CaptchaResult;
}

/// Errors surfaced by captcha solvers.
#[derive(Debug, Error)]
pub enum SolveError {
    #[error("captcha solver misconfigured: {0}")]
    Configuration(String),
    #[error("captcha solver request failed: {0}")]
    Provider(String),
    #[error("captcha solving timed out after {0:?}")]
    Timeout(Duration),
}
