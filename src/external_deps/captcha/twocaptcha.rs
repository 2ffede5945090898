use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::{Instant, sleep};
use url::Url;

use super::{CaptchaChallenge, CaptchaConfig, CaptchaKind, CaptchaResult, CaptchaSolver, CaptchaToken, SolveError};
use crate::modules::scheduler::deadline_after;

const DEFAULT_ENDPOINT: &str = "https://2captcha.com/";
const NOT_READY: &str = "CAPCHA_NOT_READY";

#[derive(Debug, Deserialize)]
struct ApiReply {
    status: u8,
    request: String,
}

/// Adapter for the 2captcha `in.php` / `res.php` API.
#[derive(Debug, Clone)]
pub struct TwoCaptchaSolver {
    api_key: String,
    config: CaptchaConfig,
    endpoint: Url,
    client: reqwest::Client,
}

impl TwoCaptchaSolver {
    pub fn new(api_key: impl Into<String>) -> Result<Self, SolveError> {
        Self::with_config(api_key, CaptchaConfig::default())
    }

    pub fn with_config(api_key: impl Into<String>, config: CaptchaConfig) -> Result<Self, SolveError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(SolveError::Configuration("missing api key".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| SolveError::Configuration(err.to_string()))?;
        let endpoint =
            Url::parse(DEFAULT_ENDPOINT).map_err(|err| SolveError::Configuration(err.to_string()))?;

        Ok(Self {
            api_key,
            config,
            endpoint,
            client,
        })
    }

    /// Point the adapter at a 2captcha-compatible service.
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = endpoint;
        self
    }

    fn submit_form(&self, challenge: &CaptchaChallenge) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("key", self.api_key.clone()),
            ("pageurl", challenge.page_url.to_string()),
            ("json", "1".to_string()),
        ];
        match challenge.kind {
            CaptchaKind::RecaptchaV2 => {
                form.push(("method", "userrecaptcha".to_string()));
                form.push(("googlekey", challenge.site_key.clone()));
            }
            CaptchaKind::Turnstile => {
                form.push(("method", "turnstile".to_string()));
                form.push(("sitekey", challenge.site_key.clone()));
            }
        }
        if let Some(action) = &challenge.action {
            form.push(("action", action.clone()));
        }
        form
    }

    fn url(&self, path: &str) -> Result<Url, SolveError> {
        self.endpoint
            .join(path)
            .map_err(|err| SolveError::Configuration(err.to_string()))
    }

    async fn submit(&self, challenge: &CaptchaChallenge) -> Result<String, SolveError> {
        let reply: ApiReply = self
            .client
            .post(self.url("in.php")?)
            .form(&self.submit_form(challenge))
            .send()
            .await
            .map_err(|err| SolveError::Provider(err.to_string()))?
            .json()
            .await
            .map_err(|err| SolveError::Provider(err.to_string()))?;
        interpret_submit(reply)
    }

    async fn fetch_result(&self, task_id: &str) -> Result<Option<String>, SolveError> {
        let reply: ApiReply = self
            .client
            .get(self.url("res.php")?)
            .query(&[
                ("key", self.api_key.as_str()),
                ("action", "get"),
                ("id", task_id),
                ("json", "1"),
            ])
            .send()
            .await
            .map_err(|err| SolveError::Provider(err.to_string()))?
            .json()
            .await
            .map_err(|err| SolveError::Provider(err.to_string()))?;
        interpret_result(reply)
    }
}

#[async_trait]
impl CaptchaSolver for TwoCaptchaSolver {
    fn name(&self) -> &'static str {
        "twocaptcha"
    }

    async fn solve(&self, challenge: &CaptchaChallenge) -> CaptchaResult {
        let task_id = self.submit(challenge).await?;
        log::debug!("twocaptcha task {task_id} submitted");

        let deadline = deadline_after(Instant::now(), self.config.timeout);
        loop {
            sleep(self.config.poll_interval).await;
            if let Some(token) = self.fetch_result(&task_id).await? {
                return Ok(CaptchaToken::new(token));
            }
            if Instant::now() >= deadline {
                return Err(SolveError::Timeout(self.config.timeout));
            }
        }
    }
}

fn interpret_submit(reply: ApiReply) -> Result<String, SolveError> {
    if reply.status == 1 {
        Ok(reply.request)
    } else {
        Err(SolveError::Provider(reply.request))
    }
}

fn interpret_result(reply: ApiReply) -> Result<Option<String>, SolveError> {
    match (reply.status, reply.request.as_str()) {
        (1, _) => Ok(Some(reply.request)),
        (_, NOT_READY) => Ok(None),
        _ => Err(SolveError::Provider(reply.request)),
    }
}
