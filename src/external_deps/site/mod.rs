//! Booking-portal capability.
//!
//! Everything that touches the portal (browser automation, HTTP scraping,
//! a test fake) lives behind [`SiteClient`]. The engine only sees opaque
//! session and form handles plus the slot a query returned.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{AppointmentCriteria, Credentials};
use crate::external_deps::captcha::{CaptchaChallenge, CaptchaToken};
use crate::modules::proxy::ProxyDescriptor;

/// Live connection to the portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteSession {
    pub id: String,
    pub proxy: Option<ProxyDescriptor>,
    pub metadata: HashMap<String, String>,
}

impl SiteSession {
    pub fn new(id: impl Into<String>, proxy: Option<ProxyDescriptor>) -> Self {
        Self {
            id: id.into(),
            proxy,
            metadata: HashMap::new(),
        }
    }
}

/// The appointment form opened inside a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormHandle {
    pub session_id: String,
    pub metadata: HashMap<String, String>,
}

impl FormHandle {
    pub fn new(session: &SiteSession) -> Self {
        Self {
            session_id: session.id.clone(),
            metadata: HashMap::new(),
        }
    }
}

/// Open slot reported by an availability query.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotInfo {
    pub date: String,
    pub time: String,
    pub category: String,
    /// Challenge the booking step has to solve first.
    pub captcha: Option<CaptchaChallenge>,
}

impl SlotInfo {
    pub fn new(date: impl Into<String>, time: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            time: time.into(),
            category: category.into(),
            captcha: None,
        }
    }

    pub fn with_captcha(mut self, challenge: CaptchaChallenge) -> Self {
        self.captcha = Some(challenge);
        self
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("proxy {proxy} refused the connection: {reason}")]
    Proxy { proxy: String, reason: String },
    #[error("portal unreachable: {0}")]
    Unreachable(String),
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),
    #[error("no healthy proxy available")]
    NoHealthyProxy,
    #[error("connection failed: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("credentials rejected")]
    InvalidCredentials,
    #[error("account locked: {0}")]
    Locked(String),
    #[error("session expired")]
    SessionExpired,
    #[error("login failed: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NavError {
    #[error("appointment form unavailable: {0}")]
    FormUnavailable(String),
    #[error("session expired")]
    SessionExpired,
    #[error("navigation failed: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("rate limited by portal")]
    RateLimited,
    #[error("session expired")]
    SessionExpired,
    #[error("availability query failed: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BookingError {
    #[error("slot no longer available")]
    SlotTaken,
    #[error("captcha required but no solver is configured")]
    CaptchaUnavailable,
    #[error("captcha failed: {0}")]
    Captcha(String),
    #[error("booking rejected: {0}")]
    Rejected(String),
    #[error("booking failed: {0}")]
    Other(String),
}

/// Portal operations driven by the polling engine.
///
/// Every call may be cancelled by the engine when the bot is stopped; an
/// implementation must tolerate its future being dropped at any await point.
#[async_trait]
pub trait SiteClient: Send + Sync {
    async fn connect(&self, proxy: Option<&ProxyDescriptor>) -> Result<SiteSession, ConnectError>;

    async fn login(&self, session: &SiteSession, credentials: &Credentials) -> Result<(), AuthError>;

    async fn open_form(&self, session: &SiteSession) -> Result<FormHandle, NavError>;

    async fn query_availability(
        &self,
        form: &FormHandle,
        criteria: &AppointmentCriteria,
    ) -> Result<Option<SlotInfo>, QueryError>;

    async fn submit_booking(
        &self,
        form: &FormHandle,
        slot: &SlotInfo,
        captcha: Option<&CaptchaToken>,
    ) -> Result<(), BookingError>;

    async fn close(&self, _session: SiteSession) {}
}
