#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, sleep};

use visabot_rs::{
    AppointmentCriteria, AuthError, BookingError, BotConfig, BotController, BotSnapshot,
    CaptchaChallenge, CaptchaResult, CaptchaSolver, CaptchaToken, ConnectError, Credentials,
    DeliveryError, Destination, FormHandle, NavError, Notification, NotificationSink,
    ProxyDescriptor, QueryError, Secret, Severity, SiteClient, SiteSession, SlotInfo,
};

pub const PASSWORD: &str = "hunter2-secret";

/// Baseline configuration: direct connection, no captcha, 10 s polling,
/// 1 s base retry delay.
pub fn config() -> BotConfig {
    let mut config = BotConfig::default();
    config.credentials = Credentials {
        email: "me@example.com".into(),
        password: Secret::new(PASSWORD),
    };
    config.notification.email = "me@example.com".into();
    config.appointment.categories = ["Normal", "Premium"].into_iter().map(String::from).collect();
    config.appointment.retry_interval_secs = 10;
    config.proxy.enabled = false;
    config.captcha.enabled = false;
    config.engine.base_delay_secs = Some(1);
    config
}

pub fn slot(category: &str) -> SlotInfo {
    SlotInfo::new("2026-11-02", "09:30", category)
}

pub fn messages(snapshot: &BotSnapshot) -> Vec<String> {
    snapshot.logs.iter().map(|entry| entry.message.clone()).collect()
}

pub fn has_log(snapshot: &BotSnapshot, needle: &str) -> bool {
    snapshot.logs.iter().any(|entry| entry.message.contains(needle))
}

pub fn count_severity(snapshot: &BotSnapshot, severity: Severity) -> usize {
    snapshot
        .logs
        .iter()
        .filter(|entry| entry.severity == severity)
        .count()
}

/// Polls snapshots until `check` holds. Time is virtual in these tests, so
/// the hour-long ceiling costs nothing.
pub async fn wait_for(bot: &BotController, what: &str, mut check: impl FnMut(&BotSnapshot) -> bool) -> BotSnapshot {
    let deadline = Instant::now() + Duration::from_secs(3600);
    loop {
        let snapshot = bot.snapshot();
        if check(&snapshot) {
            return snapshot;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what}: {:#?}", messages(&snapshot));
        sleep(Duration::from_millis(50)).await;
    }
}

#[derive(Default)]
struct Script {
    connect: VecDeque<Result<(), ConnectError>>,
    queries: VecDeque<Result<Option<SlotInfo>, QueryError>>,
    bookings: VecDeque<Result<(), BookingError>>,
    query_delay: Duration,
    connects: Vec<Option<String>>,
    query_starts: Vec<Instant>,
    logins: usize,
    closed: usize,
    booking_attempts: usize,
    booked: Vec<(SlotInfo, Option<String>)>,
}

/// Portal fake that replays scripted results. Unscripted calls succeed and
/// queries find nothing.
#[derive(Default)]
pub struct ScriptedSite {
    script: Mutex<Script>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_query_delay(&self, delay: Duration) {
        self.script.lock().unwrap().query_delay = delay;
    }

    pub fn push_connect(&self, result: Result<(), ConnectError>) {
        self.script.lock().unwrap().connect.push_back(result);
    }

    pub fn push_query(&self, result: Result<Option<SlotInfo>, QueryError>) {
        self.script.lock().unwrap().queries.push_back(result);
    }

    pub fn push_booking(&self, result: Result<(), BookingError>) {
        self.script.lock().unwrap().bookings.push_back(result);
    }

    pub fn connects(&self) -> Vec<Option<String>> {
        self.script.lock().unwrap().connects.clone()
    }

    pub fn query_starts(&self) -> Vec<Instant> {
        self.script.lock().unwrap().query_starts.clone()
    }

    pub fn logins(&self) -> usize {
        self.script.lock().unwrap().logins
    }

    pub fn closed(&self) -> usize {
        self.script.lock().unwrap().closed
    }

    pub fn booking_attempts(&self) -> usize {
        self.script.lock().unwrap().booking_attempts
    }

    pub fn booked(&self) -> Vec<(SlotInfo, Option<String>)> {
        self.script.lock().unwrap().booked.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SiteClient for ScriptedSite {
    async fn connect(&self, proxy: Option<&ProxyDescriptor>) -> Result<SiteSession, ConnectError> {
        let mut script = self.script.lock().unwrap();
        script.connects.push(proxy.map(ToString::to_string));
        let id = format!("session-{}", script.connects.len());
        script.connect.pop_front().unwrap_or(Ok(()))?;
        Ok(SiteSession::new(id, proxy.cloned()))
    }

    async fn login(&self, _session: &SiteSession, credentials: &Credentials) -> Result<(), AuthError> {
        assert_eq!(credentials.password.expose(), PASSWORD);
        self.script.lock().unwrap().logins += 1;
        Ok(())
    }

    async fn open_form(&self, session: &SiteSession) -> Result<FormHandle, NavError> {
        Ok(FormHandle::new(session))
    }

    async fn query_availability(
        &self,
        _form: &FormHandle,
        _criteria: &AppointmentCriteria,
    ) -> Result<Option<SlotInfo>, QueryError> {
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let delay = {
            let mut script = self.script.lock().unwrap();
            script.query_starts.push(Instant::now());
            script.query_delay
        };
        if !delay.is_zero() {
            sleep(delay).await;
        }
        self.script.lock().unwrap().queries.pop_front().unwrap_or(Ok(None))
    }

    async fn submit_booking(
        &self,
        _form: &FormHandle,
        slot: &SlotInfo,
        captcha: Option<&CaptchaToken>,
    ) -> Result<(), BookingError> {
        let mut script = self.script.lock().unwrap();
        script.booking_attempts += 1;
        script.bookings.pop_front().unwrap_or(Ok(()))?;
        script
            .booked
            .push((slot.clone(), captcha.map(|token| token.token.clone())));
        Ok(())
    }

    async fn close(&self, _session: SiteSession) {
        self.script.lock().unwrap().closed += 1;
    }
}

/// Sink that records what it was asked to deliver, optionally taking its
/// time like a real mail or SMS gateway.
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<Notification>>,
    delay: Duration,
}

impl RecordingSink {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, notification: &Notification, _destination: &Destination) -> Result<(), DeliveryError> {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        self.delivered.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Solver that answers every challenge with a fixed token.
pub struct FixedSolver(pub &'static str);

#[async_trait]
impl CaptchaSolver for FixedSolver {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn solve(&self, _challenge: &CaptchaChallenge) -> CaptchaResult {
        Ok(CaptchaToken::new(self.0))
    }
}
