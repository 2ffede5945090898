//! Drives one bot run through the phase table.
//!
//! The engine owns the session, the proxy pool and the retry state. Every
//! portal, captcha and notification call races the shutdown signal, so a
//! stop request interrupts whatever is in flight.

use std::future::{Future, pending};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};

use super::shared::EngineLink;
use super::{AppointmentDetails, EngineEvent, EnginePhase, FatalError, next_phase};
use crate::config::BotConfig;
use crate::external_deps::captcha::{CaptchaSolver, CaptchaToken};
use crate::external_deps::notify::{Destination, Notification, NotificationSink};
use crate::external_deps::site::{BookingError, ConnectError, FormHandle, SiteClient, SiteSession, SlotInfo};
use crate::modules::activity_log::Severity;
use crate::modules::backoff::{Backoff, RetryDecision};
use crate::modules::events::{BotEvent, RetryEvent};
use crate::modules::proxy::ProxyPool;
use crate::modules::scheduler::{TickScheduler, deadline_after};

/// Operator commands forwarded by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EngineCommand {
    Pause,
    Resume,
    Confirm,
    Skip,
}

/// Capabilities injected into every run.
#[derive(Clone)]
pub(crate) struct Capabilities {
    pub site: Arc<dyn SiteClient>,
    pub captcha: Option<Arc<dyn CaptchaSolver>>,
    pub notifier: Arc<dyn NotificationSink>,
}

enum Step {
    Event(EngineEvent),
    Stay,
    Shutdown,
}

struct PendingSlot {
    slot: SlotInfo,
    details: AppointmentDetails,
}

pub(crate) struct PollingEngine {
    config: Arc<BotConfig>,
    capabilities: Capabilities,
    destination: Destination,
    link: EngineLink,
    commands: mpsc::UnboundedReceiver<EngineCommand>,
    shutdown: watch::Receiver<bool>,
    proxies: ProxyPool,
    backoff: Backoff,
    ticks: TickScheduler,
    phase: EnginePhase,
    session: Option<SiteSession>,
    form: Option<FormHandle>,
    pending: Option<PendingSlot>,
    paused: bool,
    proxy_selected: bool,
    last_error: String,
}

impl PollingEngine {
    pub(crate) fn new(
        config: Arc<BotConfig>,
        proxies: ProxyPool,
        capabilities: Capabilities,
        link: EngineLink,
        commands: mpsc::UnboundedReceiver<EngineCommand>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            destination: Destination::from(&config.notification),
            backoff: Backoff::new(config.retry_policy()),
            ticks: TickScheduler::new(config.appointment.retry_interval()),
            config,
            capabilities,
            link,
            commands,
            shutdown,
            proxies,
            phase: EnginePhase::Idle,
            session: None,
            form: None,
            pending: None,
            paused: false,
            proxy_selected: false,
            last_error: String::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        self.publish_proxy_health();
        self.apply(EngineEvent::Start);
        loop {
            let step = match self.phase {
                EnginePhase::Connecting => self.connect().await,
                EnginePhase::LoggingIn => self.login().await,
                EnginePhase::AccessingForm => self.open_form().await,
                EnginePhase::Polling => self.poll().await,
                EnginePhase::AwaitingDecision => self.await_decision().await,
                EnginePhase::Booking => self.book().await,
                EnginePhase::Error => self.recover().await,
                EnginePhase::Fatal => self.wait_for_operator().await,
                EnginePhase::Idle | EnginePhase::Stopped => Step::Shutdown,
            };
            match step {
                Step::Event(event) => self.apply(event),
                Step::Stay => {}
                Step::Shutdown => break,
            }
        }
        self.teardown().await;
    }

    fn apply(&mut self, event: EngineEvent) {
        match next_phase(self.phase, event) {
            Ok(next) => self.enter(next),
            Err(err) => {
                log::warn!("{err}");
                self.record_error(format!("Unexpected engine state: {err}"));
                self.enter(EnginePhase::Error);
            }
        }
    }

    fn enter(&mut self, next: EnginePhase) {
        let previous = self.phase;
        if previous == EnginePhase::Polling && next != EnginePhase::Polling {
            self.ticks.suspend();
        }
        if next == EnginePhase::Polling && previous != EnginePhase::Polling && !self.paused {
            self.ticks.start(false);
        }
        self.phase = next;
        self.link.set_phase(next);
    }

    fn publish_proxy_health(&self) {
        if self.proxies.is_enabled() {
            self.link.set_proxy_health(self.proxies.health_report());
        }
    }

    /// One error-severity entry per failure; the message is also kept as the
    /// cause reported by a later escalation.
    fn record_error(&mut self, message: String) {
        self.link.log(message.clone(), Severity::Error);
        self.last_error = message;
    }

    async fn connect(&mut self) -> Step {
        let proxy = if std::mem::take(&mut self.proxy_selected) {
            self.proxies.current().cloned()
        } else {
            self.proxies.rotate()
        };
        self.publish_proxy_health();
        if self.proxies.is_enabled() && proxy.is_none() {
            self.link.set_proxy(None);
            self.record_error(format!("Connection failed: {}", ConnectError::NoHealthyProxy));
            return Step::Event(EngineEvent::ConnectFailed);
        }

        self.link.set_proxy(proxy.as_ref().map(ToString::to_string));
        if let Some(proxy) = &proxy {
            self.link.log(format!("Using proxy: {proxy} to connect..."), Severity::Info);
        }
        self.link.log("Connecting to BLS portal...", Severity::Info);

        let site = Arc::clone(&self.capabilities.site);
        let Some(result) = cancellable(&mut self.shutdown, site.connect(proxy.as_ref())).await else {
            return Step::Shutdown;
        };

        match result {
            Ok(session) => {
                if let Some(proxy) = &proxy {
                    self.proxies.report_success(proxy);
                    self.publish_proxy_health();
                }
                self.session = Some(session);
                self.link.update_connection(|connection| connection.connected = true);
                Step::Event(EngineEvent::Connected)
            }
            Err(err) => {
                if let Some(proxy) = &proxy {
                    self.proxies.mark_failed(proxy);
                    self.publish_proxy_health();
                }
                self.record_error(format!("Connection failed: {err}"));
                Step::Event(EngineEvent::ConnectFailed)
            }
        }
    }

    async fn login(&mut self) -> Step {
        self.link.log("Logging in to BLS account...", Severity::Info);
        let Some(session) = self.session.clone() else {
            self.record_error("Login failed: no open session".into());
            return Step::Event(EngineEvent::LoginFailed);
        };

        let site = Arc::clone(&self.capabilities.site);
        let config = Arc::clone(&self.config);
        let Some(result) = cancellable(&mut self.shutdown, site.login(&session, &config.credentials)).await else {
            return Step::Shutdown;
        };

        match result {
            Ok(()) => {
                self.link.update_connection(|connection| connection.logged_in = true);
                Step::Event(EngineEvent::LoggedIn)
            }
            Err(err) => {
                self.record_error(format!("Login failed: {err}"));
                Step::Event(EngineEvent::LoginFailed)
            }
        }
    }

    async fn open_form(&mut self) -> Step {
        self.link.log("Accessing appointment form...", Severity::Info);
        let Some(session) = self.session.clone() else {
            self.record_error("Appointment form unavailable: no open session".into());
            return Step::Event(EngineEvent::FormFailed);
        };

        let site = Arc::clone(&self.capabilities.site);
        let Some(result) = cancellable(&mut self.shutdown, site.open_form(&session)).await else {
            return Step::Shutdown;
        };

        match result {
            Ok(form) => {
                self.form = Some(form);
                self.link.update_connection(|connection| {
                    connection.form_accessible = true;
                    connection.booking_ready = true;
                });
                match &self.pending {
                    Some(pending) if pending.details.confirmed => {
                        Step::Event(EngineEvent::FormReadyWithRetainedBooking)
                    }
                    _ => Step::Event(EngineEvent::FormReady),
                }
            }
            Err(err) => {
                self.record_error(format!("Appointment form unavailable: {err}"));
                Step::Event(EngineEvent::FormFailed)
            }
        }
    }

    async fn poll(&mut self) -> Step {
        let rotation_due = if self.paused {
            None
        } else {
            self.proxies
                .rotation_due_at(self.config.proxy.rotation_interval())
        };

        tokio::select! {
            biased;
            _ = shutdown_signalled(&mut self.shutdown) => Step::Shutdown,
            command = self.commands.recv() => self.on_command(command),
            _ = sleep_until_deadline(rotation_due) => self.rotate_proxy().await,
            _ = self.ticks.tick() => self.check_availability().await,
        }
    }

    /// Commands outside of an appointment decision only toggle the ticks.
    fn on_command(&mut self, command: Option<EngineCommand>) -> Step {
        match command {
            None => Step::Shutdown,
            Some(EngineCommand::Pause) => {
                self.paused = true;
                self.ticks.suspend();
                Step::Stay
            }
            Some(EngineCommand::Resume) => {
                if self.paused {
                    self.paused = false;
                    if self.phase == EnginePhase::Polling {
                        self.ticks.start(true);
                    }
                }
                Step::Stay
            }
            Some(other) => {
                log::debug!("ignoring {other:?} while {:?}", self.phase);
                Step::Stay
            }
        }
    }

    async fn rotate_proxy(&mut self) -> Step {
        let rotated = self.proxies.rotate();
        self.publish_proxy_health();
        let Some(proxy) = rotated else {
            self.record_error("No healthy proxy left to rotate to".into());
            return Step::Event(EngineEvent::QueryFailed);
        };

        self.link.log(format!("Rotated to proxy: {proxy}"), Severity::Info);
        self.link.set_proxy(Some(proxy.to_string()));
        self.proxy_selected = true;
        if !self.close_session().await {
            return Step::Shutdown;
        }
        self.link.reset_connection();
        Step::Event(EngineEvent::ProxyRotated)
    }

    async fn check_availability(&mut self) -> Step {
        let attempt = self.link.next_attempt();
        self.link
            .log(format!("Checking appointments (Attempt #{attempt})..."), Severity::Info);

        let Some(form) = self.form.clone() else {
            self.record_error("Availability query failed: appointment form is not open".into());
            return Step::Event(EngineEvent::QueryFailed);
        };
        let site = Arc::clone(&self.capabilities.site);
        let config = Arc::clone(&self.config);
        let Some(result) = cancellable(
            &mut self.shutdown,
            site.query_availability(&form, &config.appointment),
        )
        .await
        else {
            return Step::Shutdown;
        };

        match result {
            Ok(None) => {
                self.backoff.record_success();
                log::debug!("no slot on attempt {attempt}");
                Step::Event(EngineEvent::TickNoSlot)
            }
            Ok(Some(slot)) if !config.appointment.accepts_category(&slot.category) => {
                self.backoff.record_success();
                self.link.log(
                    format!(
                        "{} slot on {} at {} is outside the selected categories, still polling",
                        slot.category, slot.date, slot.time
                    ),
                    Severity::Info,
                );
                Step::Event(EngineEvent::SlotIgnored)
            }
            Ok(Some(slot)) => {
                self.backoff.record_success();
                let details = AppointmentDetails {
                    date: slot.date.clone(),
                    time: slot.time.clone(),
                    category: slot.category.clone(),
                    confirmed: false,
                };
                self.link.set_pending(Some(details.clone()));
                self.link.log(
                    format!(
                        "Appointment found! {} slot on {} at {}",
                        details.category, details.date, details.time
                    ),
                    Severity::Success,
                );
                self.pending = Some(PendingSlot {
                    slot,
                    details: details.clone(),
                });
                // The prompt opens before delivery so a decision sent while a
                // slow sink is still busy stays queued for `await_decision`.
                self.apply(EngineEvent::SlotFound);
                if self
                    .deliver(Notification::AppointmentFound(details))
                    .await
                    .is_none()
                {
                    return Step::Shutdown;
                }
                Step::Stay
            }
            Err(err) => {
                self.record_error(format!("Availability query failed: {err}"));
                Step::Event(EngineEvent::QueryFailed)
            }
        }
    }

    async fn await_decision(&mut self) -> Step {
        let command = tokio::select! {
            biased;
            _ = shutdown_signalled(&mut self.shutdown) => return Step::Shutdown,
            command = self.commands.recv() => command,
        };

        match command {
            Some(EngineCommand::Confirm) => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.details.confirmed = true;
                    self.link.set_pending(Some(pending.details.clone()));
                }
                self.link.log("Confirming appointment...", Severity::Info);
                Step::Event(EngineEvent::Confirm)
            }
            Some(EngineCommand::Skip) => {
                self.link.log("Skipping appointment...", Severity::Warning);
                self.pending = None;
                self.link.set_pending(None);
                Step::Event(EngineEvent::Skip)
            }
            other => self.on_command(other),
        }
    }

    async fn book(&mut self) -> Step {
        let Some(slot) = self.pending.as_ref().map(|pending| pending.slot.clone()) else {
            self.record_error("Booking failed: no appointment pending".into());
            return Step::Event(EngineEvent::BookingFailed);
        };

        // Held until the booking goes through, so a failed attempt reconnects
        // through the same proxy. `rotate` drops the pin if that proxy fails.
        self.proxies.pin();
        let Some(outcome) = self.submit_booking(&slot).await else {
            return Step::Shutdown;
        };

        match outcome {
            Ok(()) => {
                self.proxies.unpin();
                self.backoff.record_success();
                let details = self.pending.take().map(|pending| pending.details);
                self.link.set_pending(None);
                self.link.log("Appointment booked", Severity::Success);

                if let Some(details) = details {
                    match self.deliver(Notification::BookingConfirmed(details)).await {
                        None => return Step::Shutdown,
                        Some(true) => {
                            if let Some(email) = self.destination.email.clone() {
                                self.link
                                    .log(format!("Confirmation sent to {email}"), Severity::Success);
                            }
                        }
                        Some(false) => {}
                    }
                }
                Step::Event(EngineEvent::Booked)
            }
            Err(err) => {
                self.record_error(format!("Booking failed: {err}"));
                Step::Event(EngineEvent::BookingFailed)
            }
        }
    }

    /// `None` when shutdown interrupted the attempt.
    async fn submit_booking(&mut self, slot: &SlotInfo) -> Option<Result<(), BookingError>> {
        let token: Option<CaptchaToken> = match &slot.captcha {
            None => None,
            Some(challenge) => {
                let Some(solver) = self.capabilities.captcha.clone() else {
                    return Some(Err(BookingError::CaptchaUnavailable));
                };
                self.link.log("Solving captcha...", Severity::Info);
                match cancellable(&mut self.shutdown, solver.solve(challenge)).await? {
                    Ok(token) => Some(token),
                    Err(err) => return Some(Err(BookingError::Captcha(err.to_string()))),
                }
            }
        };

        let Some(form) = self.form.clone() else {
            return Some(Err(BookingError::Other("appointment form is not open".into())));
        };
        let site = Arc::clone(&self.capabilities.site);
        cancellable(&mut self.shutdown, site.submit_booking(&form, slot, token.as_ref())).await
    }

    /// Sends a notification. Delivery problems are logged and never change
    /// the phase. `Some(true)` means the sink accepted it.
    async fn deliver(&mut self, notification: Notification) -> Option<bool> {
        if self.destination.is_empty() {
            log::debug!("no notification destination configured, skipping: {notification}");
            return Some(false);
        }

        let notifier = Arc::clone(&self.capabilities.notifier);
        let destination = self.destination.clone();
        match cancellable(&mut self.shutdown, notifier.notify(&notification, &destination)).await? {
            Ok(()) => Some(true),
            Err(err) => {
                self.link.log(format!("Notification failed: {err}"), Severity::Error);
                Some(false)
            }
        }
    }

    async fn recover(&mut self) -> Step {
        if !self.close_session().await {
            return Step::Shutdown;
        }
        self.link.reset_connection();

        let failures = self.backoff.record_failure();
        match self.backoff.decision() {
            RetryDecision::RetryAfter(delay) => {
                self.link.publish(BotEvent::RetryScheduled(RetryEvent {
                    attempt: failures,
                    reason: self.last_error.clone(),
                    scheduled_after: delay,
                    timestamp: Utc::now(),
                }));
                self.link.log(
                    format!(
                        "Retrying in {:.0}s (failure {failures} of {})...",
                        delay.as_secs_f64(),
                        self.backoff.policy().max_consecutive_failures
                    ),
                    Severity::Info,
                );

                let deadline = deadline_after(Instant::now(), delay);
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown_signalled(&mut self.shutdown) => return Step::Shutdown,
                        command = self.commands.recv() => {
                            if let Step::Shutdown = self.on_command(command) {
                                return Step::Shutdown;
                            }
                        }
                        _ = sleep_until(deadline) => return Step::Event(EngineEvent::BackoffElapsed),
                    }
                }
            }
            RetryDecision::GiveUp { failures } => {
                let fatal = FatalError {
                    failures,
                    last_cause: self.last_error.clone(),
                };
                self.link.log(format!("Bot halted: {fatal}"), Severity::Error);
                self.link.set_fatal(Some(fatal));
                Step::Event(EngineEvent::Escalated)
            }
        }
    }

    async fn wait_for_operator(&mut self) -> Step {
        loop {
            let command = tokio::select! {
                biased;
                _ = shutdown_signalled(&mut self.shutdown) => return Step::Shutdown,
                command = self.commands.recv() => command,
            };

            match command {
                None => return Step::Shutdown,
                Some(EngineCommand::Resume) => {
                    self.paused = false;
                    self.backoff.reset();
                    self.link.set_fatal(None);
                    self.link.log("Retrying after operator resume", Severity::Info);
                    return Step::Event(EngineEvent::OperatorRetry);
                }
                Some(other) => log::debug!("ignoring {other:?} while halted"),
            }
        }
    }

    /// Returns false when shutdown interrupted the close.
    async fn close_session(&mut self) -> bool {
        self.form = None;
        let Some(session) = self.session.take() else {
            return true;
        };
        let site = Arc::clone(&self.capabilities.site);
        cancellable(&mut self.shutdown, site.close(session)).await.is_some()
    }

    async fn teardown(&mut self) {
        self.ticks.suspend();
        self.proxies.unpin();
        self.form = None;
        if let Some(session) = self.session.take() {
            self.capabilities.site.close(session).await;
        }
        if let Ok(next) = next_phase(self.phase, EngineEvent::Stop) {
            self.phase = next;
            self.link.set_phase(next);
        }
        self.link.reset_connection();
        log::debug!("engine stopped");
    }
}

/// Resolves once shutdown was requested or the controller went away.
async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Runs `work` unless shutdown is requested first.
async fn cancellable<F: Future>(shutdown: &mut watch::Receiver<bool>, work: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = shutdown_signalled(shutdown) => None,
        output = work => Some(output),
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
