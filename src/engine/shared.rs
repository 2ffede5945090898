//! State shared between the controller and the engine task.
//!
//! The engine is the only writer while a run is active; the controller
//! writes around run boundaries and reads snapshots. Every mutation is
//! published on the event bus while the lock is held, so observers see
//! events in the order the state changed.
//!
//! Each run gets an id. Writes through an [`EngineLink`] whose run has ended
//! are dropped, which keeps a task that is still unwinding after `stop` from
//! touching the freshly reset state.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::broadcast;

use super::{AppointmentDetails, ConnectionStatus, EnginePhase, FatalError};
use crate::bot::{BotSnapshot, BotStatus};
use crate::modules::activity_log::{ActivityLog, Severity};
use crate::modules::events::{BotEvent, EventBus};
use crate::modules::proxy::ProxyHealthReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunIntent {
    Idle,
    Running,
    Paused,
}

#[derive(Debug)]
struct Inner {
    run: Option<u64>,
    next_run: u64,
    intent: RunIntent,
    status: BotStatus,
    phase: EnginePhase,
    fatal: Option<FatalError>,
    connection: ConnectionStatus,
    attempts: u64,
    current_proxy: Option<String>,
    proxy_health: ProxyHealthReport,
    pending: Option<AppointmentDetails>,
    log: ActivityLog,
}

impl Inner {
    fn derive_status(&self) -> BotStatus {
        match self.intent {
            RunIntent::Idle => BotStatus::Idle,
            _ if self.fatal.is_some() => BotStatus::Error,
            RunIntent::Paused => BotStatus::Paused,
            RunIntent::Running if self.phase == EnginePhase::AwaitingDecision => BotStatus::Paused,
            RunIntent::Running => BotStatus::Running,
        }
    }

    fn push_log(&mut self, events: &mut Vec<BotEvent>, message: String, severity: Severity) {
        let entry = self.log.append(message, severity);
        events.push(BotEvent::Log(entry));
    }

    fn set_phase(&mut self, events: &mut Vec<BotEvent>, phase: EnginePhase) {
        if self.phase != phase {
            events.push(BotEvent::PhaseChanged {
                previous: self.phase,
                current: phase,
                at: Utc::now(),
            });
            self.phase = phase;
        }
    }

    fn set_connection(&mut self, events: &mut Vec<BotEvent>, connection: ConnectionStatus) {
        if self.connection != connection {
            self.connection = connection;
            events.push(BotEvent::ConnectionChanged(connection));
        }
    }

    fn set_proxy(&mut self, events: &mut Vec<BotEvent>, proxy: Option<String>) {
        if self.current_proxy != proxy {
            self.current_proxy = proxy.clone();
            events.push(BotEvent::ProxyChanged { proxy });
        }
    }

    fn set_pending(&mut self, events: &mut Vec<BotEvent>, pending: Option<AppointmentDetails>) {
        if self.pending != pending {
            self.pending = pending.clone();
            events.push(BotEvent::AppointmentChanged { appointment: pending });
        }
    }
}

pub(crate) struct SharedState {
    inner: Mutex<Inner>,
    events: EventBus,
}

impl SharedState {
    pub(crate) fn new(events: EventBus, log_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                run: None,
                next_run: 0,
                intent: RunIntent::Idle,
                status: BotStatus::Idle,
                phase: EnginePhase::Idle,
                fatal: None,
                connection: ConnectionStatus::default(),
                attempts: 0,
                current_proxy: None,
                proxy_health: ProxyHealthReport::default(),
                pending: None,
                log: ActivityLog::new(log_capacity),
            }),
            events,
        }
    }

    /// Applies `apply` and publishes what it produced, plus a status change
    /// when the derived status moved. With `run` set, the write is dropped
    /// unless that run is still the active one.
    fn update<R>(&self, run: Option<u64>, apply: impl FnOnce(&mut Inner, &mut Vec<BotEvent>) -> R) -> Option<R> {
        let mut inner = self.inner.lock().expect("bot state lock poisoned");
        if let Some(run) = run
            && inner.run != Some(run)
        {
            return None;
        }

        let mut events = Vec::new();
        let output = apply(&mut inner, &mut events);

        let status = inner.derive_status();
        if status != inner.status {
            events.push(BotEvent::StatusChanged {
                previous: inner.status,
                current: status,
                at: Utc::now(),
            });
            inner.status = status;
        }

        for event in events {
            self.events.dispatch(event);
        }
        Some(output)
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.events.subscribe()
    }

    pub(crate) fn snapshot(&self) -> BotSnapshot {
        let inner = self.inner.lock().expect("bot state lock poisoned");
        BotSnapshot {
            status: inner.status,
            phase: inner.phase,
            connection: inner.connection,
            attempts: inner.attempts,
            current_proxy: inner.current_proxy.clone(),
            proxy_health: inner.proxy_health.clone(),
            pending_appointment: inner.pending.clone(),
            fatal: inner.fatal.clone(),
            logs: inner.log.snapshot(),
        }
    }

    pub(crate) fn status(&self) -> BotStatus {
        self.inner.lock().expect("bot state lock poisoned").status
    }

    pub(crate) fn intent(&self) -> RunIntent {
        self.inner.lock().expect("bot state lock poisoned").intent
    }

    pub(crate) fn is_fatal(&self) -> bool {
        self.inner.lock().expect("bot state lock poisoned").fatal.is_some()
    }

    pub(crate) fn pending(&self) -> Option<AppointmentDetails> {
        self.inner.lock().expect("bot state lock poisoned").pending.clone()
    }

    pub(crate) fn awaiting_decision(&self) -> bool {
        self.inner.lock().expect("bot state lock poisoned").phase == EnginePhase::AwaitingDecision
    }

    pub(crate) fn log(&self, message: impl Into<String>, severity: Severity) {
        self.update(None, |inner, events| inner.push_log(events, message.into(), severity));
    }

    pub(crate) fn clear_logs(&self) {
        self.update(None, |inner, _| inner.log.clear());
    }

    pub(crate) fn set_intent(&self, intent: RunIntent) {
        self.update(None, |inner, _| inner.intent = intent);
    }

    /// Opens a new run and returns the engine's write handle for it.
    pub(crate) fn begin_run(self: &Arc<Self>) -> EngineLink {
        let run = self
            .update(None, |inner, events| {
                inner.next_run += 1;
                inner.run = Some(inner.next_run);
                inner.intent = RunIntent::Running;
                inner.fatal = None;
                inner.attempts = 0;
                inner.set_phase(events, EnginePhase::Idle);
                inner.next_run
            })
            .unwrap_or_default();

        EngineLink {
            shared: Arc::clone(self),
            run,
        }
    }

    /// Closes the active run and resets everything a run produced.
    pub(crate) fn end_run(&self) {
        self.update(None, |inner, events| {
            inner.run = None;
            inner.intent = RunIntent::Idle;
            inner.fatal = None;
            inner.attempts = 0;
            inner.set_pending(events, None);
            inner.set_proxy(events, None);
            inner.proxy_health = ProxyHealthReport::default();
            inner.set_connection(events, ConnectionStatus::default());
            if inner.phase.is_active() {
                inner.set_phase(events, EnginePhase::Stopped);
            }
            inner.set_phase(events, EnginePhase::Idle);
        });
    }
}

/// The engine's write handle, bound to a single run.
#[derive(Clone)]
pub(crate) struct EngineLink {
    shared: Arc<SharedState>,
    run: u64,
}

impl EngineLink {
    fn update<R>(&self, apply: impl FnOnce(&mut Inner, &mut Vec<BotEvent>) -> R) -> Option<R> {
        self.shared.update(Some(self.run), apply)
    }

    pub(crate) fn log(&self, message: impl Into<String>, severity: Severity) {
        self.update(|inner, events| inner.push_log(events, message.into(), severity));
    }

    pub(crate) fn set_phase(&self, phase: EnginePhase) {
        self.update(|inner, events| inner.set_phase(events, phase));
    }

    pub(crate) fn update_connection(&self, change: impl FnOnce(&mut ConnectionStatus)) {
        self.update(|inner, events| {
            let mut connection = inner.connection;
            change(&mut connection);
            inner.set_connection(events, connection);
        });
    }

    pub(crate) fn reset_connection(&self) {
        self.update_connection(|connection| *connection = ConnectionStatus::default());
    }

    /// Bumps the attempt counter and returns the new value.
    pub(crate) fn next_attempt(&self) -> u64 {
        self.update(|inner, _| {
            inner.attempts += 1;
            inner.attempts
        })
        .unwrap_or_default()
    }

    pub(crate) fn set_proxy(&self, proxy: Option<String>) {
        self.update(|inner, events| inner.set_proxy(events, proxy));
    }

    pub(crate) fn set_proxy_health(&self, report: ProxyHealthReport) {
        self.update(|inner, _| inner.proxy_health = report);
    }

    pub(crate) fn set_pending(&self, pending: Option<AppointmentDetails>) {
        self.update(|inner, events| inner.set_pending(events, pending));
    }

    pub(crate) fn set_fatal(&self, fatal: Option<FatalError>) {
        self.update(|inner, _| inner.fatal = fatal);
    }

    pub(crate) fn publish(&self, event: BotEvent) {
        self.update(|_, events| events.push(event));
    }
}
