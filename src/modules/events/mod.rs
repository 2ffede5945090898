//! Event fan-out for observers of the bot.
//!
//! Every activity-log entry and state change is published as a [`BotEvent`].
//! Synchronous [`EventHandler`]s registered up front see every event;
//! [`EventBus::subscribe`] hands out broadcast receivers for late observers,
//! which only see events emitted after they subscribed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::bot::BotStatus;
use crate::engine::{AppointmentDetails, ConnectionStatus, EnginePhase};
use crate::modules::activity_log::{LogEntry, Severity};

const SUBSCRIBER_BUFFER: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryEvent {
    pub attempt: u32,
    pub reason: String,
    pub scheduled_after: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BotEvent {
    Log(LogEntry),
    StatusChanged {
        previous: BotStatus,
        current: BotStatus,
        at: DateTime<Utc>,
    },
    PhaseChanged {
        previous: EnginePhase,
        current: EnginePhase,
        at: DateTime<Utc>,
    },
    ConnectionChanged(ConnectionStatus),
    AppointmentChanged {
        appointment: Option<AppointmentDetails>,
    },
    ProxyChanged {
        proxy: Option<String>,
    },
    RetryScheduled(RetryEvent),
}

/// Trait implemented by event handlers.
///
/// Handlers run inline while the bot's state lock is held, so they must not
/// call back into the controller.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &BotEvent);
}

/// Dispatcher that forwards events to registered handlers and subscribers.
pub struct EventBus {
    handlers: Vec<Arc<dyn EventHandler>>,
    sender: broadcast::Sender<BotEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self {
            handlers: Vec::new(),
            sender,
        }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.sender.subscribe()
    }

    pub fn dispatch(&self, event: BotEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
        // No receivers is fine; nobody is listening yet.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Mirrors events into the `log` facade.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &BotEvent) {
        match event {
            BotEvent::Log(entry) => match entry.severity {
                Severity::Info | Severity::Success => log::info!("{}", entry.message),
                Severity::Warning => log::warn!("{}", entry.message),
                Severity::Error => log::error!("{}", entry.message),
            },
            BotEvent::StatusChanged { previous, current, .. } => {
                log::debug!("status {previous:?} -> {current:?}");
            }
            BotEvent::PhaseChanged { previous, current, .. } => {
                log::debug!("phase {previous:?} -> {current:?}");
            }
            BotEvent::ConnectionChanged(status) => {
                log::trace!("connection {status:?}");
            }
            BotEvent::AppointmentChanged { appointment } => {
                log::debug!("appointment {appointment:?}");
            }
            BotEvent::ProxyChanged { proxy } => {
                log::debug!("proxy {}", proxy.as_deref().unwrap_or("<direct>"));
            }
            BotEvent::RetryScheduled(retry) => {
                log::info!(
                    "retry attempt {} after {:.2}s ({})",
                    retry.attempt,
                    retry.scheduled_after.as_secs_f64(),
                    retry.reason
                );
            }
        }
    }
}
