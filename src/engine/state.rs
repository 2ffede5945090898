//! Engine phases and the transition table.
//!
//! The table is a pure function so the runner and the tests share one source
//! of truth about which moves are legal.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnginePhase {
    #[default]
    Idle,
    Connecting,
    LoggingIn,
    AccessingForm,
    Polling,
    AwaitingDecision,
    Booking,
    Error,
    /// Consecutive failures hit the threshold; waits for an operator.
    Fatal,
    Stopped,
}

impl EnginePhase {
    pub fn is_active(&self) -> bool {
        !matches!(self, EnginePhase::Idle | EnginePhase::Stopped)
    }
}

/// Inputs that drive the engine from one phase to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    Start,
    Connected,
    ConnectFailed,
    LoggedIn,
    LoginFailed,
    FormReady,
    /// Form reopened while a confirmed appointment still awaits booking.
    FormReadyWithRetainedBooking,
    FormFailed,
    TickNoSlot,
    SlotIgnored,
    SlotFound,
    QueryFailed,
    ProxyRotated,
    Confirm,
    Skip,
    Booked,
    BookingFailed,
    BackoffElapsed,
    Escalated,
    OperatorRetry,
    Stop,
    Reset,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("no transition from {from:?} on {event:?}")]
pub struct InvalidTransition {
    pub from: EnginePhase,
    pub event: EngineEvent,
}

pub fn next_phase(from: EnginePhase, event: EngineEvent) -> Result<EnginePhase, InvalidTransition> {
    use EngineEvent as E;
    use EnginePhase as P;

    let to = match (from, event) {
        (P::Idle, E::Start) => P::Connecting,

        (P::Connecting, E::Connected) => P::LoggingIn,
        (P::Connecting, E::ConnectFailed) => P::Error,

        (P::LoggingIn, E::LoggedIn) => P::AccessingForm,
        (P::LoggingIn, E::LoginFailed) => P::Error,

        (P::AccessingForm, E::FormReady) => P::Polling,
        (P::AccessingForm, E::FormReadyWithRetainedBooking) => P::Booking,
        (P::AccessingForm, E::FormFailed) => P::Error,

        (P::Polling, E::TickNoSlot | E::SlotIgnored) => P::Polling,
        (P::Polling, E::SlotFound) => P::AwaitingDecision,
        (P::Polling, E::QueryFailed) => P::Error,
        (P::Polling, E::ProxyRotated) => P::Connecting,

        (P::AwaitingDecision, E::Confirm) => P::Booking,
        (P::AwaitingDecision, E::Skip) => P::Polling,

        (P::Booking, E::Booked) => P::Polling,
        (P::Booking, E::BookingFailed) => P::Error,

        (P::Error, E::BackoffElapsed) => P::Connecting,
        (P::Error, E::Escalated) => P::Fatal,
        (P::Fatal, E::OperatorRetry) => P::Connecting,

        (phase, E::Stop) if phase.is_active() => P::Stopped,
        (P::Stopped, E::Reset) => P::Idle,

        (from, event) => return Err(InvalidTransition { from, event }),
    };
    Ok(to)
}

/// Progress flags for the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub logged_in: bool,
    pub form_accessible: bool,
    pub booking_ready: bool,
}

impl ConnectionStatus {
    pub fn is_reset(&self) -> bool {
        *self == Self::default()
    }
}

/// Slot offered to the operator for a confirm/skip decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentDetails {
    pub date: String,
    pub time: String,
    pub category: String,
    pub confirmed: bool,
}
