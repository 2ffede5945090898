//! Outbound notifications for found and booked appointments.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::NotificationConfig;
use crate::engine::AppointmentDetails;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    AppointmentFound(AppointmentDetails),
    BookingConfirmed(AppointmentDetails),
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::AppointmentFound(details) => write!(
                f,
                "Appointment available: {} slot on {} at {}",
                details.category, details.date, details.time
            ),
            Notification::BookingConfirmed(details) => write!(
                f,
                "Appointment booked: {} slot on {} at {}",
                details.category, details.date, details.time
            ),
        }
    }
}

/// Where notifications go. Empty fields are not delivered to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Destination {
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl Destination {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.phone.is_none()
    }
}

impl From<&NotificationConfig> for Destination {
    fn from(config: &NotificationConfig) -> Self {
        let present = |value: &str| {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        };
        Self {
            email: present(&config.email),
            phone: present(&config.phone),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("no notification destination configured")]
    NoDestination,
    #[error("notification transport failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: &Notification, destination: &Destination) -> Result<(), DeliveryError>;
}

/// Sink that only writes to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, notification: &Notification, destination: &Destination) -> Result<(), DeliveryError> {
        if destination.is_empty() {
            return Err(DeliveryError::NoDestination);
        }
        log::info!(
            "notify email={} phone={}: {notification}",
            destination.email.as_deref().unwrap_or("-"),
            destination.phone.as_deref().unwrap_or("-"),
        );
        Ok(())
    }
}
