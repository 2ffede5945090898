//! Integrations that rely on third-party services.
//!
//! This module groups the capabilities the engine drives but does not
//! implement itself: the booking portal, captcha solving, and notification
//! delivery.

pub mod captcha;
pub mod notify;
pub mod site;

pub use captcha::{CaptchaSolver, TwoCaptchaSolver};
pub use notify::{LogNotificationSink, NotificationSink};
pub use site::SiteClient;
