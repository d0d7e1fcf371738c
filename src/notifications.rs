//! Presentation-facing notifications.
//!
//! The core emits informational, success and error notices (signaling
//! connectivity, session lifecycle, ICE progress). Presentation layers
//! implement [`NotificationSink`]; the core treats the sink as write-only
//! and never waits on it.

use log::{info, warn};

/// Weight of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Error,
}

/// Fire-and-forget sink for user-visible notices.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, severity: Severity, message: &str);
}

/// Sink that routes notifications to the `log` facade.
///
/// Useful as a default for headless deployments and tests.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Error => warn!("{message}"),
            Severity::Info | Severity::Success => info!("{message}"),
        }
    }
}
