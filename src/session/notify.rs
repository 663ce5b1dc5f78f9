//! User-visible notifications raised by the session.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::network::device_control::CommandResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub detail: Option<String>,
}

impl Notification {
    pub fn info(title: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            level: NotificationLevel::Info,
            title: title.into(),
            detail,
        }
    }

    pub fn success(title: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Success,
            title: title.into(),
            detail: None,
        }
    }

    /// Headline picked by error kind, detail from the adapter's message
    pub fn failure(result: &CommandResult) -> Self {
        let title = result
            .error_kind
            .map(|kind| kind.headline())
            .unwrap_or("Command failed");
        Self {
            level: NotificationLevel::Error,
            title: title.to_string(),
            detail: Some(result.message.clone()).filter(|m| !m.is_empty()),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        let detail = notification.detail.unwrap_or_default();
        match notification.level {
            NotificationLevel::Error => warn!(title = %notification.title, %detail, "notification"),
            _ => info!(title = %notification.title, %detail, "notification"),
        }
    }
}

/// Forwards notifications to a receiver, e.g. a UI task
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_failure_headline_by_kind() {
        let unreachable = CommandResult::failure(ErrorKind::Unreachable, "timed out");
        let rejected = CommandResult::failure(ErrorKind::Rejected, "403");
        let unsupported = CommandResult::unsupported("no numeric channels");

        assert_eq!(Notification::failure(&unreachable).title, "Could not reach device");
        assert_eq!(Notification::failure(&rejected).title, "Device rejected command");
        assert_eq!(
            Notification::failure(&unsupported).title,
            "Not supported on this device"
        );
        assert_eq!(
            Notification::failure(&unsupported).detail.as_deref(),
            Some("no numeric channels")
        );
    }

    #[tokio::test]
    async fn test_channel_notifier_forwards() {
        let (notifier, mut rx) = ChannelNotifier::channel();
        notifier.notify(Notification::success("Muted"));
        assert_eq!(rx.recv().await, Some(Notification::success("Muted")));
    }
}
