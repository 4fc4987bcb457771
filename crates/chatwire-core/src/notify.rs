//! Notification surface for incoming messages.

use chatwire_proto::UserId;

/// Application surface that shows a toast or system notification.
pub trait NotificationSink: Send + Sync {
    /// Show a notification for an incoming message.
    fn notify(&self, content: &str, sender_name: &str, sender_id: Option<UserId>);
}

impl<F> NotificationSink for F
where
    F: Fn(&str, &str, Option<UserId>) + Send + Sync,
{
    fn notify(&self, content: &str, sender_name: &str, sender_id: Option<UserId>) {
        self(content, sender_name, sender_id);
    }
}

/// Sink that writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn notify(&self, content: &str, sender_name: &str, sender_id: Option<UserId>) {
        tracing::info!(sender = sender_name, ?sender_id, content, "new message");
    }
}
