//! Outbound status-change notifications.

mod config;
mod dispatcher;
mod notifier;
mod types;

pub use config::NotificationConfig;
pub use dispatcher::{create_notification_channel, NotificationDispatcher, NotificationHandle};
pub use notifier::{LogNotifier, Notifier, WebhookNotifier};
pub use types::{NotificationSubject, NotifyError, StatusNotification};

use std::sync::Arc;
use std::time::Duration;

/// Pick the sink for the configuration: a webhook when a URL is set, the log otherwise.
pub fn create_notifier(config: &NotificationConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    match config.webhook_url {
        Some(ref url) if !url.is_empty() => Ok(Arc::new(WebhookNotifier::new(
            url.clone(),
            Duration::from_secs(config.timeout_secs),
        )?)),
        _ => Ok(Arc::new(LogNotifier)),
    }
}
