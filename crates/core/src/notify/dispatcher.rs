//! Fire-and-forget notification queue and its delivery task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::config::NotificationConfig;
use super::notifier::Notifier;
use super::types::StatusNotification;
use crate::metrics;

/// Handle for queueing notifications.
///
/// Never blocks and never fails the caller: a full or closed queue drops the
/// notification with a log line.
#[derive(Clone)]
pub struct NotificationHandle {
    tx: Option<mpsc::Sender<StatusNotification>>,
}

impl NotificationHandle {
    /// A handle that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Queue a notification. Returns false if it was dropped.
    pub fn notify(&self, notification: StatusNotification) -> bool {
        let Some(ref tx) = self.tx else {
            return false;
        };
        match tx.try_send(notification) {
            Ok(()) => true,
            Err(e) => {
                metrics::NOTIFICATIONS.with_label_values(&["dropped"]).inc();
                warn!("Dropping status notification: {}", e);
                false
            }
        }
    }
}

/// Background task that drains the queue, retrying each delivery with
/// exponential backoff.
pub struct NotificationDispatcher {
    rx: mpsc::Receiver<StatusNotification>,
    notifier: Arc<dyn Notifier>,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl NotificationDispatcher {
    /// Deliver until every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!(notifier = self.notifier.name(), "Notification dispatcher started");

        while let Some(notification) = self.rx.recv().await {
            self.deliver(&notification).await;
        }

        tracing::info!("Notification dispatcher shutting down");
    }

    async fn deliver(&self, notification: &StatusNotification) {
        let mut backoff = self.initial_backoff;

        for attempt in 1..=self.max_attempts {
            match self.notifier.deliver(notification).await {
                Ok(()) => {
                    metrics::NOTIFICATIONS.with_label_values(&["delivered"]).inc();
                    debug!(attempt, workshop_id = %notification.workshop_id, "Notification delivered");
                    return;
                }
                Err(e) if attempt < self.max_attempts => {
                    debug!(attempt, error = %e, "Notification delivery failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => {
                    metrics::NOTIFICATIONS.with_label_values(&["failed"]).inc();
                    warn!(
                        workshop_id = %notification.workshop_id,
                        attendee_id = notification.attendee_id.as_deref(),
                        attempts = attempt,
                        error = %e,
                        "Giving up on status notification"
                    );
                }
            }
        }
    }
}

/// Create the queue handle and its dispatcher.
///
/// When notifications are disabled the handle discards everything and no
/// dispatcher is returned.
pub fn create_notification_channel(
    notifier: Arc<dyn Notifier>,
    config: &NotificationConfig,
) -> (NotificationHandle, Option<NotificationDispatcher>) {
    if !config.enabled {
        return (NotificationHandle::disabled(), None);
    }

    let (tx, rx) = mpsc::channel(config.buffer_size.max(1));
    let dispatcher = NotificationDispatcher {
        rx,
        notifier,
        max_attempts: config.max_attempts.max(1),
        initial_backoff: Duration::from_millis(config.initial_backoff_ms),
    };
    (NotificationHandle { tx: Some(tx) }, Some(dispatcher))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{NotifyError, StatusNotification};
    use crate::workshop::Status;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Fails the first `failures` deliveries, then records the rest.
    struct FlakyNotifier {
        failures: AtomicU32,
        attempts: AtomicU32,
        delivered: Mutex<Vec<StatusNotification>>,
    }

    impl FlakyNotifier {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                attempts: AtomicU32::new(0),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Notifier for FlakyNotifier {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn deliver(&self, notification: &StatusNotification) -> Result<(), NotifyError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(NotifyError::Rejected { status: 503 });
            }
            self.delivered.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    fn config(max_attempts: u32) -> NotificationConfig {
        NotificationConfig {
            max_attempts,
            initial_backoff_ms: 1,
            ..Default::default()
        }
    }

    fn notification() -> StatusNotification {
        StatusNotification::workshop("w-1", Status::Deploying, Status::Active)
    }

    #[tokio::test]
    async fn test_retries_until_delivered() {
        let notifier = Arc::new(FlakyNotifier::new(2));
        let (handle, dispatcher) = create_notification_channel(notifier.clone(), &config(3));
        let task = tokio::spawn(dispatcher.unwrap().run());

        assert!(handle.notify(notification()));
        drop(handle);
        task.await.unwrap();

        assert_eq!(notifier.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(notifier.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let notifier = Arc::new(FlakyNotifier::new(10));
        let (handle, dispatcher) = create_notification_channel(notifier.clone(), &config(2));
        let task = tokio::spawn(dispatcher.unwrap().run());

        handle.notify(notification());
        drop(handle);
        task.await.unwrap();

        assert_eq!(notifier.attempts.load(Ordering::SeqCst), 2);
        assert!(notifier.delivered.lock().unwrap().is_empty());
    }

    #[test]
    fn test_full_queue_drops() {
        let notifier = Arc::new(FlakyNotifier::new(0));
        let cfg = NotificationConfig {
            buffer_size: 1,
            ..Default::default()
        };
        let (handle, _dispatcher) = create_notification_channel(notifier, &cfg);

        assert!(handle.notify(notification()));
        assert!(!handle.notify(notification()));
    }

    #[test]
    fn test_disabled_handle_discards() {
        let cfg = NotificationConfig {
            enabled: false,
            ..Default::default()
        };
        let (handle, dispatcher) = create_notification_channel(Arc::new(FlakyNotifier::new(0)), &cfg);
        assert!(dispatcher.is_none());
        assert!(!handle.notify(notification()));
    }
}
