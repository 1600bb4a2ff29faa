//! User notifications for a headless sender.
//!
//! Notifications are shown on the log under the `beam::notify` target and
//! stay visible for a fixed duration. An identical notification that is
//! still visible is not shown twice.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use beam_session::{Notification, NotificationLevel, Notifier};

/// Display duration for informational notifications.
const DEFAULT_DURATION: Duration = Duration::from_millis(4000);

/// Error notifications stay up longer.
const ERROR_DURATION: Duration = Duration::from_millis(6000);

#[derive(Debug, Clone)]
struct Shown {
    notification: Notification,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Queue {
    visible: Vec<Shown>,
    next_id: u64,
}

/// Notification queue with monotonic ID assignment.
#[derive(Debug)]
pub struct NotificationQueue {
    enabled: bool,
    queue: Mutex<Queue>,
}

impl NotificationQueue {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            queue: Mutex::new(Queue::default()),
        }
    }

    /// Shows `notification` unless disabled or already visible. Returns the
    /// assigned id when shown.
    fn show_at(&self, notification: Notification, now: Instant) -> Option<u64> {
        if !self.enabled {
            return None;
        }

        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.visible.retain(|s| s.expires_at > now);
        if queue.visible.iter().any(|s| s.notification == notification) {
            return None;
        }

        let duration = match notification.level {
            NotificationLevel::Info => DEFAULT_DURATION,
            NotificationLevel::Error => ERROR_DURATION,
        };
        let id = queue.next_id;
        queue.next_id += 1;

        match notification.level {
            NotificationLevel::Info => {
                tracing::info!(target: "beam::notify", id, "{}: {}", notification.title, notification.body)
            }
            NotificationLevel::Error => {
                tracing::error!(target: "beam::notify", id, "{}: {}", notification.title, notification.body)
            }
        }

        queue.visible.push(Shown {
            notification,
            expires_at: now + duration,
        });
        Some(id)
    }

    #[cfg(test)]
    fn visible_count(&self) -> usize {
        let now = Instant::now();
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.visible.iter().filter(|s| s.expires_at > now).count()
    }
}

impl Notifier for NotificationQueue {
    fn push(&self, notification: Notification) -> bool {
        self.show_at(notification, Instant::now()).is_some()
    }
}
