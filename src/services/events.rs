//! Event system for gamification operations
//!
//! Events are emitted only after the owning transaction has committed, so a
//! listener never observes an accrual that was rolled back. Useful for:
//! - Audit logging
//! - Patient notifications ("you unlocked a badge")
//! - Cleaning up badge images in blob storage

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

/// Events emitted by services
#[derive(Debug, Clone, PartialEq)]
pub enum GamificationEvent {
    // Accrual events
    ReportAccrued {
        report_id: i64,
        program_id: i64,
        patient_id: i64,
        points_earned: i64,
        new_total_points: i64,
    },
    BadgeAwarded {
        user_id: i64,
        badge_id: i64,
        badge_name: String,
    },
    ProgramCompleted {
        program_id: i64,
    },

    // Catalog events
    BadgeCreated {
        id: i64,
        name: String,
        point_threshold: i64,
    },
    BadgeUpdated {
        id: i64,
        /// Image that is no longer referenced and may be removed from storage
        stale_image: Option<String>,
    },
    BadgeDeleted {
        id: i64,
        stale_image: Option<String>,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &GamificationEvent);
}

/// Event bus for broadcasting events
pub struct EventBus {
    sender: broadcast::Sender<GamificationEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: GamificationEvent) {
        trace!(event = ?event, "Emitting gamification event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<GamificationEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &GamificationEvent) {
        match event {
            GamificationEvent::ReportAccrued {
                report_id,
                patient_id,
                points_earned,
                new_total_points,
                ..
            } => {
                info!(
                    report_id,
                    patient_id,
                    points_earned,
                    new_total_points,
                    "Report accrued"
                );
            }
            GamificationEvent::BadgeAwarded { user_id, badge_id, badge_name } => {
                info!(user_id, badge_id, badge = %badge_name, "Badge awarded");
            }
            GamificationEvent::BadgeDeleted { id, stale_image } => {
                debug!(id, stale_image = ?stale_image, "Badge deleted");
            }
            _ => {
                trace!(event = ?event, "Gamification event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(GamificationEvent::BadgeAwarded {
            user_id: 7,
            badge_id: 3,
            badge_name: "Bronze".into(),
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        match event {
            GamificationEvent::BadgeAwarded { user_id, badge_name, .. } => {
                assert_eq!(user_id, 7);
                assert_eq!(badge_name, "Bronze");
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(GamificationEvent::ProgramCompleted { program_id: 1 });
    }
}
