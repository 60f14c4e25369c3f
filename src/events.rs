use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::hal::CameraId;

/// Notifications emitted over the course of a capture run. This is the
/// UI-facing boundary: subscribers only ever observe these events, never
/// the sequencer's internal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
    /// A still capture was stored for the shot at `index` (0 = back, 1 = front)
    CaptureSuccess {
        index: usize,
        camera: CameraId,
        timestamp: SystemTime,
    },
    /// The shot at `index` failed; the run is about to abort
    CaptureFailed {
        index: usize,
        reason: String,
        timestamp: SystemTime,
    },
    /// Both shots were captured and stored
    RunComplete {
        run_id: String,
        timestamp: SystemTime,
    },
    /// The run ended without producing a complete pair
    RunAborted {
        run_id: String,
        reason: String,
        timestamp: SystemTime,
    },
}

impl RunEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> SystemTime {
        match self {
            RunEvent::CaptureSuccess { timestamp, .. } => *timestamp,
            RunEvent::CaptureFailed { timestamp, .. } => *timestamp,
            RunEvent::RunComplete { timestamp, .. } => *timestamp,
            RunEvent::RunAborted { timestamp, .. } => *timestamp,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            RunEvent::CaptureSuccess { index, camera, .. } => {
                format!("Shot {} captured on camera {}", index, camera)
            }
            RunEvent::CaptureFailed { index, reason, .. } => {
                format!("Shot {} failed: {}", index, reason)
            }
            RunEvent::RunComplete { run_id, .. } => {
                format!("Run {} complete", run_id)
            }
            RunEvent::RunAborted { run_id, reason, .. } => {
                format!("Run {} aborted: {}", run_id, reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            RunEvent::CaptureSuccess { .. } => "capture_success",
            RunEvent::CaptureFailed { .. } => "capture_failed",
            RunEvent::RunComplete { .. } => "run_complete",
            RunEvent::RunAborted { .. } => "run_aborted",
        }
    }
}

/// Async event bus for run notifications using broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to run events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers, returning how many received it.
    ///
    /// A run must not fail because nobody is listening, so a publish with
    /// zero subscribers is not an error.
    pub fn publish(&self, event: RunEvent) -> usize {
        match &event {
            RunEvent::CaptureSuccess { index, camera, .. } => {
                info!("Shot {} captured on camera {}", index, camera);
            }
            RunEvent::CaptureFailed { index, reason, .. } => {
                error!("Shot {} failed: {}", index, reason);
            }
            RunEvent::RunComplete { run_id, .. } => {
                info!("Run {} complete", run_id);
            }
            RunEvent::RunAborted { run_id, reason, .. } => {
                warn!("Run {} aborted: {}", run_id, reason);
            }
        }

        match self.sender.send(event) {
            Ok(count) => count,
            Err(_) => {
                debug!("Run event published with no subscribers");
                0
            }
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::Facing;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let delivered = bus.publish(RunEvent::CaptureSuccess {
            index: 0,
            camera: CameraId::new("0", Facing::Back),
            timestamp: SystemTime::now(),
        });
        assert_eq!(delivered, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "capture_success");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::new(16);
        let delivered = bus.publish(RunEvent::RunComplete {
            run_id: "test".to_string(),
            timestamp: SystemTime::now(),
        });
        assert_eq!(delivered, 0);
    }
}
