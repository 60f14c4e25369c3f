pub mod sim;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;

use crate::error::Result;

/// Camera orientation attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Facing {
    Back,
    Front,
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Facing::Back => write!(f, "back"),
            Facing::Front => write!(f, "front"),
        }
    }
}

/// Opaque handle to a physical camera, tagged with its facing. Discovered
/// once per run and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CameraId {
    name: String,
    facing: Facing,
}

impl CameraId {
    pub fn new<S: Into<String>>(name: S, facing: Facing) -> Self {
        Self {
            name: name.into(),
            facing,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn facing(&self) -> Facing {
        self.facing
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.facing)
    }
}

/// An encoded still image delivered by the platform, consumed exactly once
/// by the image sink.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Encoded JPEG bytes
    pub bytes: Vec<u8>,
    /// Camera that produced the frame
    pub camera: CameraId,
    /// Capture completion time
    pub timestamp: SystemTime,
}

impl CapturedFrame {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// The encoded-image stream target, the analog of a platform image reader.
///
/// Created once per sequencer, shared across both shots of a run, and
/// released only at full sequencer teardown — never between the two shots.
#[derive(Debug, Clone)]
pub struct CaptureTarget {
    inner: Arc<CaptureTargetInner>,
}

#[derive(Debug)]
struct CaptureTargetInner {
    resolution: (u32, u32),
    capacity: u32,
    released: AtomicBool,
}

impl CaptureTarget {
    pub fn new(resolution: (u32, u32), capacity: u32) -> Self {
        Self {
            inner: Arc::new(CaptureTargetInner {
                resolution,
                capacity,
                released: AtomicBool::new(false),
            }),
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.inner.resolution
    }

    /// Maximum number of in-flight encoded images the target can hold.
    pub fn capacity(&self) -> u32 {
        self.inner.capacity
    }

    /// Release the target. Captures against a released target fail.
    pub fn release(&self) {
        self.inner.released.store(true, Ordering::SeqCst);
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }
}

/// Discard-only preview surface. Frames routed here are dropped on arrival;
/// the surface exists so the repeating preview request has a live target and
/// the sensor pipeline converges before the still shot.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSurface;

impl DiscardSurface {
    pub fn new() -> Self {
        Self
    }
}

/// The two stream targets a capture session is configured with.
#[derive(Debug, Clone)]
pub struct SessionTargets {
    pub preview: DiscardSurface,
    pub capture: CaptureTarget,
}

/// Request template, mirroring the platform's preview/still split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Continuously reissued request keeping the preview stream live
    Preview,
    /// Single request producing one final encoded image
    StillCapture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashMode {
    Off,
    On,
}

/// A capture request submitted to a hardware session.
#[derive(Debug, Clone, Copy)]
pub struct CaptureRequest {
    pub kind: RequestKind,
    pub flash: FlashMode,
}

impl CaptureRequest {
    pub fn preview() -> Self {
        Self {
            kind: RequestKind::Preview,
            flash: FlashMode::Off,
        }
    }

    pub fn still_capture(flash: FlashMode) -> Self {
        Self {
            kind: RequestKind::StillCapture,
            flash,
        }
    }
}

/// Asynchronous camera lifecycle events.
///
/// The platform delivers device, session, and capture callbacks as a single
/// event stream consumed by the sequencer's worker task; nothing in the
/// stream is handled on the delivery side.
pub enum CameraEvent {
    /// The device finished opening and is exclusively owned by the receiver
    Opened { device: Box<dyn CameraDevice> },
    OpenFailed { camera: CameraId, details: String },
    /// The device was disconnected out from under us
    Disconnected { camera: CameraId },
    DeviceError { camera: CameraId, details: String },
    /// The hardware session is configured and ready for requests
    SessionConfigured { session: Box<dyn CameraSession> },
    SessionConfigureFailed { camera: CameraId, details: String },
    /// A still capture completed and produced an encoded frame
    CaptureCompleted { frame: CapturedFrame },
    CaptureFailed { camera: CameraId, details: String },
    /// The device finished closing; its handle is fully released
    Closed { camera: CameraId },
}

impl CameraEvent {
    /// Get the event type as a string for logging and filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            CameraEvent::Opened { .. } => "opened",
            CameraEvent::OpenFailed { .. } => "open_failed",
            CameraEvent::Disconnected { .. } => "disconnected",
            CameraEvent::DeviceError { .. } => "device_error",
            CameraEvent::SessionConfigured { .. } => "session_configured",
            CameraEvent::SessionConfigureFailed { .. } => "session_configure_failed",
            CameraEvent::CaptureCompleted { .. } => "capture_completed",
            CameraEvent::CaptureFailed { .. } => "capture_failed",
            CameraEvent::Closed { .. } => "closed",
        }
    }
}

/// Sender half of a camera event stream.
pub type CameraEvents = mpsc::UnboundedSender<CameraEvent>;

/// Receiver half of a camera event stream.
pub type CameraEventStream = mpsc::UnboundedReceiver<CameraEvent>;

/// Create a camera event stream pair.
pub fn camera_event_stream() -> (CameraEvents, CameraEventStream) {
    mpsc::unbounded_channel()
}

/// Platform camera enumeration and device access.
#[async_trait]
pub trait CameraProvider: Send + Sync {
    /// Enumerate the cameras currently attached to the platform.
    async fn list_cameras(&self) -> Result<Vec<CameraId>>;

    /// Begin opening a camera device. Completion is delivered on `events`
    /// as `Opened` or `OpenFailed`; an immediate error means the open could
    /// not even be initiated.
    async fn open(&self, camera: &CameraId, events: CameraEvents) -> Result<()>;
}

/// An exclusively owned, opened camera device.
#[async_trait]
pub trait CameraDevice: Send {
    fn id(&self) -> &CameraId;

    /// Begin configuring a hardware session bound to the given targets.
    /// Completion is delivered on `events` as `SessionConfigured` or
    /// `SessionConfigureFailed`.
    async fn create_session(
        &mut self,
        targets: SessionTargets,
        events: CameraEvents,
    ) -> Result<()>;

    /// Begin closing the device. The terminal `Closed` event confirms the
    /// handle is fully released; the next device must not open before it.
    async fn close(&mut self) -> Result<()>;
}

/// A configured hardware capture session.
#[async_trait]
pub trait CameraSession: Send {
    fn camera(&self) -> &CameraId;

    /// Install a repeating request (preview stream).
    async fn set_repeating(&mut self, request: CaptureRequest) -> Result<()>;

    /// Stop the repeating request.
    async fn stop_repeating(&mut self) -> Result<()>;

    /// Submit a single capture request. Completion is delivered as
    /// `CaptureCompleted` or `CaptureFailed`.
    async fn capture(&mut self, request: CaptureRequest) -> Result<()>;
}

/// Camera permission query, answered synchronously once per run.
pub trait PermissionGate: Send + Sync {
    fn has_camera_permission(&self) -> bool;
}

/// Fixed-answer permission gate.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermissionGate {
    granted: bool,
}

impl StaticPermissionGate {
    pub fn new(granted: bool) -> Self {
        Self { granted }
    }

    pub fn granted() -> Self {
        Self::new(true)
    }

    pub fn denied() -> Self {
        Self::new(false)
    }
}

impl PermissionGate for StaticPermissionGate {
    fn has_camera_permission(&self) -> bool {
        self.granted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_id_display_includes_facing() {
        let id = CameraId::new("1", Facing::Front);
        assert_eq!(id.to_string(), "1 (front)");
        assert_eq!(id.name(), "1");
        assert_eq!(id.facing(), Facing::Front);
    }

    #[test]
    fn capture_target_release_is_shared() {
        let target = CaptureTarget::new((1920, 1080), 2);
        let clone = target.clone();
        assert!(!clone.is_released());

        target.release();
        assert!(clone.is_released());
    }

    #[test]
    fn still_request_carries_flash_mode() {
        let request = CaptureRequest::still_capture(FlashMode::On);
        assert_eq!(request.kind, RequestKind::StillCapture);
        assert_eq!(request.flash, FlashMode::On);

        let preview = CaptureRequest::preview();
        assert_eq!(preview.kind, RequestKind::Preview);
        assert_eq!(preview.flash, FlashMode::Off);
    }
}
