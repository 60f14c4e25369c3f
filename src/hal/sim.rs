//! Deterministic in-process camera backend.
//!
//! Stands in for the platform camera stack in the binary's simulation mode
//! and in the test suite: a configurable camera pair, per-camera failure
//! injection, synthetic JPEG payloads, and instrumentation counters.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, trace, warn};

use super::{
    CameraDevice, CameraEvent, CameraEvents, CameraId, CameraProvider, CameraSession,
    CaptureRequest, CapturedFrame, Facing, RequestKind, SessionTargets,
};
use crate::error::{DualshotError, Result};

/// Delay between an initiating call and its completion event, to keep the
/// simulated lifecycle genuinely asynchronous.
const EVENT_LATENCY: Duration = Duration::from_millis(1);

#[derive(Default)]
struct SimCounters {
    list_calls: AtomicUsize,
    opens: AtomicUsize,
    closes: AtomicUsize,
    captures: AtomicUsize,
    live_devices: AtomicUsize,
    max_live_devices: AtomicUsize,
}

struct SimShared {
    cameras: Vec<CameraId>,
    fail_open: Mutex<HashSet<String>>,
    fail_configure: Mutex<HashSet<String>>,
    fail_capture: Mutex<HashSet<String>>,
    disconnect_on_capture: Mutex<HashSet<String>>,
    counters: SimCounters,
}

/// Simulated camera system exposing a configurable set of cameras.
#[derive(Clone)]
pub struct SimCameraSystem {
    shared: Arc<SimShared>,
}

impl SimCameraSystem {
    /// Create a system with the given cameras.
    pub fn with_cameras(cameras: Vec<CameraId>) -> Self {
        Self {
            shared: Arc::new(SimShared {
                cameras,
                fail_open: Mutex::new(HashSet::new()),
                fail_configure: Mutex::new(HashSet::new()),
                fail_capture: Mutex::new(HashSet::new()),
                disconnect_on_capture: Mutex::new(HashSet::new()),
                counters: SimCounters::default(),
            }),
        }
    }

    /// Create a system with the standard pair: back camera "0", front
    /// camera "1".
    pub fn with_default_pair() -> Self {
        Self::with_cameras(vec![
            CameraId::new("0", Facing::Back),
            CameraId::new("1", Facing::Front),
        ])
    }

    /// Make opening the named camera fail.
    pub fn with_open_failure(self, name: &str) -> Self {
        self.shared.fail_open.lock().insert(name.to_string());
        self
    }

    /// Make session configuration on the named camera fail.
    pub fn with_configure_failure(self, name: &str) -> Self {
        self.shared.fail_configure.lock().insert(name.to_string());
        self
    }

    /// Make still captures on the named camera fail.
    pub fn with_capture_failure(self, name: &str) -> Self {
        self.shared.fail_capture.lock().insert(name.to_string());
        self
    }

    /// Disconnect the named camera when a still capture is submitted,
    /// instead of completing it.
    pub fn with_disconnect_on_capture(self, name: &str) -> Self {
        self.shared
            .disconnect_on_capture
            .lock()
            .insert(name.to_string());
        self
    }

    /// Number of `list_cameras` calls observed.
    pub fn list_calls(&self) -> usize {
        self.shared.counters.list_calls.load(Ordering::SeqCst)
    }

    /// Number of successful device opens observed.
    pub fn opens(&self) -> usize {
        self.shared.counters.opens.load(Ordering::SeqCst)
    }

    /// Number of device closes observed.
    pub fn closes(&self) -> usize {
        self.shared.counters.closes.load(Ordering::SeqCst)
    }

    /// Number of still capture requests submitted to the hardware.
    pub fn captures(&self) -> usize {
        self.shared.counters.captures.load(Ordering::SeqCst)
    }

    /// Devices currently open.
    pub fn live_devices(&self) -> usize {
        self.shared.counters.live_devices.load(Ordering::SeqCst)
    }

    /// High-water mark of simultaneously open devices.
    pub fn max_live_devices(&self) -> usize {
        self.shared.counters.max_live_devices.load(Ordering::SeqCst)
    }
}

impl SimShared {
    fn device_opened(&self) {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        let live = self.counters.live_devices.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters
            .max_live_devices
            .fetch_max(live, Ordering::SeqCst);
    }

    fn device_closed(&self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        self.counters.live_devices.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CameraProvider for SimCameraSystem {
    async fn list_cameras(&self) -> Result<Vec<CameraId>> {
        self.shared.counters.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.shared.cameras.clone())
    }

    async fn open(&self, camera: &CameraId, events: CameraEvents) -> Result<()> {
        if !self.shared.cameras.contains(camera) {
            return Err(DualshotError::device_open(camera, "unknown camera"));
        }

        let camera = camera.clone();
        let shared = Arc::clone(&self.shared);

        if shared.fail_open.lock().contains(camera.name()) {
            debug!("Simulating open failure for camera {}", camera);
            tokio::spawn(async move {
                tokio::time::sleep(EVENT_LATENCY).await;
                let _ = events.send(CameraEvent::OpenFailed {
                    camera,
                    details: "simulated open failure".to_string(),
                });
            });
            return Ok(());
        }

        tokio::spawn(async move {
            tokio::time::sleep(EVENT_LATENCY).await;
            shared.device_opened();
            debug!("Simulated camera {} opened", camera);
            let device = SimDevice {
                id: camera,
                shared,
                events: events.clone(),
                closed: false,
            };
            let _ = events.send(CameraEvent::Opened {
                device: Box::new(device),
            });
        });

        Ok(())
    }
}

struct SimDevice {
    id: CameraId,
    shared: Arc<SimShared>,
    events: CameraEvents,
    closed: bool,
}

#[async_trait]
impl CameraDevice for SimDevice {
    fn id(&self) -> &CameraId {
        &self.id
    }

    async fn create_session(
        &mut self,
        targets: SessionTargets,
        events: CameraEvents,
    ) -> Result<()> {
        if self.closed {
            return Err(DualshotError::session_config(&self.id, "device is closed"));
        }

        let camera = self.id.clone();
        let shared = Arc::clone(&self.shared);

        if shared.fail_configure.lock().contains(camera.name()) {
            debug!("Simulating configure failure for camera {}", camera);
            tokio::spawn(async move {
                tokio::time::sleep(EVENT_LATENCY).await;
                let _ = events.send(CameraEvent::SessionConfigureFailed {
                    camera,
                    details: "simulated configuration failure".to_string(),
                });
            });
            return Ok(());
        }

        tokio::spawn(async move {
            tokio::time::sleep(EVENT_LATENCY).await;
            debug!("Simulated session configured on camera {}", camera);
            let session = SimSession {
                camera,
                targets,
                shared,
                events: events.clone(),
                repeating: false,
            };
            let _ = events.send(CameraEvent::SessionConfigured {
                session: Box::new(session),
            });
        });

        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            debug!("Simulated camera {} already closed", self.id);
            return Ok(());
        }
        self.closed = true;
        self.shared.device_closed();

        let camera = self.id.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(EVENT_LATENCY).await;
            debug!("Simulated camera {} closed", camera);
            let _ = events.send(CameraEvent::Closed { camera });
        });

        Ok(())
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        if !self.closed {
            // Dropping an open device is a leaked handle; surface it loudly
            // in logs and keep the live-device accounting honest.
            warn!("Simulated camera {} dropped while open", self.id);
            self.shared.device_closed();
        }
    }
}

struct SimSession {
    camera: CameraId,
    targets: SessionTargets,
    shared: Arc<SimShared>,
    events: CameraEvents,
    repeating: bool,
}

#[async_trait]
impl CameraSession for SimSession {
    fn camera(&self) -> &CameraId {
        &self.camera
    }

    async fn set_repeating(&mut self, request: CaptureRequest) -> Result<()> {
        if request.kind != RequestKind::Preview {
            return Err(DualshotError::capture(
                &self.camera,
                "repeating request must use the preview template",
            ));
        }
        self.repeating = true;
        trace!("Repeating preview request active on camera {}", self.camera);
        Ok(())
    }

    async fn stop_repeating(&mut self) -> Result<()> {
        self.repeating = false;
        trace!("Repeating preview request stopped on camera {}", self.camera);
        Ok(())
    }

    async fn capture(&mut self, request: CaptureRequest) -> Result<()> {
        if request.kind != RequestKind::StillCapture {
            return Err(DualshotError::capture(
                &self.camera,
                "single capture must use the still template",
            ));
        }

        let camera = self.camera.clone();
        let events = self.events.clone();

        if self
            .shared
            .disconnect_on_capture
            .lock()
            .contains(camera.name())
        {
            debug!("Simulating disconnect during capture on camera {}", camera);
            tokio::spawn(async move {
                tokio::time::sleep(EVENT_LATENCY).await;
                let _ = events.send(CameraEvent::Disconnected { camera });
            });
            return Ok(());
        }

        if self.shared.fail_capture.lock().contains(camera.name()) {
            debug!("Simulating capture failure on camera {}", camera);
            tokio::spawn(async move {
                tokio::time::sleep(EVENT_LATENCY).await;
                let _ = events.send(CameraEvent::CaptureFailed {
                    camera,
                    details: "simulated capture failure".to_string(),
                });
            });
            return Ok(());
        }

        if self.targets.capture.is_released() {
            return Err(DualshotError::capture(
                &self.camera,
                "capture target has been released",
            ));
        }

        self.shared.counters.captures.fetch_add(1, Ordering::SeqCst);
        let resolution = self.targets.capture.resolution();
        tokio::spawn(async move {
            tokio::time::sleep(EVENT_LATENCY).await;
            let bytes = synth_jpeg(&camera, resolution);
            trace!(
                "Simulated still capture on camera {} ({} bytes)",
                camera,
                bytes.len()
            );
            let _ = events.send(CameraEvent::CaptureCompleted {
                frame: CapturedFrame {
                    bytes,
                    camera,
                    timestamp: SystemTime::now(),
                },
            });
        });

        Ok(())
    }
}

/// Build a synthetic JPEG payload: JFIF header, a fill pattern derived from
/// the source camera, and the end-of-image marker.
fn synth_jpeg(camera: &CameraId, resolution: (u32, u32)) -> Vec<u8> {
    let mut data = vec![
        0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01, 0x01, 0x01, 0x00,
        0x48, 0x00, 0x48, 0x00, 0x00,
    ];

    let pattern_byte = match camera.facing() {
        Facing::Back => 0xB0,
        Facing::Front => 0xF0,
    };
    let pattern_size = 1000 + (resolution.0 as usize % 500);
    data.extend(vec![pattern_byte; pattern_size]);
    data.extend_from_slice(&[0xFF, 0xD9]);

    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{camera_event_stream, CaptureTarget, DiscardSurface, FlashMode};

    fn targets() -> SessionTargets {
        SessionTargets {
            preview: DiscardSurface::new(),
            capture: CaptureTarget::new((1920, 1080), 2),
        }
    }

    #[tokio::test]
    async fn open_delivers_device_event() {
        let sim = SimCameraSystem::with_default_pair();
        let cameras = sim.list_cameras().await.unwrap();
        let (tx, mut rx) = camera_event_stream();

        sim.open(&cameras[0], tx).await.unwrap();

        match rx.recv().await.unwrap() {
            CameraEvent::Opened { device } => assert_eq!(device.id(), &cameras[0]),
            other => panic!("unexpected event: {}", other.event_type()),
        }
        assert_eq!(sim.opens(), 1);
        assert_eq!(sim.live_devices(), 1);
    }

    #[tokio::test]
    async fn open_unknown_camera_is_an_immediate_error() {
        let sim = SimCameraSystem::with_default_pair();
        let (tx, _rx) = camera_event_stream();

        let bogus = CameraId::new("99", Facing::Back);
        assert!(sim.open(&bogus, tx).await.is_err());
        assert_eq!(sim.opens(), 0);
    }

    #[tokio::test]
    async fn capture_produces_jpeg_payload() {
        let sim = SimCameraSystem::with_default_pair();
        let cameras = sim.list_cameras().await.unwrap();
        let (tx, mut rx) = camera_event_stream();

        sim.open(&cameras[0], tx.clone()).await.unwrap();
        let mut device = match rx.recv().await.unwrap() {
            CameraEvent::Opened { device } => device,
            other => panic!("unexpected event: {}", other.event_type()),
        };

        device.create_session(targets(), tx).await.unwrap();
        let mut session = match rx.recv().await.unwrap() {
            CameraEvent::SessionConfigured { session } => session,
            other => panic!("unexpected event: {}", other.event_type()),
        };

        session
            .capture(CaptureRequest::still_capture(FlashMode::On))
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            CameraEvent::CaptureCompleted { frame } => {
                assert_eq!(frame.camera, cameras[0]);
                assert_eq!(&frame.bytes[..2], &[0xFF, 0xD8]);
                assert_eq!(&frame.bytes[frame.bytes.len() - 2..], &[0xFF, 0xD9]);
            }
            other => panic!("unexpected event: {}", other.event_type()),
        }
        assert_eq!(sim.captures(), 1);
    }

    #[tokio::test]
    async fn capture_against_released_target_fails() {
        let sim = SimCameraSystem::with_default_pair();
        let cameras = sim.list_cameras().await.unwrap();
        let (tx, mut rx) = camera_event_stream();

        let session_targets = targets();
        sim.open(&cameras[0], tx.clone()).await.unwrap();
        let mut device = match rx.recv().await.unwrap() {
            CameraEvent::Opened { device } => device,
            other => panic!("unexpected event: {}", other.event_type()),
        };
        device
            .create_session(session_targets.clone(), tx)
            .await
            .unwrap();
        let mut session = match rx.recv().await.unwrap() {
            CameraEvent::SessionConfigured { session } => session,
            other => panic!("unexpected event: {}", other.event_type()),
        };

        session_targets.capture.release();
        let result = session
            .capture(CaptureRequest::still_capture(FlashMode::On))
            .await;
        assert!(result.is_err());
        assert_eq!(sim.captures(), 0);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_tracked() {
        let sim = SimCameraSystem::with_default_pair();
        let cameras = sim.list_cameras().await.unwrap();
        let (tx, mut rx) = camera_event_stream();

        sim.open(&cameras[1], tx).await.unwrap();
        let mut device = match rx.recv().await.unwrap() {
            CameraEvent::Opened { device } => device,
            other => panic!("unexpected event: {}", other.event_type()),
        };

        device.close().await.unwrap();
        device.close().await.unwrap();

        match rx.recv().await.unwrap() {
            CameraEvent::Closed { camera } => assert_eq!(camera, cameras[1]),
            other => panic!("unexpected event: {}", other.event_type()),
        }
        assert_eq!(sim.closes(), 1);
        assert_eq!(sim.live_devices(), 0);
    }
}
