//! Capture session state machine.
//!
//! Wraps one opened device and its configured hardware session. The
//! platform's session and capture callbacks arrive as events on the
//! sequencer's worker task, which drives the transitions below; no state is
//! touched from the delivery side.

use tracing::{debug, info, warn};

use crate::error::{DualshotError, Result};
use crate::hal::{
    CameraDevice, CameraEvents, CameraId, CameraSession, CaptureRequest, FlashMode, SessionTargets,
};

/// Session lifecycle. No state re-entry; `Closed` has no successors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconfigured,
    Ready,
    Capturing,
    Done,
    Failed,
    Closed,
}

/// One open device plus one hardware session, driven through
/// UNCONFIGURED → READY → CAPTURING → {DONE, FAILED} → CLOSED.
pub struct CaptureSession {
    camera: CameraId,
    device: Option<Box<dyn CameraDevice>>,
    session: Option<Box<dyn CameraSession>>,
    state: SessionState,
}

impl CaptureSession {
    /// Take ownership of an opened device.
    pub fn new(device: Box<dyn CameraDevice>) -> Self {
        Self {
            camera: device.id().clone(),
            device: Some(device),
            session: None,
            state: SessionState::Unconfigured,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn camera(&self) -> &CameraId {
        &self.camera
    }

    /// Begin binding both stream targets to one hardware session. The
    /// configured session arrives later as a `SessionConfigured` event.
    pub async fn configure(&mut self, targets: SessionTargets, events: CameraEvents) -> Result<()> {
        if self.state != SessionState::Unconfigured {
            return Err(DualshotError::session_config(
                &self.camera,
                format!("configure is invalid in state {:?}", self.state),
            ));
        }

        let device = self.device.as_mut().ok_or_else(|| {
            DualshotError::session_config(&self.camera, "device handle already released")
        })?;

        debug!("Configuring capture session on camera {}", self.camera);
        device.create_session(targets, events).await
    }

    /// Attach the configured hardware session and immediately start the
    /// repeating preview request against the discard surface, so the sensor
    /// pipeline is active and converging before the still shot.
    pub async fn on_configured(&mut self, mut session: Box<dyn CameraSession>) -> Result<()> {
        if self.state != SessionState::Unconfigured {
            return Err(DualshotError::session_config(
                &self.camera,
                format!("unexpected session configuration in state {:?}", self.state),
            ));
        }

        if let Err(e) = session.set_repeating(CaptureRequest::preview()).await {
            self.state = SessionState::Failed;
            return Err(e);
        }

        self.session = Some(session);
        self.state = SessionState::Ready;
        info!("Capture session ready on camera {}, preview running", self.camera);
        Ok(())
    }

    /// Submit the single flash-on still capture. Valid only from `Ready`;
    /// anywhere else the call fails with the captured state and has no side
    /// effect.
    pub async fn trigger_still_capture(&mut self) -> Result<()> {
        if self.state != SessionState::Ready {
            return Err(DualshotError::capture(
                &self.camera,
                format!("still capture rejected in state {:?}", self.state),
            ));
        }

        let session = self.session.as_mut().ok_or_else(|| {
            DualshotError::capture(&self.camera, "no hardware session attached")
        })?;

        if let Err(e) = session
            .capture(CaptureRequest::still_capture(FlashMode::On))
            .await
        {
            self.state = SessionState::Failed;
            return Err(e);
        }

        self.state = SessionState::Capturing;
        info!("Still capture submitted on camera {}", self.camera);
        Ok(())
    }

    /// Record the completion callback for the in-flight capture.
    pub fn on_capture_completed(&mut self) {
        if self.state == SessionState::Capturing {
            self.state = SessionState::Done;
        } else {
            warn!(
                "Capture completion on camera {} in state {:?}",
                self.camera, self.state
            );
        }
    }

    /// Record the failure callback for the in-flight capture.
    pub fn on_capture_failed(&mut self) {
        if self.state != SessionState::Closed {
            self.state = SessionState::Failed;
        }
    }

    /// Stop the repeating request and release session and device. Valid
    /// from any state; the second and subsequent calls are no-ops. The
    /// device's terminal `Closed` event confirms full release.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            debug!("Capture session on camera {} already closed", self.camera);
            return Ok(());
        }

        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.stop_repeating().await {
                warn!(
                    "Failed to stop repeating request on camera {}: {}",
                    self.camera, e
                );
            }
        }

        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.close().await {
                warn!("Failed to close camera {}: {}", self.camera, e);
            }
        }

        self.state = SessionState::Closed;
        info!("Capture session on camera {} closed", self.camera);
        Ok(())
    }
}
