use chrono::Local;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::state::{RunOutcome, RunState, ShotPhase};
use crate::config::ConvergenceConfig;
use crate::error::{DualshotError, Result};
use crate::events::{EventBus, RunEvent};
use crate::hal::{
    camera_event_stream, CameraEvent, CameraEventStream, CameraEvents, CameraProvider,
    CapturedFrame, CaptureTarget, DiscardSurface, SessionTargets,
};
use crate::session::{CaptureSession, SessionState};
use crate::sink::{suggested_file_name, ImageSink, StoredLocation};
use crate::timer::ConvergenceTimer;

/// Bound on waiting for a device's terminal closed event during teardown.
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

enum Step {
    Camera(CameraEvent),
    Converged,
    Cancelled,
    ChannelClosed,
}

enum Control {
    Continue,
    Done(Vec<StoredLocation>),
}

/// The run's event dispatch loop.
///
/// All camera lifecycle events, convergence ticks, and cancellation land in
/// one `select!` on one worker task; every state transition happens here
/// and nowhere else.
pub(super) struct RunDriver {
    state: RunState,
    provider: Arc<dyn CameraProvider>,
    sink: Arc<dyn ImageSink>,
    bus: EventBus,
    convergence: ConvergenceConfig,
    capture_target: CaptureTarget,
    cancel: CancellationToken,
    timer: ConvergenceTimer,
    cam_tx: CameraEvents,
    cam_rx: CameraEventStream,
    timer_tx: mpsc::UnboundedSender<()>,
    timer_rx: mpsc::UnboundedReceiver<()>,
    session: Option<CaptureSession>,
    /// True while an initiated open has not yet produced its
    /// `Opened`/`OpenFailed` event; teardown must claim that delivery.
    device_pending: bool,
    stored: Vec<StoredLocation>,
}

impl RunDriver {
    pub(super) fn new(
        state: RunState,
        provider: Arc<dyn CameraProvider>,
        sink: Arc<dyn ImageSink>,
        bus: EventBus,
        convergence: ConvergenceConfig,
        capture_target: CaptureTarget,
        cancel: CancellationToken,
    ) -> Self {
        let (cam_tx, cam_rx) = camera_event_stream();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        Self {
            state,
            provider,
            sink,
            bus,
            convergence,
            capture_target,
            cancel,
            timer: ConvergenceTimer::new(),
            cam_tx,
            cam_rx,
            timer_tx,
            timer_rx,
            session: None,
            device_pending: false,
            stored: Vec::new(),
        }
    }

    pub(super) async fn run(mut self) -> RunOutcome {
        info!(
            "Run {}: capturing {} then {}",
            self.state.run_id, self.state.cameras[0], self.state.cameras[1]
        );

        if let Err(e) = self.open_current().await {
            return self.abort(e).await;
        }

        loop {
            let step = tokio::select! {
                _ = self.cancel.cancelled() => Step::Cancelled,
                Some(()) = self.timer_rx.recv() => Step::Converged,
                event = self.cam_rx.recv() => match event {
                    Some(event) => Step::Camera(event),
                    None => Step::ChannelClosed,
                },
            };

            let result = match step {
                Step::Cancelled => return self.abort(DualshotError::Cancelled).await,
                Step::ChannelClosed => Err(DualshotError::capture(
                    self.state.current_camera(),
                    "camera event stream ended unexpectedly",
                )),
                Step::Converged => self.on_converged().await,
                Step::Camera(event) => self.on_camera_event(event).await,
            };

            match result {
                Ok(Control::Continue) => {}
                Ok(Control::Done(stored)) => {
                    return RunOutcome::Complete { stored };
                }
                Err(e) => return self.abort(e).await,
            }
        }
    }

    /// Begin opening the camera for the current shot.
    async fn open_current(&mut self) -> Result<()> {
        let camera = self.state.current_camera().clone();
        info!(
            "Run {}: opening camera {} (shot {} of {})",
            self.state.run_id,
            camera,
            self.state.current_index + 1,
            self.state.cameras.len()
        );
        self.state.phase = ShotPhase::Opening;
        self.provider.open(&camera, self.cam_tx.clone()).await?;
        self.device_pending = true;
        Ok(())
    }

    /// The convergence delay elapsed; fire the still capture.
    async fn on_converged(&mut self) -> Result<Control> {
        if self.state.phase != ShotPhase::Converging {
            debug!(
                "Run {}: stale convergence tick in phase {:?}",
                self.state.run_id, self.state.phase
            );
            return Ok(Control::Continue);
        }

        let session = self.session.as_mut().ok_or_else(|| {
            DualshotError::capture(self.state.current_camera(), "no session to capture with")
        })?;

        session.trigger_still_capture().await?;
        self.state.phase = ShotPhase::Capturing;
        Ok(Control::Continue)
    }

    async fn on_camera_event(&mut self, event: CameraEvent) -> Result<Control> {
        match event {
            CameraEvent::Opened { device } => {
                self.device_pending = false;
                if self.state.phase != ShotPhase::Opening {
                    warn!(
                        "Run {}: unexpected device delivery in phase {:?}",
                        self.state.run_id, self.state.phase
                    );
                    let mut device = device;
                    let _ = device.close().await;
                    return Ok(Control::Continue);
                }

                let mut session = CaptureSession::new(device);
                let targets = SessionTargets {
                    preview: DiscardSurface::new(),
                    capture: self.capture_target.clone(),
                };
                session.configure(targets, self.cam_tx.clone()).await?;
                self.session = Some(session);
                self.state.phase = ShotPhase::Configuring;
                Ok(Control::Continue)
            }

            CameraEvent::OpenFailed { camera, details } => {
                self.device_pending = false;
                Err(DualshotError::DeviceOpen { camera, details })
            }

            CameraEvent::Disconnected { camera } => {
                if self.session.is_some() {
                    Err(DualshotError::capture(&camera, "device disconnected"))
                } else {
                    Err(DualshotError::device_open(
                        &camera,
                        "device disconnected while opening",
                    ))
                }
            }

            CameraEvent::DeviceError { camera, details } => {
                if self.session.is_some() {
                    Err(DualshotError::Capture { camera, details })
                } else {
                    Err(DualshotError::DeviceOpen { camera, details })
                }
            }

            CameraEvent::SessionConfigured { session } => {
                if self.state.phase != ShotPhase::Configuring {
                    warn!(
                        "Run {}: unexpected session configuration in phase {:?}",
                        self.state.run_id, self.state.phase
                    );
                    return Ok(Control::Continue);
                }

                let wrapper = self.session.as_mut().ok_or_else(|| {
                    DualshotError::session_config(
                        self.state.current_camera(),
                        "session configured without an open device",
                    )
                })?;
                wrapper.on_configured(session).await?;

                let timer_tx = self.timer_tx.clone();
                self.timer.start(
                    self.convergence.frames,
                    self.convergence.frame_interval(),
                    move || {
                        let _ = timer_tx.send(());
                    },
                );
                self.state.phase = ShotPhase::Converging;
                debug!(
                    "Run {}: waiting {} frames for convergence",
                    self.state.run_id, self.convergence.frames
                );
                Ok(Control::Continue)
            }

            CameraEvent::SessionConfigureFailed { camera, details } => {
                Err(DualshotError::SessionConfig { camera, details })
            }

            CameraEvent::CaptureCompleted { frame } => {
                if self.state.phase != ShotPhase::Capturing {
                    warn!(
                        "Run {}: unexpected capture completion in phase {:?}",
                        self.state.run_id, self.state.phase
                    );
                    return Ok(Control::Continue);
                }
                if let Some(session) = self.session.as_mut() {
                    session.on_capture_completed();
                }
                self.store_frame(frame).await
            }

            CameraEvent::CaptureFailed { camera, details } => {
                if let Some(session) = self.session.as_mut() {
                    session.on_capture_failed();
                }
                self.bus.publish(RunEvent::CaptureFailed {
                    index: self.state.current_index,
                    reason: details.clone(),
                    timestamp: SystemTime::now(),
                });
                Err(DualshotError::Capture { camera, details })
            }

            CameraEvent::Closed { camera } => {
                if self.state.phase != ShotPhase::Closing {
                    warn!(
                        "Run {}: unexpected close of camera {} in phase {:?}",
                        self.state.run_id, camera, self.state.phase
                    );
                    return Ok(Control::Continue);
                }

                debug!("Run {}: camera {} fully released", self.state.run_id, camera);
                self.session = None;

                if self.state.is_last_shot() {
                    self.bus.publish(RunEvent::RunComplete {
                        run_id: self.state.run_id.clone(),
                        timestamp: SystemTime::now(),
                    });
                    return Ok(Control::Done(std::mem::take(&mut self.stored)));
                }

                self.state.current_index += 1;
                self.open_current().await?;
                Ok(Control::Continue)
            }
        }
    }

    /// Hand the finished frame to the image sink, then tear this camera
    /// down. The shot counter moves only on a successful handoff.
    async fn store_frame(&mut self, frame: CapturedFrame) -> Result<Control> {
        let name = suggested_file_name(Local::now());
        let camera = frame.camera.clone();

        match self.sink.store(&frame, &name).await {
            Ok(location) => {
                self.stored.push(location);
                self.state.shots_completed += 1;
                self.bus.publish(RunEvent::CaptureSuccess {
                    index: self.state.current_index,
                    camera,
                    timestamp: SystemTime::now(),
                });

                if let Some(session) = self.session.as_mut() {
                    session.close().await?;
                }
                self.state.phase = ShotPhase::Closing;
                Ok(Control::Continue)
            }
            Err(e) => {
                self.bus.publish(RunEvent::CaptureFailed {
                    index: self.state.current_index,
                    reason: e.to_string(),
                    timestamp: SystemTime::now(),
                });
                Err(e)
            }
        }
    }

    /// Tear the run down after an error or cancellation: stop the timer,
    /// release any device we own or are still being handed, and report the
    /// abort. Partial success is never reported.
    async fn abort(mut self, error: DualshotError) -> RunOutcome {
        match &error {
            DualshotError::Cancelled => {
                info!("Run {} cancelled", self.state.run_id);
            }
            other => {
                error!("Run {} aborting: {}", self.state.run_id, other);
            }
        }

        self.timer.cancel();

        if let Some(mut session) = self.session.take() {
            if session.state() != SessionState::Closed {
                let _ = session.close().await;
            }
            self.drain_until_closed().await;
        } else if self.device_pending {
            self.claim_pending_device().await;
        } else if self.state.phase == ShotPhase::Closing {
            self.drain_until_closed().await;
        }

        self.bus.publish(RunEvent::RunAborted {
            run_id: self.state.run_id.clone(),
            reason: error.to_string(),
            timestamp: SystemTime::now(),
        });

        RunOutcome::Aborted { error }
    }

    /// Wait for the terminal closed event of a device whose close has been
    /// initiated, discarding whatever else is still in flight.
    async fn drain_until_closed(&mut self) {
        let drained = timeout(CLOSE_DRAIN_TIMEOUT, async {
            while let Some(event) = self.cam_rx.recv().await {
                match event {
                    CameraEvent::Closed { camera } => {
                        debug!(
                            "Run {}: camera {} released during teardown",
                            self.state.run_id, camera
                        );
                        break;
                    }
                    CameraEvent::Opened { mut device } => {
                        // Should not happen with a close in flight, but a
                        // delivered handle must never be leaked.
                        let _ = device.close().await;
                    }
                    other => {
                        debug!(
                            "Run {}: discarding {} event during teardown",
                            self.state.run_id,
                            other.event_type()
                        );
                    }
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "Run {}: timed out waiting for device release during teardown",
                self.state.run_id
            );
        }
    }

    /// An open was initiated but no device has been delivered yet. Claim
    /// the handle if it arrives and close it, so cancellation never leaks
    /// an open device.
    async fn claim_pending_device(&mut self) {
        let claimed = timeout(CLOSE_DRAIN_TIMEOUT, async {
            while let Some(event) = self.cam_rx.recv().await {
                match event {
                    CameraEvent::Opened { mut device } => {
                        debug!(
                            "Run {}: closing device delivered during teardown",
                            self.state.run_id
                        );
                        let _ = device.close().await;
                    }
                    CameraEvent::Closed { .. } | CameraEvent::OpenFailed { .. } => break,
                    other => {
                        debug!(
                            "Run {}: discarding {} event during teardown",
                            self.state.run_id,
                            other.event_type()
                        );
                    }
                }
            }
        })
        .await;

        if claimed.is_err() {
            warn!(
                "Run {}: no device release observed during teardown",
                self.state.run_id
            );
        }
    }
}
