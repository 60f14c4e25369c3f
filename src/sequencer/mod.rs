//! Two-camera run orchestration.

mod runner;
mod state;


pub use state::{RunOutcome, RunState, ShotPhase};

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::DualshotConfig;
use crate::error::{DualshotError, Result};
use crate::events::{EventBus, RunEvent};
use crate::hal::{CameraProvider, CaptureTarget, PermissionGate};
use crate::sink::ImageSink;
use runner::RunDriver;
use state::select_shot_plan;

/// Root orchestrator for user-initiated capture runs.
///
/// Each run produces two photos — back camera, then front — or none. The
/// encoded-image capture target is created once here, shared by both shots
/// of every run, and released only at `shutdown`.
pub struct CaptureSequencer {
    config: DualshotConfig,
    provider: Arc<dyn CameraProvider>,
    sink: Arc<dyn ImageSink>,
    gate: Arc<dyn PermissionGate>,
    bus: EventBus,
    capture_target: CaptureTarget,
    cancel: CancellationToken,
    worker: Option<JoinHandle<RunOutcome>>,
}

impl CaptureSequencer {
    pub fn new(
        config: DualshotConfig,
        provider: Arc<dyn CameraProvider>,
        sink: Arc<dyn ImageSink>,
        gate: Arc<dyn PermissionGate>,
    ) -> Self {
        let bus = EventBus::new(config.system.event_bus_capacity);
        let capture_target =
            CaptureTarget::new(config.camera.resolution, config.camera.capture_capacity);

        Self {
            config,
            provider,
            sink,
            gate,
            bus,
            capture_target,
            cancel: CancellationToken::new(),
            worker: None,
        }
    }

    /// Subscribe to run notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.bus.subscribe()
    }

    /// Handle to the notification bus.
    pub fn events(&self) -> EventBus {
        self.bus.clone()
    }

    /// Whether a run is currently in progress.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|worker| !worker.is_finished())
            .unwrap_or(false)
    }

    /// Start a capture run.
    ///
    /// Checks the permission gate and enumerates cameras before any device
    /// is touched; requires exactly one back and one front camera and no
    /// run already in progress. On success the run proceeds on its own
    /// worker task and this returns the run id.
    pub async fn start_run(&mut self) -> Result<String> {
        if self.is_running() {
            warn!("Rejecting start_run: a run is already in progress");
            return Err(DualshotError::RunInProgress);
        }

        if self.capture_target.is_released() {
            return Err(DualshotError::camera_unavailable(
                "sequencer has been shut down",
            ));
        }

        if !self.gate.has_camera_permission() {
            warn!("Rejecting start_run: camera permission denied");
            return Err(DualshotError::PermissionDenied);
        }

        let cameras = self.provider.list_cameras().await?;
        let plan = select_shot_plan(&cameras)?;

        let run_id = Uuid::new_v4().to_string();
        self.cancel = CancellationToken::new();

        let driver = RunDriver::new(
            state::RunState::new(run_id.clone(), plan),
            Arc::clone(&self.provider),
            Arc::clone(&self.sink),
            self.bus.clone(),
            self.config.convergence.clone(),
            self.capture_target.clone(),
            self.cancel.clone(),
        );

        info!("Run {} accepted", run_id);
        self.worker = Some(tokio::spawn(driver.run()));
        Ok(run_id)
    }

    /// Request cancellation of the run in progress, if any. The run tears
    /// down asynchronously: pending convergence timers are cancelled, any
    /// open device is closed, and the run reports aborted.
    pub fn cancel_run(&self) {
        if self.is_running() {
            info!("Cancelling run in progress");
        }
        self.cancel.cancel();
    }

    /// Wait for the run in progress to finish and return its outcome.
    /// Returns `None` when no run was started.
    pub async fn join_run(&mut self) -> Option<RunOutcome> {
        let worker = self.worker.take()?;
        match worker.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Run worker failed: {}", e);
                Some(RunOutcome::Aborted {
                    error: DualshotError::Cancelled,
                })
            }
        }
    }

    /// Tear the sequencer down: cancel any in-flight run and release the
    /// shared capture target. Further runs are rejected.
    pub async fn shutdown(&mut self) {
        self.cancel_run();
        let _ = self.join_run().await;
        self.capture_target.release();
        info!("Sequencer shut down");
    }
}
