pub mod config;
pub mod error;
pub mod events;
pub mod hal;
pub mod sequencer;
pub mod session;
pub mod sink;
pub mod timer;

pub use config::DualshotConfig;
pub use error::{DualshotError, Result};
pub use events::{EventBus, RunEvent};
pub use hal::sim::SimCameraSystem;
pub use hal::{
    CameraDevice, CameraEvent, CameraId, CameraProvider, CameraSession, CaptureRequest,
    CaptureTarget, CapturedFrame, DiscardSurface, Facing, FlashMode, PermissionGate, RequestKind,
    SessionTargets, StaticPermissionGate,
};
pub use sequencer::{CaptureSequencer, RunOutcome, RunState, ShotPhase};
pub use session::{CaptureSession, SessionState};
pub use sink::{suggested_file_name, GallerySink, ImageSink, StoredLocation};
pub use timer::ConvergenceTimer;
