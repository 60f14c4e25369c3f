use thiserror::Error;

use crate::hal::{CameraId, Facing};

#[derive(Error, Debug)]
pub enum DualshotError {
    #[error("camera permission denied")]
    PermissionDenied,

    #[error("camera unavailable: {details}")]
    CameraUnavailable { details: String },

    #[error("failed to open camera {camera}: {details}")]
    DeviceOpen { camera: CameraId, details: String },

    #[error("failed to configure capture session on {camera}: {details}")]
    SessionConfig { camera: CameraId, details: String },

    #[error("capture failed on {camera}: {details}")]
    Capture { camera: CameraId, details: String },

    #[error("failed to store image {name}: {details}")]
    Store { name: String, details: String },

    #[error("a capture run is already in progress")]
    RunInProgress,

    #[error("run cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DualshotError {
    pub fn camera_unavailable<S: Into<String>>(details: S) -> Self {
        Self::CameraUnavailable {
            details: details.into(),
        }
    }

    pub fn device_open<S: Into<String>>(camera: &CameraId, details: S) -> Self {
        Self::DeviceOpen {
            camera: camera.clone(),
            details: details.into(),
        }
    }

    pub fn session_config<S: Into<String>>(camera: &CameraId, details: S) -> Self {
        Self::SessionConfig {
            camera: camera.clone(),
            details: details.into(),
        }
    }

    pub fn capture<S: Into<String>>(camera: &CameraId, details: S) -> Self {
        Self::Capture {
            camera: camera.clone(),
            details: details.into(),
        }
    }

    pub fn store<S: Into<String>>(name: S, details: S) -> Self {
        Self::Store {
            name: name.into(),
            details: details.into(),
        }
    }

    pub fn missing_facing(facing: Facing) -> Self {
        Self::CameraUnavailable {
            details: format!("no {} camera found", facing),
        }
    }

    pub fn duplicate_facing(facing: Facing) -> Self {
        Self::CameraUnavailable {
            details: format!("more than one {} camera found", facing),
        }
    }
}

pub type Result<T> = std::result::Result<T, DualshotError>;
