use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DualshotConfig {
    pub camera: CameraConfig,
    pub convergence: ConvergenceConfig,
    pub storage: StorageConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Still capture resolution (width, height)
    #[serde(default = "default_capture_resolution")]
    pub resolution: (u32, u32),

    /// Number of in-flight encoded images the capture target can hold
    #[serde(default = "default_capture_capacity")]
    pub capture_capacity: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConvergenceConfig {
    /// Preview frames to wait before firing the still capture
    #[serde(default = "default_convergence_frames")]
    pub frames: u32,

    /// Estimated preview frame interval in milliseconds
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

impl ConvergenceConfig {
    /// Estimated frame interval as a `Duration`.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Shared pictures directory for stored captures
    #[serde(default = "default_pictures_dir")]
    pub pictures_dir: String,

    /// Register stored images in the gallery index file
    #[serde(default = "default_gallery_index")]
    pub gallery_index: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Run event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Whether the camera permission is granted to this process
    #[serde(default = "default_camera_permission")]
    pub camera_permission: bool,
}

impl DualshotConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("dualshot.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .set_default(
                "camera.resolution",
                vec![
                    default_capture_resolution().0,
                    default_capture_resolution().1,
                ],
            )?
            .set_default("camera.capture_capacity", default_capture_capacity())?
            .set_default("convergence.frames", default_convergence_frames())?
            .set_default(
                "convergence.frame_interval_ms",
                default_frame_interval_ms() as i64,
            )?
            .set_default("storage.pictures_dir", default_pictures_dir())?
            .set_default("storage.gallery_index", default_gallery_index())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default("system.camera_permission", default_camera_permission())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with DUALSHOT_ prefix
            .add_source(Environment::with_prefix("DUALSHOT").separator("_"))
            .build()?;

        let config: DualshotConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Capture resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.capture_capacity == 0 {
            return Err(ConfigError::Message(
                "Capture target capacity must be at least 1".to_string(),
            ));
        }

        if self.convergence.frames == 0 {
            return Err(ConfigError::Message(
                "Convergence frame count must be greater than 0".to_string(),
            ));
        }

        if self.convergence.frame_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Frame interval must be greater than 0 ms".to_string(),
            ));
        }

        if self.storage.pictures_dir.is_empty() {
            return Err(ConfigError::Message(
                "Pictures directory must not be empty".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for DualshotConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                resolution: default_capture_resolution(),
                capture_capacity: default_capture_capacity(),
            },
            convergence: ConvergenceConfig {
                frames: default_convergence_frames(),
                frame_interval_ms: default_frame_interval_ms(),
            },
            storage: StorageConfig {
                pictures_dir: default_pictures_dir(),
                gallery_index: default_gallery_index(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
                camera_permission: default_camera_permission(),
            },
        }
    }
}

fn default_capture_resolution() -> (u32, u32) {
    (1920, 1080)
}

fn default_capture_capacity() -> u32 {
    2
}

fn default_convergence_frames() -> u32 {
    30
}

fn default_frame_interval_ms() -> u64 {
    33
}

fn default_pictures_dir() -> String {
    "./pictures".to_string()
}

fn default_gallery_index() -> bool {
    true
}

fn default_event_bus_capacity() -> usize {
    100
}

fn default_camera_permission() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = DualshotConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.convergence.frames, 30);
        assert_eq!(config.convergence.frame_interval_ms, 33);
        assert_eq!(config.camera.capture_capacity, 2);
    }

    #[test]
    fn rejects_zero_convergence_frames() {
        let mut config = DualshotConfig::default();
        config.convergence.frames = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_resolution() {
        let mut config = DualshotConfig::default();
        config.camera.resolution = (0, 1080);
        assert!(config.validate().is_err());
    }

    #[test]
    fn frame_interval_conversion() {
        let config = DualshotConfig::default();
        assert_eq!(
            config.convergence.frame_interval(),
            Duration::from_millis(33)
        );
    }
}
