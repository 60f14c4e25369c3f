use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::error::{DualshotError, Result};
use crate::hal::CapturedFrame;

/// MIME type for every stored capture.
pub const IMAGE_MIME_TYPE: &str = "image/jpeg";

/// Gallery index file maintained next to the stored images.
const GALLERY_INDEX_FILE: &str = ".gallery-index.jsonl";

/// Where a stored image ended up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredLocation {
    pub path: PathBuf,
    pub display_name: String,
    pub mime_type: String,
}

/// Destination for finished capture frames.
///
/// `store` is awaited on the sequencer's worker task, never on the side
/// delivering hardware capture events, so implementations may perform real
/// I/O without stalling the capture pipeline.
#[async_trait]
pub trait ImageSink: Send + Sync {
    async fn store(&self, frame: &CapturedFrame, suggested_name: &str) -> Result<StoredLocation>;
}

/// Build the conventional capture filename for the given wall-clock time:
/// `IMG_<yyyyMMdd_HHmmss>.jpg`.
pub fn suggested_file_name(at: DateTime<Local>) -> String {
    format!("IMG_{}.jpg", at.format("%Y%m%d_%H%M%S"))
}

/// One line of the gallery index, the registration record for a stored
/// image: display name, MIME type, and path relative to the pictures
/// directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GalleryRecord {
    display_name: String,
    mime_type: String,
    relative_path: String,
    stored_at: DateTime<Local>,
}

/// Sink writing images into the shared pictures directory and registering
/// them in the gallery index.
pub struct GallerySink {
    pictures_dir: PathBuf,
    index_enabled: bool,
}

impl GallerySink {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            pictures_dir: PathBuf::from(&config.pictures_dir),
            index_enabled: config.gallery_index,
        }
    }

    pub fn pictures_dir(&self) -> &Path {
        &self.pictures_dir
    }

    /// Pick a path that does not collide with an existing file. Two shots
    /// inside the same wall-clock second share a suggested name; the second
    /// gets a `_1` suffix, and so on.
    async fn unique_path(&self, suggested_name: &str) -> Result<(PathBuf, String)> {
        let candidate = self.pictures_dir.join(suggested_name);
        if !fs::try_exists(&candidate).await? {
            return Ok((candidate, suggested_name.to_string()));
        }

        let stem = Path::new(suggested_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(suggested_name);
        let extension = Path::new(suggested_name)
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("jpg");

        for counter in 1.. {
            let name = format!("{}_{}.{}", stem, counter, extension);
            let candidate = self.pictures_dir.join(&name);
            if !fs::try_exists(&candidate).await? {
                debug!(
                    "Filename {} already taken, storing as {}",
                    suggested_name, name
                );
                return Ok((candidate, name));
            }
        }
        unreachable!("counter space exhausted");
    }

    async fn register_in_index(&self, record: &GalleryRecord) -> Result<()> {
        let index_path = self.pictures_dir.join(GALLERY_INDEX_FILE);
        let mut line = serde_json::to_string(record).map_err(|e| {
            DualshotError::store(record.display_name.clone(), e.to_string())
        })?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&index_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}

#[async_trait]
impl ImageSink for GallerySink {
    async fn store(&self, frame: &CapturedFrame, suggested_name: &str) -> Result<StoredLocation> {
        if frame.is_empty() {
            return Err(DualshotError::store(
                suggested_name.to_string(),
                "empty image buffer".to_string(),
            ));
        }

        fs::create_dir_all(&self.pictures_dir).await.map_err(|e| {
            DualshotError::store(
                suggested_name.to_string(),
                format!("failed to create pictures directory: {}", e),
            )
        })?;

        let (path, display_name) = self.unique_path(suggested_name).await?;

        fs::write(&path, &frame.bytes).await.map_err(|e| {
            DualshotError::store(display_name.clone(), format!("write failed: {}", e))
        })?;

        info!(
            "Stored {} byte image from camera {} as {}",
            frame.len(),
            frame.camera,
            path.display()
        );

        if self.index_enabled {
            let record = GalleryRecord {
                display_name: display_name.clone(),
                mime_type: IMAGE_MIME_TYPE.to_string(),
                relative_path: display_name.clone(),
                stored_at: Local::now(),
            };
            // Index registration failing should not lose an image that is
            // already safely on disk.
            if let Err(e) = self.register_in_index(&record).await {
                warn!("Failed to register {} in gallery index: {}", display_name, e);
            }
        }

        Ok(StoredLocation {
            path,
            display_name,
            mime_type: IMAGE_MIME_TYPE.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{CameraId, Facing};
    use chrono::TimeZone;
    use std::time::SystemTime;

    fn frame(bytes: Vec<u8>) -> CapturedFrame {
        CapturedFrame {
            bytes,
            camera: CameraId::new("0", Facing::Back),
            timestamp: SystemTime::now(),
        }
    }

    fn sink_in(dir: &Path) -> GallerySink {
        GallerySink::new(&StorageConfig {
            pictures_dir: dir.to_string_lossy().into_owned(),
            gallery_index: true,
        })
    }

    #[test]
    fn file_name_follows_the_convention() {
        let at = Local
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .single()
            .unwrap();
        assert_eq!(suggested_file_name(at), "IMG_20240309_140507.jpg");
    }

    #[tokio::test]
    async fn store_writes_bytes_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(dir.path());

        let location = sink
            .store(&frame(vec![0xFF, 0xD8, 0xFF, 0xD9]), "IMG_test.jpg")
            .await
            .unwrap();

        assert_eq!(location.display_name, "IMG_test.jpg");
        assert_eq!(location.mime_type, IMAGE_MIME_TYPE);
        let written = std::fs::read(&location.path).unwrap();
        assert_eq!(written, vec![0xFF, 0xD8, 0xFF, 0xD9]);
    }

    #[tokio::test]
    async fn colliding_names_are_uniquified() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(dir.path());

        let first = sink
            .store(&frame(vec![1, 2, 3]), "IMG_same.jpg")
            .await
            .unwrap();
        let second = sink
            .store(&frame(vec![4, 5, 6]), "IMG_same.jpg")
            .await
            .unwrap();

        assert_eq!(first.display_name, "IMG_same.jpg");
        assert_eq!(second.display_name, "IMG_same_1.jpg");
        assert_ne!(first.path, second.path);
    }

    #[tokio::test]
    async fn stored_images_are_registered_in_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(dir.path());

        sink.store(&frame(vec![1]), "IMG_a.jpg").await.unwrap();
        sink.store(&frame(vec![2]), "IMG_b.jpg").await.unwrap();

        let index = std::fs::read_to_string(dir.path().join(GALLERY_INDEX_FILE)).unwrap();
        let lines: Vec<&str> = index.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("IMG_a.jpg"));
        assert!(lines[0].contains(IMAGE_MIME_TYPE));
        assert!(lines[1].contains("IMG_b.jpg"));
    }

    #[tokio::test]
    async fn empty_buffers_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(dir.path());

        let result = sink.store(&frame(vec![]), "IMG_empty.jpg").await;
        assert!(matches!(result, Err(DualshotError::Store { .. })));
    }
}
