//! Ephemeral preview handles for an edit session.
//!
//! While the user adjusts crop and rotation, every intermediate raster is
//! written to a temporary WebP file so a viewer can display it. The
//! [`PreviewRegistry`] owns those files:
//!
//! * at most one preview is current; installing a new one releases the old
//!   one first
//! * [`PreviewRegistry::release_all`] (and `Drop`) removes every file still
//!   on disk, whichever way the session ended

use crate::error::PipelineError;
use crate::pipeline::encode::{encode_webp, OUTPUT_EXTENSION};
use crate::raster::RasterImage;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, warn};

/// Public view of a live preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewInfo {
    /// Unique within the registry that created it.
    pub id: u64,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub bytes: u64,
}

/// A preview file on disk. Removing the handle removes the file.
#[derive(Debug)]
pub struct PreviewHandle {
    info: PreviewInfo,
    path: TempPath,
}

impl PreviewHandle {
    pub fn info(&self) -> &PreviewInfo {
        &self.info
    }

    fn release(self) {
        let id = self.info.id;
        let shown = self.info.path.display().to_string();
        if let Err(e) = self.path.close() {
            warn!("Could not remove preview #{} at {}: {}", id, shown, e);
        } else {
            debug!("Released preview #{} ({})", id, shown);
        }
    }
}

/// Tracks the preview handles of one edit session.
#[derive(Debug)]
pub struct PreviewRegistry {
    dir: Option<PathBuf>,
    current: Option<PreviewHandle>,
    next_id: u64,
    created: u64,
    released: u64,
}

impl Default for PreviewRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PreviewRegistry {
    /// Previews go to the system temp directory.
    pub fn new() -> Self {
        Self {
            dir: None,
            current: None,
            next_id: 1,
            created: 0,
            released: 0,
        }
    }

    /// Previews go to `dir`, which must exist.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let mut registry = Self::new();
        registry.dir = Some(dir.into());
        registry
    }

    /// Encode `raster` and make it the current preview.
    pub fn replace_current(&mut self, raster: &RasterImage) -> Result<PreviewInfo, PipelineError> {
        let (bytes, _) = encode_webp(raster)?;
        self.install(&bytes, raster.width(), raster.height())
    }

    /// Make already-encoded preview bytes the current preview.
    ///
    /// The previous preview is released only once the new file is on disk;
    /// on failure the current preview is left untouched.
    pub fn install(&mut self, encoded: &[u8], width: u32, height: u32) -> Result<PreviewInfo, PipelineError> {
        let suffix = format!(".{OUTPUT_EXTENSION}");
        let mut builder = tempfile::Builder::new();
        builder.prefix("imgup-preview-").suffix(&suffix);
        let dir = self.dir.clone().unwrap_or_else(std::env::temp_dir);
        let io_err = |source: std::io::Error| PipelineError::Io {
            path: dir.clone(),
            source,
        };

        let mut file = builder.tempfile_in(&dir).map_err(io_err)?;
        file.write_all(encoded).map_err(io_err)?;
        file.flush().map_err(io_err)?;
        let path = file.into_temp_path();
        self.release_current();

        let info = PreviewInfo {
            id: self.next_id,
            path: path.to_path_buf(),
            width,
            height,
            bytes: encoded.len() as u64,
        };
        self.next_id += 1;
        self.created += 1;
        debug!(
            "Preview #{} → {} ({}x{}, {} bytes)",
            info.id,
            info.path.display(),
            width,
            height,
            info.bytes
        );
        self.current = Some(PreviewHandle {
            info: info.clone(),
            path,
        });
        Ok(info)
    }

    pub fn current(&self) -> Option<&PreviewInfo> {
        self.current.as_ref().map(PreviewHandle::info)
    }

    /// Path of the current preview, if any.
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|h| h.info.path.as_path())
    }

    /// Handles created but not yet released.
    pub fn live_count(&self) -> u64 {
        self.created - self.released
    }

    pub fn release_current(&mut self) {
        if let Some(handle) = self.current.take() {
            handle.release();
            self.released += 1;
        }
    }

    pub fn release_all(&mut self) {
        self.release_current();
    }
}

impl Drop for PreviewRegistry {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raster() -> RasterImage {
        RasterImage::from_pixel(4, 3, [200, 100, 50, 255])
    }

    #[test]
    fn replace_releases_previous() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = PreviewRegistry::in_dir(dir.path());

        let first = reg.replace_current(&raster()).unwrap();
        assert!(first.path.exists());
        assert_eq!((first.width, first.height), (4, 3));

        let second = reg.replace_current(&raster()).unwrap();
        assert!(!first.path.exists(), "superseded preview must be removed");
        assert!(second.path.exists());
        assert_ne!(first.id, second.id);
        assert_eq!(reg.live_count(), 1);
        assert_eq!(reg.current().map(|i| i.id), Some(second.id));
    }

    #[test]
    fn release_all_empties_registry() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = PreviewRegistry::in_dir(dir.path());
        let info = reg.replace_current(&raster()).unwrap();
        reg.release_all();
        assert!(!info.path.exists());
        assert!(reg.current().is_none());
        assert_eq!(reg.live_count(), 0);
        reg.release_all();
        assert_eq!(reg.live_count(), 0);
    }

    #[test]
    fn drop_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let mut reg = PreviewRegistry::in_dir(dir.path());
            reg.replace_current(&raster()).unwrap().path
        };
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn preview_file_is_readable_webp() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = PreviewRegistry::in_dir(dir.path());
        let info = reg.replace_current(&raster()).unwrap();
        let img = image::open(&info.path).unwrap();
        assert_eq!((img.width(), img.height()), (4, 3));
    }

    #[test]
    fn zero_area_preview_fails_without_releasing_current() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = PreviewRegistry::in_dir(dir.path());
        let info = reg.replace_current(&raster()).unwrap();
        assert!(reg.replace_current(&RasterImage::new(0, 0)).is_err());
        assert!(info.path.exists());
        assert_eq!(reg.live_count(), 1);
    }

    #[test]
    fn failed_write_keeps_current_preview() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("previews");
        std::fs::create_dir(&dir).unwrap();
        let mut reg = PreviewRegistry::in_dir(&dir);
        let first = reg.replace_current(&raster()).unwrap();

        // Move the preview directory away so the next file cannot be created.
        let moved = root.path().join("moved");
        std::fs::rename(&dir, &moved).unwrap();

        assert!(reg.replace_current(&raster()).is_err());
        assert_eq!(reg.current().map(|i| i.id), Some(first.id));
        assert_eq!(reg.live_count(), 1);
        let name = first.path.file_name().unwrap();
        assert!(moved.join(name).exists());
    }
}
