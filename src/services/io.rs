//! Image I/O operations service
//!
//! Separates file access from the removal engine so runs can be exercised on
//! in-memory images.

use crate::{
    config::OutputFormat,
    error::{ChromaKeyError, Result},
    services::OutputFormatHandler,
};
use image::{DynamicImage, RgbaImage};
use std::io::Write;
use std::path::Path;

/// Service for handling image file input/output operations
pub struct ImageIOService;

impl ImageIOService {
    /// Load an image from a file path
    ///
    /// Tries extension-based format detection first, then falls back to
    /// sniffing the file content.
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(ChromaKeyError::image_load_error(path_ref, "file does not exist"));
        }

        match image::open(path_ref) {
            Ok(img) => Ok(img),
            Err(e) => {
                log::debug!(
                    "Extension-based loading failed for {}: {}. Attempting content-based detection.",
                    path_ref.display(),
                    e
                );

                let data = std::fs::read(path_ref).map_err(|io_err| {
                    ChromaKeyError::image_load_error(path_ref, &io_err.to_string())
                })?;

                image::load_from_memory(&data).map_err(|content_err| {
                    ChromaKeyError::image_load_error(
                        path_ref,
                        &format!(
                            "extension error: {}; content error: {} ({} bytes)",
                            e,
                            content_err,
                            data.len()
                        ),
                    )
                })
            },
        }
    }

    /// Load an image and convert it to RGBA8 (opaque alpha for RGB and gray)
    pub fn load_rgba<P: AsRef<Path>>(path: P) -> Result<RgbaImage> {
        Self::load_image(path).map(|image| image.to_rgba8())
    }

    /// Decode an image held in memory and convert it to RGBA8
    pub fn load_from_bytes(bytes: &[u8]) -> Result<RgbaImage> {
        image::load_from_memory(bytes)
            .map(|image| image.to_rgba8())
            .map_err(|e| {
                ChromaKeyError::invalid_input(format!("Failed to decode image from bytes: {}", e))
            })
    }

    /// Encode and write an image, replacing any existing file atomically
    ///
    /// The data goes to a temporary file in the destination directory which
    /// is then renamed over `path`, so readers never observe a partial file.
    /// Missing parent directories are created.
    pub fn save_image<P: AsRef<Path>>(
        image: &RgbaImage,
        path: P,
        format: OutputFormat,
    ) -> Result<()> {
        let path_ref = path.as_ref();
        let bytes = OutputFormatHandler::encode(image, format)?;

        let parent = match path_ref.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)
            .map_err(|e| ChromaKeyError::file_io_error("create output directory", parent, &e))?;

        let mut staged = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| ChromaKeyError::file_io_error("create temporary file in", parent, &e))?;
        staged
            .write_all(&bytes)
            .and_then(|()| staged.flush())
            .map_err(|e| ChromaKeyError::file_io_error("write", staged.path(), &e))?;
        staged
            .persist(path_ref)
            .map_err(|e| ChromaKeyError::file_io_error("replace", path_ref, &e.error))?;

        log::debug!(
            "Wrote {} bytes of {} to {}",
            bytes.len(),
            format,
            path_ref.display()
        );
        Ok(())
    }

    /// Check if a file path has a supported image extension
    pub fn is_supported_format<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref()
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|ext| {
                matches!(
                    ext.to_lowercase().as_str(),
                    "jpg" | "jpeg" | "png" | "webp" | "tiff" | "tif" | "bmp"
                )
            })
    }
}
