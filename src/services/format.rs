//! Output format handling service
//!
//! Keeps encoding decisions out of the session so they can be tested on
//! their own.

use crate::{
    config::OutputFormat,
    error::{ChromaKeyError, Result},
};
use image::{ImageFormat, RgbaImage};
use std::path::Path;

/// Service for encoding removal results
pub struct OutputFormatHandler;

impl OutputFormatHandler {
    /// Encode an RGBA image in the given format
    ///
    /// # Examples
    /// ```rust
    /// use chroma_bgremove::{services::OutputFormatHandler, OutputFormat};
    /// use image::RgbaImage;
    ///
    /// let image = RgbaImage::new(2, 2);
    /// let raw = OutputFormatHandler::encode(&image, OutputFormat::Rgba8)?;
    /// assert_eq!(raw.len(), 16);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn encode(image: &RgbaImage, format: OutputFormat) -> Result<Vec<u8>> {
        let Some(image_format) = Self::image_format(format) else {
            return Ok(image.as_raw().clone());
        };

        if format == OutputFormat::WebP && !cfg!(feature = "webp-support") {
            return Err(ChromaKeyError::invalid_config(
                "WebP output requires the 'webp-support' feature",
            ));
        }

        let mut buffer = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buffer);
        image.write_to(&mut cursor, image_format).map_err(|e| {
            ChromaKeyError::processing_stage_error(
                "encoding",
                &format!("Failed to encode {}: {}", format, e),
                Some(&format!("{}x{} RGBA", image.width(), image.height())),
            )
        })?;
        Ok(buffer)
    }

    /// The `image` crate format for an output format, `None` for raw RGBA8
    #[must_use]
    pub fn image_format(format: OutputFormat) -> Option<ImageFormat> {
        match format {
            OutputFormat::Png => Some(ImageFormat::Png),
            OutputFormat::Tiff => Some(ImageFormat::Tiff),
            OutputFormat::WebP => Some(ImageFormat::WebP),
            OutputFormat::Rgba8 => None,
        }
    }

    /// Get the appropriate file extension for a given output format
    ///
    /// ```rust
    /// use chroma_bgremove::{services::OutputFormatHandler, OutputFormat};
    ///
    /// assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Png), "png");
    /// assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Rgba8), "raw");
    /// ```
    #[must_use]
    pub fn get_extension(format: OutputFormat) -> &'static str {
        match format {
            OutputFormat::Png => "png",
            OutputFormat::Tiff => "tiff",
            OutputFormat::WebP => "webp",
            OutputFormat::Rgba8 => "raw",
        }
    }

    /// Guess the output format from a path's extension
    #[must_use]
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<OutputFormat> {
        let extension = path.as_ref().extension()?.to_str()?.to_lowercase();
        match extension.as_str() {
            "png" => Some(OutputFormat::Png),
            "tif" | "tiff" => Some(OutputFormat::Tiff),
            "webp" => Some(OutputFormat::WebP),
            "raw" | "rgba" | "rgba8" => Some(OutputFormat::Rgba8),
            _ => None,
        }
    }
}
