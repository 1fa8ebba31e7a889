//! Error types for color-keyed background removal

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for background removal operations
pub type Result<T> = std::result::Result<T, ChromaKeyError>;

/// Comprehensive error types for background removal operations
#[derive(Error, Debug)]
pub enum ChromaKeyError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Source image could not be used (missing, corrupt, unsupported)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed command or notification on the wire
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Classification or compositing failures
    #[error("Processing error: {0}")]
    Processing(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error taxonomy used when deciding how a failure is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// The source image could not be read or decoded
    Input,
    /// A command carried parameters the engine cannot honor
    Config,
    /// A command line could not be parsed
    Protocol,
    /// Unexpected failure inside the engine
    Internal,
}

impl ChromaKeyError {
    /// Create a new invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a new processing error
    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::Processing(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Which part of the taxonomy this error belongs to
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Image(_) | Self::InvalidInput(_) => ErrorCategory::Input,
            Self::InvalidConfig(_) => ErrorCategory::Config,
            Self::Protocol(_) => ErrorCategory::Protocol,
            Self::Io(_) | Self::Processing(_) | Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create image loading error with format context
    pub fn image_load_error<P: AsRef<std::path::Path>>(path: P, details: &str) -> Self {
        let path_display = path.as_ref().display();
        let extension = path
            .as_ref()
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown");

        Self::InvalidInput(format!(
            "Failed to load image '{}' (format: {}): {}. Supported formats: PNG, JPEG, WebP, TIFF, BMP",
            path_display, extension, details
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Create processing error with stage context
    pub fn processing_stage_error(stage: &str, details: &str, input_info: Option<&str>) -> Self {
        let input_context = match input_info {
            Some(info) => format!(" (input: {})", info),
            None => String::new(),
        };

        Self::Processing(format!(
            "Processing failed at stage '{}'{}: {}",
            stage, input_context, details
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_error_creation() {
        let err = ChromaKeyError::invalid_config("test config error");
        assert!(matches!(err, ChromaKeyError::InvalidConfig(_)));

        let err = ChromaKeyError::protocol("unknown command");
        assert!(matches!(err, ChromaKeyError::Protocol(_)));
    }

    #[test]
    fn test_error_display() {
        let err = ChromaKeyError::invalid_config("Invalid output path");
        assert_eq!(err.to_string(), "Invalid configuration: Invalid output path");
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            ChromaKeyError::invalid_input("missing").category(),
            ErrorCategory::Input
        );
        assert_eq!(
            ChromaKeyError::invalid_config("radius").category(),
            ErrorCategory::Config
        );
        assert_eq!(
            ChromaKeyError::protocol("bad json").category(),
            ErrorCategory::Protocol
        );
        assert_eq!(
            ChromaKeyError::internal("allocation").category(),
            ErrorCategory::Internal
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert_eq!(ChromaKeyError::from(io).category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_enhanced_error_context() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err =
            ChromaKeyError::file_io_error("write output", Path::new("/tmp/out.png"), &io_error);
        let error_string = err.to_string();
        assert!(error_string.contains("write output"));
        assert!(error_string.contains("/tmp/out.png"));

        let err = ChromaKeyError::image_load_error(Path::new("photo.xyz"), "unrecognized data");
        let error_string = err.to_string();
        assert!(error_string.contains("photo.xyz"));
        assert!(error_string.contains("format: xyz"));
        assert_eq!(err.category(), ErrorCategory::Input);

        let err = ChromaKeyError::config_value_error("edge window radius", 20, "1-8", Some(1));
        let error_string = err.to_string();
        assert!(error_string.contains("edge window radius"));
        assert!(error_string.contains("20"));
        assert!(error_string.contains("1-8"));
        assert!(error_string.contains("Recommended: 1"));

        let err = ChromaKeyError::processing_stage_error(
            "compositing",
            "mask size mismatch",
            Some("640x480 RGBA"),
        );
        let error_string = err.to_string();
        assert!(error_string.contains("compositing"));
        assert!(error_string.contains("640x480 RGBA"));
    }
}
