//! Configuration types for the background removal engine

use crate::error::{ChromaKeyError, Result};
use crate::types::EdgeSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Conventional location of the per-run output image
pub const DEFAULT_OUTPUT_PATH: &str = "temp/processed_image.png";

/// Output image format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    /// PNG with alpha channel transparency
    #[default]
    Png,
    /// TIFF with alpha channel transparency and lossless compression
    Tiff,
    /// WebP with alpha channel transparency
    WebP,
    /// Raw RGBA8 pixel data (4 bytes per pixel)
    Rgba8,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Png => write!(f, "png"),
            Self::Tiff => write!(f, "tiff"),
            Self::WebP => write!(f, "webp"),
            Self::Rgba8 => write!(f, "rgba8"),
        }
    }
}

/// What happens to a `process-image` request that is still waiting while a
/// newer one arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueuePolicy {
    /// Every request runs, in arrival order
    #[default]
    Queue,
    /// A waiting request is dropped when a newer one is queued behind it,
    /// unless it carries a `colors` override
    Supersede,
}

/// Configuration for a background removal session
///
/// Missing fields take their default when deserialized, so a settings file
/// only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Fixed output slot, overwritten by every run
    pub output_path: PathBuf,

    /// Encoding of the output image
    pub output_format: OutputFormat,

    /// Radius of the neighborhood searched for opposite-class pixels (1-8)
    pub edge_window_radius: u32,

    /// Half-width of the feathering band at sensitivity 100, in channel units
    pub max_feather_band: f32,

    /// Minimum effective tolerance applied to every target (0 = exact matching)
    pub exact_match_slack: u8,

    /// Zero the color of fully removed pixels instead of keeping it
    pub clear_removed_rgb: bool,

    /// Rerun the last image after every state-changing command
    pub auto_reprocess: bool,

    /// Emit an `ack` notification after each handled command
    pub acknowledge_commands: bool,

    /// Handling of `process-image` requests arriving during a run
    pub queue_policy: QueuePolicy,

    /// Classify and feather rows in parallel
    pub parallel: bool,

    /// Edge settings in effect before the first `update-edge-settings`
    pub initial_edge_settings: EdgeSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            output_format: OutputFormat::default(),
            edge_window_radius: 1,
            max_feather_band: 32.0,
            exact_match_slack: 0,
            clear_removed_rgb: false,
            auto_reprocess: false,
            acknowledge_commands: false,
            queue_policy: QueuePolicy::default(),
            parallel: true,
            initial_edge_settings: EdgeSettings::default(),
        }
    }
}

impl SessionConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    ///
    /// ```rust
    /// use chroma_bgremove::{QueuePolicy, SessionConfig};
    ///
    /// let config = SessionConfig::builder()
    ///     .output_path("out/result.png")
    ///     .edge_window_radius(2)
    ///     .queue_policy(QueuePolicy::Supersede)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.edge_window_radius, 2);
    /// ```
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Validation Rules
    ///
    /// - Edge window radius: 1-8 (inclusive)
    /// - Max feather band: finite, 1.0-255.0
    /// - Output path: non-empty, with a file name
    /// - WebP output requires the `webp-support` feature
    ///
    /// # Examples
    ///
    /// ```rust
    /// use chroma_bgremove::SessionConfig;
    ///
    /// let mut config = SessionConfig::default();
    /// assert!(config.validate().is_ok());
    ///
    /// config.edge_window_radius = 0; // Invalid
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        if !(1..=8).contains(&self.edge_window_radius) {
            return Err(ChromaKeyError::config_value_error(
                "edge window radius",
                self.edge_window_radius,
                "1-8",
                Some(1),
            ));
        }

        if !self.max_feather_band.is_finite() || !(1.0..=255.0).contains(&self.max_feather_band) {
            return Err(ChromaKeyError::config_value_error(
                "max feather band",
                self.max_feather_band,
                "1.0-255.0",
                Some(32.0),
            ));
        }

        if self.output_path.as_os_str().is_empty() || self.output_path.file_name().is_none() {
            return Err(ChromaKeyError::invalid_config(format!(
                "Output path '{}' must name a file",
                self.output_path.display()
            )));
        }

        if self.output_format == OutputFormat::WebP && !cfg!(feature = "webp-support") {
            return Err(ChromaKeyError::invalid_config(
                "WebP output requires the 'webp-support' feature",
            ));
        }

        Ok(())
    }
}

/// Builder for `SessionConfig`
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    #[must_use]
    pub fn output_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.output_path = path.into();
        self
    }

    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    #[must_use]
    pub fn edge_window_radius(mut self, radius: u32) -> Self {
        self.config.edge_window_radius = radius;
        self
    }

    #[must_use]
    pub fn max_feather_band(mut self, band: f32) -> Self {
        self.config.max_feather_band = band;
        self
    }

    #[must_use]
    pub fn exact_match_slack(mut self, slack: u8) -> Self {
        self.config.exact_match_slack = slack;
        self
    }

    #[must_use]
    pub fn clear_removed_rgb(mut self, clear: bool) -> Self {
        self.config.clear_removed_rgb = clear;
        self
    }

    #[must_use]
    pub fn auto_reprocess(mut self, enabled: bool) -> Self {
        self.config.auto_reprocess = enabled;
        self
    }

    #[must_use]
    pub fn acknowledge_commands(mut self, enabled: bool) -> Self {
        self.config.acknowledge_commands = enabled;
        self
    }

    #[must_use]
    pub fn queue_policy(mut self, policy: QueuePolicy) -> Self {
        self.config.queue_policy = policy;
        self
    }

    #[must_use]
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.config.parallel = parallel;
        self
    }

    #[must_use]
    pub fn initial_edge_settings(mut self, settings: EdgeSettings) -> Self {
        self.config.initial_edge_settings = settings;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<SessionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
