#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Chroma-Key Background Removal
//!
//! Removes user-picked background colors from raster images. Every pixel
//! within a per-color tolerance (per-channel, Chebyshev distance) of any
//! selected color becomes transparent; optional edge feathering gives the
//! boundary between removed and kept regions a smooth alpha ramp.
//!
//! The crate can be embedded as a library or driven by a host shell through
//! the JSON-lines protocol served by the `chroma-bgremove serve` binary.
//!
//! ## Features
//!
//! - **Per-color tolerance**: any number of target colors, each 0-255
//! - **Edge feathering**: sensitivity 0-100, binary mask at 0 or when disabled
//! - **Stateful sessions**: targets and edge settings persist between runs
//! - **Worker protocol**: commands in, `image-processed`/`error` notifications out
//! - **Parallel compositing**: rows are classified and feathered with rayon
//! - **CLI Integration**: optional command-line interface (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust
//! use chroma_bgremove::{remove_colors_from_image, ColorTarget, EdgeSettings, Rgb, SessionConfig};
//! use image::{DynamicImage, Rgba, RgbaImage};
//!
//! # fn example() -> chroma_bgremove::Result<()> {
//! let mut image = RgbaImage::new(2, 1);
//! image.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
//! image.put_pixel(1, 0, Rgba([0, 255, 0, 255]));
//!
//! let result = remove_colors_from_image(
//!     &DynamicImage::ImageRgba8(image),
//!     &[ColorTarget::exact(Rgb::new(255, 0, 0))],
//!     EdgeSettings::disabled(),
//!     &SessionConfig::default(),
//! )?;
//! assert_eq!(result.mask.to_alpha_bytes(), vec![0, 255]);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```
//!
//! ## Sessions
//!
//! ```rust,no_run
//! use chroma_bgremove::{Rgb, Session, SessionConfig};
//!
//! # fn example() -> chroma_bgremove::Result<()> {
//! let mut session = Session::new(SessionConfig::default())?;
//! session.add_color(Rgb::new(0, 255, 0), 40);
//! let result = session.process_image("greenscreen.jpg", None)?;
//! println!("written to {}", result.output_path.unwrap_or_default().display());
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `cli` (default): command-line interface and subscriber setup
//! - `webp-support` (default): WebP output
//! - `tracing-json`: JSON log lines
//! - `tracing-files`: log to a file instead of stderr
//!
//! ### Library-Only Usage
//!
//! ```toml
//! [dependencies]
//! chroma-bgremove = { version = "0.1", default-features = false }
//! ```

pub mod classifier;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositor;
pub mod config;
pub mod error;
pub mod protocol;
pub mod services;
pub mod session;
pub mod tracing_config;
pub mod types;
pub mod worker;

use tokio::io::AsyncRead;

// Public API exports
pub use classifier::{classify, ChromaKeyClassifier};
pub use compositor::{composite, EdgeAwareCompositor, MarginMap};
pub use config::{OutputFormat, QueuePolicy, SessionConfig, SessionConfigBuilder};
pub use error::{ChromaKeyError, ErrorCategory, Result};
pub use protocol::{Command, CommandMessage, Notification, NotificationMessage, Status};
pub use services::{
    ImageIOService, LogProgressReporter, NoOpProgressReporter, OutputFormatHandler,
    ProcessingStage, ProgressReporter, ProgressTracker, ProgressUpdate,
};
pub use session::{Session, SessionState};
pub use types::{
    AlphaMask, ColorTarget, ColorTargetSet, EdgeSettings, MaskStatistics, ProcessingTimings,
    RemovalResult, Rgb, Tolerance,
};
pub use worker::{ChannelSink, JsonLinesSink, NotificationSink, Worker, WorkerStats};

pub use tracing_config::{events, spans, TracingConfig, TracingFormat, TracingOutput};
#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingGuard};

/// Remove colors from a `DynamicImage` directly
///
/// Runs one classification and compositing pass without touching the file
/// system or any session state. `config` supplies the compositing
/// parameters; its output path and protocol settings are ignored.
///
/// # Examples
///
/// ```rust
/// use chroma_bgremove::{remove_colors_from_image, ColorTarget, EdgeSettings, Rgb, SessionConfig};
/// use image::{DynamicImage, RgbaImage};
///
/// # fn example() -> chroma_bgremove::Result<()> {
/// let image =
///     DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, image::Rgba([0, 200, 0, 255])));
/// let result = remove_colors_from_image(
///     &image,
///     &[ColorTarget::new(Rgb::new(0, 255, 0), 60u8)],
///     EdgeSettings::new(true, 50),
///     &SessionConfig::default(),
/// )?;
/// assert_eq!(result.mask.statistics().removed_pixels, 16);
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
pub fn remove_colors_from_image(
    image: &image::DynamicImage,
    targets: &[ColorTarget],
    edges: EdgeSettings,
    config: &SessionConfig,
) -> Result<RemovalResult> {
    config.validate()?;
    let compositor = EdgeAwareCompositor::from_config(config);
    let mut progress = ProgressTracker::no_op();

    session::render(
        &compositor,
        &mut progress,
        image.to_rgba8(),
        ColorTargetSet::from(targets.to_vec()),
        edges,
        config.clear_removed_rgb,
    )
}

/// Remove colors from an image provided as encoded bytes
///
/// Suitable for uploads and other in-memory sources; any format the
/// `image` crate can sniff is accepted.
///
/// # Examples
///
/// ```rust,no_run
/// use chroma_bgremove::{
///     remove_colors_from_bytes, ColorTarget, EdgeSettings, OutputFormat, Rgb, SessionConfig,
/// };
///
/// # fn example(upload_bytes: Vec<u8>) -> anyhow::Result<()> {
/// let result = remove_colors_from_bytes(
///     &upload_bytes,
///     &[ColorTarget::new(Rgb::new(255, 255, 255), 10u8)],
///     EdgeSettings::new(true, 30),
///     &SessionConfig::default(),
/// )?;
/// let png_bytes = result.to_bytes(OutputFormat::Png)?;
/// # Ok(())
/// # }
/// ```
pub fn remove_colors_from_bytes(
    image_bytes: &[u8],
    targets: &[ColorTarget],
    edges: EdgeSettings,
    config: &SessionConfig,
) -> Result<RemovalResult> {
    let decode_start = instant::Instant::now();
    let image = ImageIOService::load_from_bytes(image_bytes)?;
    let image_decode_ms = decode_start.elapsed().as_millis() as u64;

    let mut result =
        remove_colors_from_image(&image::DynamicImage::ImageRgba8(image), targets, edges, config)?;
    result.timings.image_decode_ms = image_decode_ms;
    result.timings.total_ms += image_decode_ms;
    Ok(result)
}

/// Remove colors from an async reader stream
///
/// The stream is read to the end before decoding.
///
/// ```rust,no_run
/// use chroma_bgremove::{remove_colors_from_reader, ColorTarget, EdgeSettings, Rgb, SessionConfig};
/// use tokio::fs::File;
///
/// # async fn example() -> anyhow::Result<()> {
/// let file = File::open("studio.png").await?;
/// let targets = [ColorTarget::new(Rgb::new(0, 177, 64), 35u8)];
/// let result = remove_colors_from_reader(
///     file,
///     &targets,
///     EdgeSettings::new(true, 60),
///     &SessionConfig::default(),
/// )
/// .await?;
/// result.save_png("studio_no_bg.png")?;
/// # Ok(())
/// # }
/// ```
pub async fn remove_colors_from_reader<R: AsyncRead + Unpin>(
    mut reader: R,
    targets: &[ColorTarget],
    edges: EdgeSettings,
    config: &SessionConfig,
) -> Result<RemovalResult> {
    let mut buffer = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buffer)
        .await
        .map_err(|e| ChromaKeyError::invalid_input(format!("Failed to read from stream: {}", e)))?;

    remove_colors_from_bytes(&buffer, targets, edges, config)
}
