//! Core types for color-keyed background removal

use crate::{
    config::OutputFormat,
    error::{ChromaKeyError, Result},
};
use chrono::{DateTime, Utc};
use image::{ImageBuffer, Luma, RgbaImage};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// An 8-bit RGB color, serialized as `[r, g, b]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "[u8; 3]", into = "[u8; 3]")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Channels in `[r, g, b]` order
    #[must_use]
    pub const fn channels(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    /// Largest per-channel absolute difference (Chebyshev distance)
    #[must_use]
    pub fn chebyshev_distance(self, other: Rgb) -> u8 {
        self.r
            .abs_diff(other.r)
            .max(self.g.abs_diff(other.g))
            .max(self.b.abs_diff(other.b))
    }
}

impl From<[u8; 3]> for Rgb {
    fn from(value: [u8; 3]) -> Self {
        let [r, g, b] = value;
        Self { r, g, b }
    }
}

impl From<Rgb> for [u8; 3] {
    fn from(value: Rgb) -> Self {
        value.channels()
    }
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for Rgb {
    type Err = ChromaKeyError;

    /// Parse `RRGGBB` or `#RRGGBB`
    fn from_str(s: &str) -> Result<Self> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(ChromaKeyError::invalid_config(format!(
                "Color '{}' must be six hex digits (RRGGBB)",
                s
            )));
        }

        let channel = |range: std::ops::Range<usize>| {
            hex.get(range)
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                .ok_or_else(|| {
                    ChromaKeyError::invalid_config(format!("Color '{}' is not valid hex", s))
                })
        };

        Ok(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

/// Maximum per-channel drift still considered a match, clamped to `[0, 255]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub struct Tolerance(u8);

impl Tolerance {
    /// Exact channel equality
    pub const EXACT: Tolerance = Tolerance(0);
    /// Matches every color
    pub const MAX: Tolerance = Tolerance(u8::MAX);

    /// Build a tolerance from any integer, clamping out-of-range input
    #[must_use]
    pub fn clamped(value: i64) -> Self {
        Self(value.clamp(0, i64::from(u8::MAX)) as u8)
    }

    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl From<u8> for Tolerance {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<i32> for Tolerance {
    fn from(value: i32) -> Self {
        Self::clamped(i64::from(value))
    }
}

impl From<i64> for Tolerance {
    fn from(value: i64) -> Self {
        Self::clamped(value)
    }
}

impl From<Tolerance> for i64 {
    fn from(value: Tolerance) -> Self {
        i64::from(value.0)
    }
}

/// A selected reference color and how far pixels may drift from it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorTarget {
    pub rgb: Rgb,
    #[serde(default)]
    pub tolerance: Tolerance,
}

impl ColorTarget {
    #[must_use]
    pub fn new(rgb: Rgb, tolerance: impl Into<Tolerance>) -> Self {
        Self {
            rgb,
            tolerance: tolerance.into(),
        }
    }

    /// Target that only matches its own color
    #[must_use]
    pub fn exact(rgb: Rgb) -> Self {
        Self::new(rgb, Tolerance::EXACT)
    }
}

/// Ordered, index-addressable collection of color targets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColorTargetSet {
    targets: Vec<ColorTarget>,
}

impl ColorTargetSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, target: ColorTarget) {
        self.targets.push(target);
    }

    /// Set the tolerance of one target; returns `false` when `index` is out of range
    pub fn set_tolerance(&mut self, index: usize, tolerance: Tolerance) -> bool {
        match self.targets.get_mut(index) {
            Some(target) => {
                target.tolerance = tolerance;
                true
            },
            None => false,
        }
    }

    /// Set the same tolerance on every target
    pub fn set_all_tolerances(&mut self, tolerance: Tolerance) {
        for target in &mut self.targets {
            target.tolerance = tolerance;
        }
    }

    /// Remove the target at `index`, if present
    pub fn remove(&mut self, index: usize) -> Option<ColorTarget> {
        (index < self.targets.len()).then(|| self.targets.remove(index))
    }

    pub fn clear(&mut self) {
        self.targets.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ColorTarget> {
        self.targets.get(index)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[ColorTarget] {
        &self.targets
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ColorTarget> {
        self.targets.iter()
    }
}

impl From<Vec<ColorTarget>> for ColorTargetSet {
    fn from(targets: Vec<ColorTarget>) -> Self {
        Self { targets }
    }
}

impl FromIterator<ColorTarget> for ColorTargetSet {
    fn from_iter<I: IntoIterator<Item = ColorTarget>>(iter: I) -> Self {
        Self {
            targets: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ColorTargetSet {
    type Item = &'a ColorTarget;
    type IntoIter = std::slice::Iter<'a, ColorTarget>;

    fn into_iter(self) -> Self::IntoIter {
        self.targets.iter()
    }
}

/// Edge feathering settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawEdgeSettings")]
pub struct EdgeSettings {
    pub enabled: bool,
    /// Transition band width, 0 (hard cutout) to 100 (softest)
    pub sensitivity: u8,
}

impl EdgeSettings {
    pub const MAX_SENSITIVITY: u8 = 100;

    /// Build settings, clamping sensitivity to `[0, 100]`
    #[must_use]
    pub fn new(enabled: bool, sensitivity: i64) -> Self {
        Self {
            enabled,
            sensitivity: sensitivity.clamp(0, i64::from(Self::MAX_SENSITIVITY)) as u8,
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::new(false, 50)
    }

    /// Whether a run with these settings produces partial alpha values at all
    #[must_use]
    pub fn feathers(&self) -> bool {
        self.enabled && self.sensitivity > 0
    }
}

impl Default for EdgeSettings {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Wire form of [`EdgeSettings`] before clamping
#[derive(Deserialize)]
struct RawEdgeSettings {
    enabled: bool,
    sensitivity: i64,
}

impl From<RawEdgeSettings> for EdgeSettings {
    fn from(raw: RawEdgeSettings) -> Self {
        Self::new(raw.enabled, raw.sensitivity)
    }
}

/// Per-pixel alpha values in `[0.0, 1.0]`, indexed `[row, column]`
///
/// 0 marks fully removed background, 1 fully kept foreground.
#[derive(Debug, Clone, PartialEq)]
pub struct AlphaMask {
    data: Array2<f32>,
}

impl AlphaMask {
    /// Create a mask from row-major values
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> Result<Self> {
        let data = Array2::from_shape_vec((height as usize, width as usize), values).map_err(|e| {
            ChromaKeyError::internal(format!(
                "Alpha values do not fit a {}x{} mask: {}",
                width, height, e
            ))
        })?;
        Ok(Self { data })
    }

    /// Mask with no pixels
    #[must_use]
    pub fn empty() -> Self {
        Self {
            data: Array2::zeros((0, 0)),
        }
    }

    /// Mask of the given size with every pixel kept
    #[must_use]
    pub fn opaque(width: u32, height: u32) -> Self {
        Self {
            data: Array2::ones((height as usize, width as usize)),
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.data.ncols() as u32
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.data.nrows() as u32
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Alpha at column `x`, row `y`
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        self.data.get((y as usize, x as usize)).copied()
    }

    #[must_use]
    pub fn as_array(&self) -> &Array2<f32> {
        &self.data
    }

    /// Row-major view of the values
    pub fn values(&self) -> impl Iterator<Item = f32> + '_ {
        self.data.iter().copied()
    }

    /// True when every value is exactly 0.0 or 1.0
    #[must_use]
    pub fn is_binary(&self) -> bool {
        self.data.iter().all(|&a| a == 0.0 || a == 1.0)
    }

    /// Quantize to 8-bit alpha, row-major
    #[must_use]
    pub fn to_alpha_bytes(&self) -> Vec<u8> {
        self.data.iter().map(|&a| quantize_alpha(a)).collect()
    }

    /// Render the mask as a grayscale image
    pub fn to_luma_image(&self) -> Result<ImageBuffer<Luma<u8>, Vec<u8>>> {
        let (width, height) = self.dimensions();
        ImageBuffer::from_raw(width, height, self.to_alpha_bytes())
            .ok_or_else(|| ChromaKeyError::processing("Failed to create image from mask data"))
    }

    /// Replace the alpha channel of `image` with this mask
    ///
    /// With `clear_removed_rgb`, fully removed pixels become `[0, 0, 0, 0]`.
    pub fn apply_to_image(&self, image: &mut RgbaImage, clear_removed_rgb: bool) -> Result<()> {
        if image.dimensions() != self.dimensions() {
            return Err(ChromaKeyError::processing_stage_error(
                "alpha application",
                "image and mask dimensions do not match",
                Some(&format!(
                    "image {}x{}, mask {}x{}",
                    image.width(),
                    image.height(),
                    self.width(),
                    self.height()
                )),
            ));
        }

        for (pixel, &alpha) in image.pixels_mut().zip(self.data.iter()) {
            let alpha = quantize_alpha(alpha);
            pixel[3] = alpha;
            if clear_removed_rgb && alpha == 0 {
                pixel.0 = [0, 0, 0, 0];
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn statistics(&self) -> MaskStatistics {
        let total_pixels = self.data.len();
        let removed_pixels = self.data.iter().filter(|&&a| a == 0.0).count();
        let kept_pixels = self.data.iter().filter(|&&a| a == 1.0).count();
        let partial_pixels = total_pixels - removed_pixels - kept_pixels;
        let removed_ratio = if total_pixels == 0 {
            0.0
        } else {
            removed_pixels as f32 / total_pixels as f32
        };

        MaskStatistics {
            total_pixels,
            removed_pixels,
            kept_pixels,
            partial_pixels,
            removed_ratio,
        }
    }

    /// Save mask as grayscale PNG
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.to_luma_image()?
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| output_error("mask saving", path, &e))
    }
}

/// Encode or write failure for an output file
fn output_error(stage: &str, path: &Path, error: &image::ImageError) -> ChromaKeyError {
    ChromaKeyError::processing_stage_error(
        stage,
        &error.to_string(),
        Some(&path.display().to_string()),
    )
}

fn quantize_alpha(alpha: f32) -> u8 {
    (alpha.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Summary of how a mask splits the image
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaskStatistics {
    pub total_pixels: usize,
    pub removed_pixels: usize,
    pub kept_pixels: usize,
    /// Pixels with partial alpha from edge feathering
    pub partial_pixels: usize,
    pub removed_ratio: f32,
}

/// Timing breakdown of a single removal run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    /// Image loading and decoding from file
    pub image_decode_ms: u64,

    /// Per-pixel classification against the color targets
    pub classification_ms: u64,

    /// Boundary detection and alpha feathering
    pub feathering_ms: u64,

    /// Writing the alpha channel into the output buffer
    pub alpha_apply_ms: u64,

    /// Final image encoding (if saving to file)
    pub image_encode_ms: Option<u64>,

    /// Total end-to-end processing time
    pub total_ms: u64,
}

impl ProcessingTimings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Share of the total spent classifying and feathering, in percent
    #[must_use]
    pub fn compute_ratio(&self) -> f64 {
        if self.total_ms == 0 {
            return 0.0;
        }
        (self.classification_ms + self.feathering_ms) as f64 / self.total_ms as f64 * 100.0
    }
}

/// Result of a removal run
#[derive(Debug, Clone)]
pub struct RemovalResult {
    /// Source pixels with the alpha channel replaced by the mask
    pub image: RgbaImage,

    /// Alpha mask produced by the compositor
    pub mask: AlphaMask,

    /// Targets the run was computed against
    pub targets: ColorTargetSet,

    /// Edge settings the run was computed against
    pub edge_settings: EdgeSettings,

    pub timings: ProcessingTimings,

    /// Where the output was written, once saved
    pub output_path: Option<PathBuf>,

    pub completed_at: DateTime<Utc>,
}

impl RemovalResult {
    #[must_use]
    pub fn new(
        image: RgbaImage,
        mask: AlphaMask,
        targets: ColorTargetSet,
        edge_settings: EdgeSettings,
        timings: ProcessingTimings,
    ) -> Self {
        Self {
            image,
            mask,
            targets,
            edge_settings,
            timings,
            output_path: None,
            completed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Get the image as raw RGBA bytes
    #[must_use]
    pub fn to_rgba_bytes(&self) -> Vec<u8> {
        self.image.as_raw().clone()
    }

    /// Encode the image in the specified format
    pub fn to_bytes(&self, format: OutputFormat) -> Result<Vec<u8>> {
        crate::services::OutputFormatHandler::encode(&self.image, format)
    }

    /// Save the result as PNG with alpha channel
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.image
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| output_error("result saving", path, &e))
    }

    /// Get timing summary for display
    #[must_use]
    pub fn timing_summary(&self) -> String {
        let t = &self.timings;
        let mut summary = format!(
            "total {}ms (decode {}ms, classify {}ms, feather {}ms, alpha {}ms",
            t.total_ms, t.image_decode_ms, t.classification_ms, t.feathering_ms, t.alpha_apply_ms
        );
        if let Some(encode_ms) = t.image_encode_ms {
            summary.push_str(&format!(", encode {}ms", encode_ms));
        }
        summary.push(')');
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_parsing() {
        assert_eq!("ff0000".parse::<Rgb>().unwrap(), Rgb::new(255, 0, 0));
        assert_eq!("#00Ff7f".parse::<Rgb>().unwrap(), Rgb::new(0, 255, 127));
        assert!("ff00".parse::<Rgb>().is_err());
        assert!("gg0000".parse::<Rgb>().is_err());
        assert_eq!(Rgb::new(1, 2, 255).to_string(), "#0102ff");
    }

    #[test]
    fn test_chebyshev_distance() {
        let a = Rgb::new(10, 200, 30);
        assert_eq!(a.chebyshev_distance(a), 0);
        assert_eq!(a.chebyshev_distance(Rgb::new(15, 190, 33)), 10);
        assert_eq!(Rgb::new(0, 0, 0).chebyshev_distance(Rgb::new(255, 0, 0)), 255);
    }

    #[test]
    fn test_tolerance_clamping() {
        assert_eq!(Tolerance::clamped(300).value(), 255);
        assert_eq!(Tolerance::clamped(-4).value(), 0);
        assert_eq!(Tolerance::clamped(42).value(), 42);

        let target: ColorTarget =
            serde_json::from_str(r#"{"rgb":[255,0,0],"tolerance":300}"#).unwrap();
        assert_eq!(target.tolerance, Tolerance::MAX);
        assert_eq!(target.rgb, Rgb::new(255, 0, 0));

        let target: ColorTarget = serde_json::from_str(r#"{"rgb":[1,2,3]}"#).unwrap();
        assert_eq!(target.tolerance, Tolerance::EXACT);
    }

    #[test]
    fn test_color_target_serialization() {
        let target = ColorTarget::new(Rgb::new(0, 128, 255), 12u8);
        let json = serde_json::to_value(target).unwrap();
        assert_eq!(json, serde_json::json!({"rgb": [0, 128, 255], "tolerance": 12}));
    }

    #[test]
    fn test_target_set_operations() {
        let mut set = ColorTargetSet::new();
        set.push(ColorTarget::exact(Rgb::new(1, 1, 1)));
        set.push(ColorTarget::exact(Rgb::new(2, 2, 2)));

        assert!(set.set_tolerance(1, Tolerance::clamped(20)));
        assert_eq!(set.get(1).unwrap().tolerance.value(), 20);
        assert!(!set.set_tolerance(5, Tolerance::clamped(20)));
        assert_eq!(set.len(), 2);

        set.set_all_tolerances(Tolerance::clamped(7));
        assert!(set.iter().all(|t| t.tolerance.value() == 7));

        assert!(set.remove(3).is_none());
        assert_eq!(set.remove(0).unwrap().rgb, Rgb::new(1, 1, 1));
        assert_eq!(set.len(), 1);

        set.clear();
        assert!(set.is_empty());
    }

    #[test]
    fn test_edge_settings_clamp() {
        assert_eq!(EdgeSettings::new(true, 250).sensitivity, 100);
        assert_eq!(EdgeSettings::new(true, -3).sensitivity, 0);
        assert!(!EdgeSettings::new(true, 0).feathers());
        assert!(!EdgeSettings::default().enabled);
        assert_eq!(EdgeSettings::default().sensitivity, 50);
    }

    #[test]
    fn test_alpha_mask_shape() {
        let mask = AlphaMask::new(2, 1, vec![0.0, 1.0]).unwrap();
        assert_eq!(mask.dimensions(), (2, 1));
        assert_eq!(mask.get(0, 0), Some(0.0));
        assert_eq!(mask.get(1, 0), Some(1.0));
        assert_eq!(mask.get(2, 0), None);
        assert!(mask.is_binary());
        assert!(AlphaMask::new(2, 2, vec![0.0]).is_err());
        assert!(AlphaMask::empty().is_empty());
    }

    #[test]
    fn test_apply_to_image() {
        let mut image = RgbaImage::from_pixel(2, 1, image::Rgba([10, 20, 30, 255]));
        let mask = AlphaMask::new(2, 1, vec![0.0, 0.5]).unwrap();

        mask.apply_to_image(&mut image, false).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [10, 20, 30, 0]);
        assert_eq!(image.get_pixel(1, 0).0, [10, 20, 30, 128]);

        mask.apply_to_image(&mut image, true).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 0]);

        let wrong = AlphaMask::opaque(3, 3);
        assert!(wrong.apply_to_image(&mut image, false).is_err());
    }

    #[test]
    fn test_mask_statistics() {
        let mask = AlphaMask::new(4, 1, vec![0.0, 0.0, 0.4, 1.0]).unwrap();
        let stats = mask.statistics();
        assert_eq!(stats.total_pixels, 4);
        assert_eq!(stats.removed_pixels, 2);
        assert_eq!(stats.kept_pixels, 1);
        assert_eq!(stats.partial_pixels, 1);
        assert!((stats.removed_ratio - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_edge_settings_deserialization_clamps() {
        let settings: EdgeSettings =
            serde_json::from_str(r#"{"enabled":true,"sensitivity":250}"#).unwrap();
        assert_eq!(settings, EdgeSettings::new(true, 100));

        let settings: EdgeSettings =
            serde_json::from_str(r#"{"enabled":false,"sensitivity":-7}"#).unwrap();
        assert_eq!(settings.sensitivity, 0);
    }

    #[test]
    fn test_save_failures_are_internal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let target = blocker.join("mask.png");

        let err = AlphaMask::opaque(2, 2).save_png(&target).unwrap_err();
        assert!(matches!(err, ChromaKeyError::Processing(_)));
        assert_eq!(err.category(), crate::error::ErrorCategory::Internal);

        let result = RemovalResult::new(
            RgbaImage::new(2, 2),
            AlphaMask::opaque(2, 2),
            ColorTargetSet::new(),
            EdgeSettings::default(),
            ProcessingTimings::new(),
        );
        let err = result.save_png(&target).unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Internal);
    }
}
