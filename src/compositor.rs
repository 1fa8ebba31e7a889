//! Edge-aware alpha compositing
//!
//! Turns the classifier's per-pixel verdicts into a continuous alpha mask.
//! The work is split in two passes so each can run row-parallel:
//!
//! 1. **Classification** computes a signed match margin for every pixel
//!    ([`MarginMap`]). A non-negative margin marks background.
//! 2. **Feathering** writes alpha. Interior pixels keep their binary value;
//!    pixels with an opposite-class neighbor inside the edge window get a
//!    smoothstep of their margin, with the band width scaled by sensitivity.
//!
//! The second pass only reads the finished margin map, so rows can be
//! processed independently without halo exchange.

use crate::{
    classifier::{ChromaKeyClassifier, NO_TARGET_MARGIN},
    config::SessionConfig,
    error::{ChromaKeyError, Result},
    types::{AlphaMask, ColorTargetSet, EdgeSettings},
};
use image::RgbaImage;
use rayon::prelude::*;

/// Signed match margins for a whole image, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarginMap {
    width: usize,
    height: usize,
    margins: Vec<i16>,
}

impl MarginMap {
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width as u32, self.height as u32)
    }

    /// Margin at column `x`, row `y`
    #[must_use]
    pub fn margin(&self, x: u32, y: u32) -> Option<i16> {
        if x as usize >= self.width {
            return None;
        }
        self.margins
            .get(y as usize * self.width + x as usize)
            .copied()
    }

    /// Number of pixels classified as background
    #[must_use]
    pub fn background_count(&self) -> usize {
        self.margins.iter().filter(|&&m| m >= 0).count()
    }

    fn row(&self, y: usize) -> &[i16] {
        let start = y * self.width;
        self.margins.get(start..start + self.width).unwrap_or(&[])
    }

    /// Whether a pixel of the opposite class lies within `radius` of `(x, y)`
    fn is_boundary(&self, x: usize, y: usize, background: bool, radius: usize) -> bool {
        let x0 = x.saturating_sub(radius);
        let x1 = (x + radius).min(self.width - 1);
        let y0 = y.saturating_sub(radius);
        let y1 = (y + radius).min(self.height - 1);

        (y0..=y1).any(|ny| {
            self.row(ny)
                .get(x0..=x1)
                .is_some_and(|window| window.iter().any(|&m| (m >= 0) != background))
        })
    }
}

/// Compositor producing alpha masks from color targets and edge settings
#[derive(Debug, Clone)]
pub struct EdgeAwareCompositor {
    window_radius: u32,
    max_feather_band: f32,
    exact_match_slack: u8,
    parallel: bool,
}

impl Default for EdgeAwareCompositor {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

impl EdgeAwareCompositor {
    /// Build a compositor from the session configuration
    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            window_radius: config.edge_window_radius,
            max_feather_band: config.max_feather_band,
            exact_match_slack: config.exact_match_slack,
            parallel: config.parallel,
        }
    }

    /// Disable or enable row parallelism
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Band half-width, in channel units, for the given settings
    #[must_use]
    pub fn feather_band(&self, edges: EdgeSettings) -> f32 {
        if !edges.feathers() {
            return 0.0;
        }
        self.max_feather_band * f32::from(edges.sensitivity)
            / f32::from(EdgeSettings::MAX_SENSITIVITY)
    }

    /// Classify then feather a whole image
    pub fn composite(
        &self,
        image: &RgbaImage,
        targets: &ColorTargetSet,
        edges: EdgeSettings,
    ) -> Result<AlphaMask> {
        let margins = self.classify(image, targets)?;
        self.feather(&margins, edges)
    }

    /// Compute the margin of every pixel against the nearest target
    pub fn classify(&self, image: &RgbaImage, targets: &ColorTargetSet) -> Result<MarginMap> {
        let width = image.width() as usize;
        let height = image.height() as usize;
        let pixel_count = checked_pixel_count(width, height)?;
        let mut margins = try_allocate(pixel_count, NO_TARGET_MARGIN)?;

        if pixel_count == 0 || targets.is_empty() {
            return Ok(MarginMap {
                width,
                height,
                margins,
            });
        }

        let classifier = ChromaKeyClassifier::with_slack(targets, self.exact_match_slack);
        let pixels = image.as_raw().as_slice();
        let rgba_row_len = width * 4;

        if self.parallel {
            margins
                .par_chunks_mut(width)
                .zip(pixels.par_chunks(rgba_row_len))
                .for_each(|(row_margins, row)| classifier.classify_row(row, row_margins));
        } else {
            for (row_margins, row) in margins.chunks_mut(width).zip(pixels.chunks(rgba_row_len)) {
                classifier.classify_row(row, row_margins);
            }
        }

        Ok(MarginMap {
            width,
            height,
            margins,
        })
    }

    /// Turn margins into alpha values
    pub fn feather(&self, margins: &MarginMap, edges: EdgeSettings) -> Result<AlphaMask> {
        let (width, height) = (margins.width, margins.height);
        let mut alpha = try_allocate(margins.margins.len(), 1.0f32)?;

        if alpha.is_empty() {
            return AlphaMask::new(width as u32, height as u32, alpha);
        }

        let band = self.feather_band(edges);
        let radius = self.window_radius as usize;
        let fill_row = |y: usize, row_alpha: &mut [f32]| {
            for (x, (value, &margin)) in row_alpha.iter_mut().zip(margins.row(y)).enumerate() {
                let background = margin >= 0;
                *value = if band > 0.0 && margins.is_boundary(x, y, background, radius) {
                    feathered_alpha(margin, band)
                } else {
                    binary_alpha(background)
                };
            }
        };

        if self.parallel {
            alpha
                .par_chunks_mut(width)
                .enumerate()
                .for_each(|(y, row_alpha)| fill_row(y, row_alpha));
        } else {
            for (y, row_alpha) in alpha.chunks_mut(width).enumerate() {
                fill_row(y, row_alpha);
            }
        }

        AlphaMask::new(width as u32, height as u32, alpha)
    }
}

/// Classify and feather with default compositor settings
pub fn composite(
    image: &RgbaImage,
    targets: &ColorTargetSet,
    edges: EdgeSettings,
) -> Result<AlphaMask> {
    EdgeAwareCompositor::default().composite(image, targets, edges)
}

fn binary_alpha(background: bool) -> f32 {
    if background {
        0.0
    } else {
        1.0
    }
}

/// Smoothstep of the margin across a band of half-width `band`
///
/// The midpoint sits half a level below zero, between the last matching and
/// the first non-matching integer margin.
fn feathered_alpha(margin: i16, band: f32) -> f32 {
    let s = f32::from(margin) + 0.5;
    let x = ((band - s) / (2.0 * band)).clamp(0.0, 1.0);
    (x * x * (3.0 - 2.0 * x)).clamp(0.0, 1.0)
}

fn checked_pixel_count(width: usize, height: usize) -> Result<usize> {
    width.checked_mul(height).ok_or_else(|| {
        ChromaKeyError::internal(format!("Image of {}x{} pixels is too large", width, height))
    })
}

fn try_allocate<T: Clone>(len: usize, fill: T) -> Result<Vec<T>> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(len).map_err(|e| {
        ChromaKeyError::internal(format!("Failed to allocate buffer for {} pixels: {}", len, e))
    })?;
    buffer.resize(len, fill);
    Ok(buffer)
}
