//! Chroma-key pixel classification
//!
//! A pixel matches a target when every channel lies within the target's
//! tolerance of the target color (a box in RGB space). A pixel is background
//! when it matches any target.

use crate::types::{ColorTarget, ColorTargetSet, Rgb};

/// Margin reported when there is no target to compare against
///
/// Lower than any real margin, which lies in `[-255, 255]`.
pub const NO_TARGET_MARGIN: i16 = -256;

/// Returns `true` when `pixel` matches any of `targets`
///
/// ```rust
/// use chroma_bgremove::{classify, ColorTarget, Rgb};
///
/// let targets = [ColorTarget::new(Rgb::new(255, 0, 0), 10)];
/// assert!(classify(Rgb::new(250, 5, 3), &targets));
/// assert!(!classify(Rgb::new(0, 255, 0), &targets));
/// ```
#[must_use]
pub fn classify(pixel: Rgb, targets: &[ColorTarget]) -> bool {
    targets.iter().any(|target| matches_target(pixel, target))
}

/// Returns `true` when every channel of `pixel` is within `target.tolerance`
#[must_use]
pub fn matches_target(pixel: Rgb, target: &ColorTarget) -> bool {
    pixel.chebyshev_distance(target.rgb) <= target.tolerance.value()
}

/// Classifier prepared for one run
///
/// Holds the effective tolerance of each target so the per-pixel loop does
/// no clamping or lookups.
#[derive(Debug, Clone)]
pub struct ChromaKeyClassifier {
    targets: Vec<([u8; 3], i16)>,
}

impl ChromaKeyClassifier {
    /// Prepare a classifier with exact matching for zero tolerance
    #[must_use]
    pub fn new(targets: &ColorTargetSet) -> Self {
        Self::with_slack(targets, 0)
    }

    /// Prepare a classifier whose effective tolerance is `max(tolerance, slack)`
    #[must_use]
    pub fn with_slack(targets: &ColorTargetSet, slack: u8) -> Self {
        let targets = targets
            .iter()
            .map(|target| {
                let tolerance = target.tolerance.value().max(slack);
                (target.rgb.channels(), i16::from(tolerance))
            })
            .collect();
        Self { targets }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Signed match margin against the nearest target
    ///
    /// `tolerance - distance` maximized over all targets: non-negative when the
    /// pixel matches, and the further from zero, the deeper inside (or outside)
    /// the matched region the pixel sits.
    #[must_use]
    pub fn margin(&self, pixel: [u8; 3]) -> i16 {
        self.targets
            .iter()
            .map(|(color, tolerance)| {
                let distance = pixel
                    .iter()
                    .zip(color.iter())
                    .map(|(p, c)| p.abs_diff(*c))
                    .max()
                    .unwrap_or(0);
                tolerance - i16::from(distance)
            })
            .max()
            .unwrap_or(NO_TARGET_MARGIN)
    }

    /// Whether the pixel counts as background
    #[must_use]
    pub fn is_background(&self, pixel: Rgb) -> bool {
        self.margin(pixel.channels()) >= 0
    }

    /// Compute margins for one row of RGBA pixels
    ///
    /// `rgba_row` holds 4 bytes per pixel; `margins` receives one value per pixel.
    pub fn classify_row(&self, rgba_row: &[u8], margins: &mut [i16]) {
        for (pixel, margin) in rgba_row.chunks_exact(4).zip(margins.iter_mut()) {
            *margin = match pixel {
                [r, g, b, _] => self.margin([*r, *g, *b]),
                _ => NO_TARGET_MARGIN,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Tolerance;

    fn target(rgb: [u8; 3], tolerance: i64) -> ColorTarget {
        ColorTarget::new(Rgb::from(rgb), Tolerance::clamped(tolerance))
    }

    #[test]
    fn test_exact_match_with_zero_tolerance() {
        for rgb in [[0, 0, 0], [255, 255, 255], [12, 200, 77]] {
            let pixel = Rgb::from(rgb);
            assert!(classify(pixel, &[target(rgb, 0)]));
        }
        assert!(!classify(Rgb::new(12, 200, 78), &[target([12, 200, 77], 0)]));
    }

    #[test]
    fn test_all_channels_must_be_within_tolerance() {
        let t = target([100, 100, 100], 10);
        assert!(matches_target(Rgb::new(110, 90, 105), &t));
        assert!(!matches_target(Rgb::new(111, 100, 100), &t));
        assert!(!matches_target(Rgb::new(100, 100, 89), &t));
    }

    #[test]
    fn test_tolerance_monotonicity() {
        let pixel = Rgb::new(40, 90, 200);
        let mut matched_before = false;
        for tolerance in 0..=255 {
            let matched = classify(pixel, &[target([50, 80, 190], tolerance)]);
            assert!(!matched_before || matched, "tolerance {} lost a match", tolerance);
            matched_before = matched;
        }
        assert!(matched_before);
    }

    #[test]
    fn test_any_target_matches() {
        let targets = [target([255, 0, 0], 0), target([0, 0, 255], 5)];
        assert!(classify(Rgb::new(255, 0, 0), &targets));
        assert!(classify(Rgb::new(3, 2, 250), &targets));
        assert!(!classify(Rgb::new(0, 255, 0), &targets));
    }

    #[test]
    fn test_empty_and_full_tolerance() {
        assert!(!classify(Rgb::new(1, 2, 3), &[]));

        let classifier = ChromaKeyClassifier::new(&ColorTargetSet::new());
        assert!(classifier.is_empty());
        assert_eq!(classifier.margin([1, 2, 3]), NO_TARGET_MARGIN);

        let everything = [target([0, 0, 0], 255)];
        assert!(classify(Rgb::new(255, 255, 255), &everything));
    }

    #[test]
    fn test_margin_uses_nearest_target() {
        let set = ColorTargetSet::from(vec![target([0, 0, 0], 10), target([200, 200, 200], 4)]);
        let classifier = ChromaKeyClassifier::new(&set);

        assert_eq!(classifier.margin([0, 0, 0]), 10);
        assert_eq!(classifier.margin([5, 0, 0]), 5);
        assert_eq!(classifier.margin([198, 200, 200]), 2);
        assert_eq!(classifier.margin([100, 100, 100]), -90);
        assert!(classifier.is_background(Rgb::new(10, 10, 10)));
        assert!(!classifier.is_background(Rgb::new(11, 10, 10)));
    }

    #[test]
    fn test_slack_raises_zero_tolerance() {
        let set = ColorTargetSet::from(vec![target([50, 50, 50], 0)]);
        let strict = ChromaKeyClassifier::new(&set);
        let relaxed = ChromaKeyClassifier::with_slack(&set, 2);

        assert!(!strict.is_background(Rgb::new(52, 50, 50)));
        assert!(relaxed.is_background(Rgb::new(52, 50, 50)));
        assert!(!relaxed.is_background(Rgb::new(53, 50, 50)));
    }

    #[test]
    fn test_classify_row() {
        let set = ColorTargetSet::from(vec![target([255, 0, 0], 10)]);
        let classifier = ChromaKeyClassifier::new(&set);
        let row = [255, 0, 0, 255, 0, 255, 0, 255];
        let mut margins = [0i16; 2];

        classifier.classify_row(&row, &mut margins);
        assert_eq!(margins, [10, -245]);
    }
}
