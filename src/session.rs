//! The long-lived background removal session
//!
//! A [`Session`] owns the color target set and edge settings for the lifetime
//! of the engine. State-changing commands mutate it in place; a run reads it,
//! loads a fresh source image, and writes the result to the fixed output slot.

use crate::{
    compositor::EdgeAwareCompositor,
    config::SessionConfig,
    error::{ChromaKeyError, Result},
    protocol::{Command, Notification},
    services::{ImageIOService, ProcessingStage, ProgressReporter, ProgressTracker},
    tracing_config::{events, spans},
    types::{
        ColorTarget, ColorTargetSet, EdgeSettings, ProcessingTimings, RemovalResult, Rgb,
        Tolerance,
    },
};
use image::RgbaImage;
use instant::Instant;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Whether a run is in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Processing,
}

/// Stateful removal engine, single writer for its targets and settings
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    compositor: EdgeAwareCompositor,
    targets: ColorTargetSet,
    edge_settings: EdgeSettings,
    state: SessionState,
    output_path: PathBuf,
    last_input_path: Option<PathBuf>,
    last_output_path: Option<PathBuf>,
    progress: ProgressTracker,
}

impl Session {
    /// Create a session, validating the configuration
    ///
    /// A relative output path is resolved against the current directory so
    /// notifications always carry an absolute path.
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;

        let output_path = if config.output_path.is_absolute() {
            config.output_path.clone()
        } else {
            std::env::current_dir()
                .map_err(|e| ChromaKeyError::file_io_error("resolve working directory", ".", &e))?
                .join(&config.output_path)
        };

        Ok(Self {
            compositor: EdgeAwareCompositor::from_config(&config),
            targets: ColorTargetSet::new(),
            edge_settings: config.initial_edge_settings,
            state: SessionState::Idle,
            output_path,
            last_input_path: None,
            last_output_path: None,
            progress: ProgressTracker::no_op(),
            config,
        })
    }

    /// Route run progress to `reporter`
    #[must_use]
    pub fn with_progress_reporter(mut self, reporter: Box<dyn ProgressReporter>) -> Self {
        self.progress = ProgressTracker::new(reporter);
        self
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn targets(&self) -> &ColorTargetSet {
        &self.targets
    }

    #[must_use]
    pub fn edge_settings(&self) -> EdgeSettings {
        self.edge_settings
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Absolute location every run writes to
    #[must_use]
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Output of the most recent successful run
    #[must_use]
    pub fn last_output_path(&self) -> Option<&Path> {
        self.last_output_path.as_deref()
    }

    /// Input of the most recent successful run
    #[must_use]
    pub fn last_input_path(&self) -> Option<&Path> {
        self.last_input_path.as_deref()
    }

    /// Append a target
    pub fn add_color(&mut self, rgb: Rgb, tolerance: impl Into<Tolerance>) {
        let target = ColorTarget::new(rgb, tolerance);
        debug!(color = %rgb, tolerance = target.tolerance.value(), "Adding color target");
        self.targets.push(target);
    }

    /// Set the tolerance of the target at `index`, or of every target when `None`
    ///
    /// An index outside the current list is ignored and reported as `false`;
    /// the shell may briefly hold a longer list than the engine.
    pub fn set_tolerance(&mut self, index: Option<usize>, tolerance: impl Into<Tolerance>) -> bool {
        let tolerance = tolerance.into();
        match index {
            Some(index) => {
                let updated = self.targets.set_tolerance(index, tolerance);
                if !updated {
                    warn!(
                        index = index,
                        targets = self.targets.len(),
                        "Ignoring tolerance update for missing color target"
                    );
                }
                updated
            },
            None => {
                self.targets.set_all_tolerances(tolerance);
                true
            },
        }
    }

    /// Remove the target at `index`; out-of-range indices are ignored
    pub fn remove_color(&mut self, index: usize) -> Option<ColorTarget> {
        let removed = self.targets.remove(index);
        if removed.is_none() {
            warn!(
                index = index,
                targets = self.targets.len(),
                "Ignoring removal of missing color target"
            );
        }
        removed
    }

    /// Replace the edge settings
    pub fn update_edge_settings(&mut self, settings: EdgeSettings) {
        debug!(
            enabled = settings.enabled,
            sensitivity = settings.sensitivity,
            "Updating edge settings"
        );
        self.edge_settings = settings;
    }

    /// Empty the target set; edge settings are kept
    pub fn clear_colors(&mut self) {
        debug!(cleared = self.targets.len(), "Clearing color targets");
        self.targets.clear();
    }

    /// Load `path`, remove matching pixels and write the output slot
    ///
    /// When `colors` is given it replaces the target set, but only once the
    /// run has succeeded; a failed run leaves the session unchanged.
    pub fn process_image<P: AsRef<Path>>(
        &mut self,
        path: P,
        colors: Option<Vec<ColorTarget>>,
    ) -> Result<RemovalResult> {
        let path = path.as_ref();
        let overrides = colors.is_some();
        let run_targets = colors.map_or_else(|| self.targets.clone(), ColorTargetSet::from);

        let span = spans::removal_run(path, run_targets.len(), self.edge_settings.feathers());
        let _enter = span.enter();

        self.state = SessionState::Processing;
        self.progress.restart();
        let outcome = self.run_to_output(path, run_targets);
        self.state = SessionState::Idle;

        match outcome {
            Ok(result) => {
                if overrides {
                    self.targets = result.targets.clone();
                }
                self.last_input_path = Some(path.to_path_buf());
                self.last_output_path = result.output_path.clone();
                Ok(result)
            },
            Err(e) => {
                self.progress.report_error(&e.to_string());
                Err(e)
            },
        }
    }

    /// Rerun the last successfully processed input, if any
    pub fn reprocess(&mut self) -> Option<Result<RemovalResult>> {
        let input = self.last_input_path.clone()?;
        Some(self.process_image(input, None))
    }

    /// Return to `Idle` after a run was interrupted by a panic
    pub fn recover(&mut self) {
        if self.state == SessionState::Processing {
            warn!("Recovering session after an interrupted run");
            self.state = SessionState::Idle;
        }
    }

    /// Apply one protocol command and collect the notifications it produces
    pub fn handle(&mut self, command: Command) -> Vec<Notification> {
        let mut notifications = Vec::new();

        let succeeded = match &command {
            Command::ProcessImage { path, colors } => {
                let outcome = self.process_image(path, colors.clone());
                let ok = outcome.is_ok();
                notifications.push(self.notification_for(outcome));
                ok
            },
            Command::ClearColors => {
                self.clear_colors();
                self.auto_reprocess(true, &mut notifications);
                true
            },
            Command::UpdateTolerance { index, tolerance } => {
                let changed = match index.map(usize::try_from) {
                    None => self.set_tolerance(None, *tolerance),
                    Some(Ok(index)) => self.set_tolerance(Some(index), *tolerance),
                    Some(Err(_)) => {
                        warn!(index = ?index, "Ignoring tolerance update for negative index");
                        false
                    },
                };
                self.auto_reprocess(changed, &mut notifications);
                true
            },
            Command::UpdateEdgeSettings { .. } => {
                if let Some(settings) = command.edge_settings() {
                    self.update_edge_settings(settings);
                }
                self.auto_reprocess(true, &mut notifications);
                true
            },
            Command::AddColor { color, tolerance } => {
                self.add_color(*color, *tolerance);
                self.auto_reprocess(true, &mut notifications);
                true
            },
            Command::RemoveColor { index } => {
                let removed = usize::try_from(*index)
                    .ok()
                    .and_then(|index| self.remove_color(index))
                    .is_some();
                self.auto_reprocess(removed, &mut notifications);
                true
            },
        };

        if succeeded && self.config.acknowledge_commands {
            notifications.push(Notification::ack(&command));
        }
        notifications
    }

    fn auto_reprocess(&mut self, changed: bool, notifications: &mut Vec<Notification>) {
        if !(changed && self.config.auto_reprocess) {
            return;
        }
        if let Some(outcome) = self.reprocess() {
            notifications.push(self.notification_for(outcome));
        }
    }

    fn notification_for(&self, outcome: Result<RemovalResult>) -> Notification {
        match outcome {
            Ok(result) => Notification::image_processed(
                result.output_path.as_deref().unwrap_or(&self.output_path),
            ),
            Err(e) => {
                events::error_with_context(&e, "removal run");
                Notification::error(&e)
            },
        }
    }

    fn run_to_output(&mut self, path: &Path, targets: ColorTargetSet) -> Result<RemovalResult> {
        let started = Instant::now();

        self.progress.report_stage(ProcessingStage::ImageLoading);
        let decode_start = Instant::now();
        let image = ImageIOService::load_rgba(path)?;
        let image_decode_ms = elapsed_ms(decode_start);

        let mut result = render(
            &self.compositor,
            &mut self.progress,
            image,
            targets,
            self.edge_settings,
            self.config.clear_removed_rgb,
        )?;

        self.progress.report_stage(ProcessingStage::FileSaving);
        let encode_start = Instant::now();
        ImageIOService::save_image(&result.image, &self.output_path, self.config.output_format)?;

        result.timings.image_decode_ms = image_decode_ms;
        result.timings.image_encode_ms = Some(elapsed_ms(encode_start));
        result.timings.total_ms = elapsed_ms(started);
        result.output_path = Some(self.output_path.clone());

        self.progress.report_completion(&result.timings);
        events::run_completed(
            &self.output_path,
            result.timings.total_ms,
            result.mask.statistics().removed_ratio,
        );
        Ok(result)
    }
}

/// Classify, feather and apply the mask to an already decoded image
pub(crate) fn render(
    compositor: &EdgeAwareCompositor,
    progress: &mut ProgressTracker,
    mut image: RgbaImage,
    targets: ColorTargetSet,
    edges: EdgeSettings,
    clear_removed_rgb: bool,
) -> Result<RemovalResult> {
    let started = Instant::now();
    let span = spans::compositing(image.dimensions(), compositor.feather_band(edges));
    let _enter = span.enter();

    progress.report_stage(ProcessingStage::Classification);
    let classify_start = Instant::now();
    let margins = compositor.classify(&image, &targets)?;
    let classification_ms = elapsed_ms(classify_start);

    progress.report_stage(ProcessingStage::EdgeFeathering);
    let feather_start = Instant::now();
    let mask = compositor.feather(&margins, edges)?;
    let feathering_ms = elapsed_ms(feather_start);

    progress.report_stage(ProcessingStage::AlphaApplication);
    let apply_start = Instant::now();
    mask.apply_to_image(&mut image, clear_removed_rgb)?;
    let alpha_apply_ms = elapsed_ms(apply_start);

    let timings = ProcessingTimings {
        classification_ms,
        feathering_ms,
        alpha_apply_ms,
        total_ms: elapsed_ms(started),
        ..ProcessingTimings::default()
    };
    events::performance_metric("compositing", timings.total_ms);
    info!(
        width = image.width(),
        height = image.height(),
        targets = targets.len(),
        "Composited alpha mask"
    );

    Ok(RemovalResult::new(image, mask, targets, edges, timings))
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use tempfile::TempDir;

    fn session_in(dir: &TempDir) -> Session {
        let config = SessionConfig::builder()
            .output_path(dir.path().join("temp").join("processed_image.png"))
            .parallel(false)
            .build()
            .unwrap();
        Session::new(config).unwrap()
    }

    fn write_red_green(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("input.png");
        let mut image = RgbaImage::new(2, 1);
        image.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        image.put_pixel(1, 0, image::Rgba([0, 255, 0, 255]));
        image.save(&path).unwrap();
        path
    }

    #[test]
    fn test_new_session_is_idle_and_empty() {
        let dir = TempDir::new().unwrap();
        let session = session_in(&dir);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.targets().is_empty());
        assert_eq!(session.edge_settings(), EdgeSettings::default());
        assert!(session.output_path().is_absolute());
        assert!(session.last_output_path().is_none());
    }

    #[test]
    fn test_relative_output_path_is_resolved() {
        let session = Session::new(SessionConfig::default()).unwrap();
        assert!(session.output_path().is_absolute());
        assert!(session.output_path().ends_with("temp/processed_image.png"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = SessionConfig {
            edge_window_radius: 0,
            ..SessionConfig::default()
        };
        let err = Session::new(config).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Config);
    }

    #[test]
    fn test_target_mutations() {
        let dir = TempDir::new().unwrap();
        let mut session = session_in(&dir);

        session.add_color(Rgb::new(255, 0, 0), 0);
        session.add_color(Rgb::new(0, 0, 255), 500);
        assert_eq!(session.targets().get(1).unwrap().tolerance, Tolerance::MAX);

        assert!(session.set_tolerance(Some(0), 12));
        assert_eq!(session.targets().get(0).unwrap().tolerance.value(), 12);

        let before = session.targets().clone();
        assert!(!session.set_tolerance(Some(7), 99));
        assert_eq!(session.targets(), &before);

        assert!(session.set_tolerance(None, 30));
        assert!(session.targets().iter().all(|t| t.tolerance.value() == 30));

        assert!(session.remove_color(5).is_none());
        assert_eq!(session.remove_color(0).unwrap().rgb, Rgb::new(255, 0, 0));
        assert_eq!(session.targets().len(), 1);

        session.update_edge_settings(EdgeSettings::new(true, 70));
        session.clear_colors();
        assert!(session.targets().is_empty());
        assert_eq!(session.edge_settings(), EdgeSettings::new(true, 70));
    }

    #[test]
    fn test_process_image_writes_output() {
        let dir = TempDir::new().unwrap();
        let input = write_red_green(&dir);
        let mut session = session_in(&dir);
        session.add_color(Rgb::new(255, 0, 0), 10);

        let result = session.process_image(&input, None).unwrap();
        assert_eq!(result.mask.values().collect::<Vec<_>>(), vec![0.0, 1.0]);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.last_input_path(), Some(input.as_path()));

        let output = session.last_output_path().unwrap();
        assert_eq!(output, session.output_path());
        let written = image::open(output).unwrap().to_rgba8();
        assert_eq!(written.get_pixel(0, 0)[3], 0);
        assert_eq!(written.get_pixel(1, 0).0, [0, 255, 0, 255]);
        assert!(result.timings.image_encode_ms.is_some());
    }

    #[test]
    fn test_override_commits_only_on_success() {
        let dir = TempDir::new().unwrap();
        let input = write_red_green(&dir);
        let mut session = session_in(&dir);
        session.add_color(Rgb::new(0, 0, 255), 0);
        let original = session.targets().clone();

        let missing = dir.path().join("missing.png");
        let err = session
            .process_image(&missing, Some(vec![ColorTarget::new(Rgb::new(255, 0, 0), 10)]))
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Input);
        assert_eq!(session.targets(), &original);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.last_input_path().is_none());

        let overrides = vec![ColorTarget::new(Rgb::new(255, 0, 0), 10)];
        session.process_image(&input, Some(overrides.clone())).unwrap();
        assert_eq!(session.targets().as_slice(), overrides.as_slice());
    }

    #[test]
    fn test_handle_out_of_range_tolerance_is_silent() {
        let dir = TempDir::new().unwrap();
        let mut session = session_in(&dir);
        session.add_color(Rgb::new(1, 2, 3), 4);
        let before = session.targets().clone();

        for index in [1, 99, -1] {
            let notifications = session.handle(Command::UpdateTolerance {
                index: Some(index),
                tolerance: Tolerance::from(50u8),
            });
            assert!(notifications.is_empty());
            assert_eq!(session.targets(), &before);
        }
    }

    #[test]
    fn test_handle_acknowledges_when_configured() {
        let dir = TempDir::new().unwrap();
        let config = SessionConfig::builder()
            .output_path(dir.path().join("out.png"))
            .acknowledge_commands(true)
            .build()
            .unwrap();
        let mut session = Session::new(config).unwrap();

        let notifications = session.handle(Command::ClearColors);
        assert_eq!(
            notifications,
            vec![Notification::Ack {
                command: "clear-colors".to_string()
            }]
        );

        let notifications = session.handle(Command::ProcessImage {
            path: dir.path().join("nope.png"),
            colors: None,
        });
        assert_eq!(notifications.len(), 1);
        assert!(notifications[0].is_error());
    }

    #[test]
    fn test_auto_reprocess_after_mutation() {
        let dir = TempDir::new().unwrap();
        let input = write_red_green(&dir);
        let config = SessionConfig::builder()
            .output_path(dir.path().join("out.png"))
            .auto_reprocess(true)
            .build()
            .unwrap();
        let mut session = Session::new(config).unwrap();

        // Nothing loaded yet, so nothing to rerun.
        assert!(session
            .handle(Command::AddColor {
                color: Rgb::new(255, 0, 0),
                tolerance: Tolerance::EXACT,
            })
            .is_empty());

        let notifications = session.handle(Command::ProcessImage {
            path: input,
            colors: None,
        });
        assert!(matches!(notifications[..], [Notification::ImageProcessed { .. }]));

        let notifications = session.handle(Command::ClearColors);
        assert!(matches!(notifications[..], [Notification::ImageProcessed { .. }]));
        let written = image::open(dir.path().join("out.png")).unwrap().to_rgba8();
        assert!(written.pixels().all(|p| p[3] == 255));

        // Out-of-range index changes nothing and triggers no run.
        assert!(session
            .handle(Command::RemoveColor { index: 3 })
            .is_empty());
    }

    #[test]
    fn test_recover_resets_processing_state() {
        let dir = TempDir::new().unwrap();
        let mut session = session_in(&dir);
        session.state = SessionState::Processing;
        session.recover();
        assert_eq!(session.state(), SessionState::Idle);
    }
}
