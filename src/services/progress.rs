//! Progress reporting for removal runs
//!
//! A run walks through a fixed sequence of [`ProcessingStage`]s. The session
//! drives a [`ProgressTracker`], which stamps each stage with the time elapsed
//! since the run began and hands it to a pluggable [`ProgressReporter`].

use crate::types::ProcessingTimings;
use instant::Instant;

/// Stages of a removal run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProcessingStage {
    ImageLoading,
    Classification,
    EdgeFeathering,
    AlphaApplication,
    FileSaving,
    Completed,
}

impl ProcessingStage {
    /// Every stage, in execution order
    pub const ALL: [ProcessingStage; 6] = [
        Self::ImageLoading,
        Self::Classification,
        Self::EdgeFeathering,
        Self::AlphaApplication,
        Self::FileSaving,
        Self::Completed,
    ];

    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::ImageLoading => "Decoding source image",
            Self::Classification => "Matching pixels against color targets",
            Self::EdgeFeathering => "Feathering edges",
            Self::AlphaApplication => "Writing alpha channel",
            Self::FileSaving => "Writing output slot",
            Self::Completed => "Run complete",
        }
    }

    /// Share of a typical run finished once this stage starts (0-100)
    ///
    /// Loading and encoding dominate small images, so they get wide slices.
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            Self::ImageLoading => 0,
            Self::Classification => 30,
            Self::EdgeFeathering => 55,
            Self::AlphaApplication => 70,
            Self::FileSaving => 80,
            Self::Completed => 100,
        }
    }
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// A stage transition as seen by reporters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub stage: ProcessingStage,
    pub progress: u8,
    /// Milliseconds since the run started
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new(stage: ProcessingStage, run_started: Instant) -> Self {
        Self {
            stage,
            progress: stage.progress_percentage(),
            elapsed_ms: run_started.elapsed().as_millis() as u64,
        }
    }
}

/// Receiver of run progress; must be shareable with the worker's blocking thread
pub trait ProgressReporter: Send + Sync {
    fn report_progress(&self, update: ProgressUpdate);

    fn report_completion(&self, timings: &ProcessingTimings);

    /// `stage` is the last stage entered before the failure
    fn report_error(&self, stage: ProcessingStage, error: &str);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _timings: &ProcessingTimings) {}

    fn report_error(&self, _stage: ProcessingStage, _error: &str) {}
}

/// Forwards progress to the `log` facade
///
/// Stage transitions are debug-level so a serving worker stays quiet under
/// the default filter.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgressReporter {
    verbose: bool,
}

impl LogProgressReporter {
    /// With `verbose`, completions include the per-phase breakdown
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for LogProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        log::debug!(
            "{:>3}% {} (+{}ms)",
            update.progress,
            update.stage,
            update.elapsed_ms
        );
    }

    fn report_completion(&self, timings: &ProcessingTimings) {
        if self.verbose {
            log::info!(
                "Run finished in {}ms: decode {}ms, classify {}ms, feather {}ms, alpha {}ms, encode {}",
                timings.total_ms,
                timings.image_decode_ms,
                timings.classification_ms,
                timings.feathering_ms,
                timings.alpha_apply_ms,
                timings
                    .image_encode_ms
                    .map_or_else(|| "-".to_string(), |ms| format!("{}ms", ms))
            );
        } else {
            log::info!("Run finished in {}ms", timings.total_ms);
        }
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        log::error!("Run failed while {}: {}", stage.description().to_lowercase(), error);
    }
}

/// Per-session progress state: the run clock and the stage last entered
pub struct ProgressTracker {
    reporter: Box<dyn ProgressReporter>,
    run_started: Instant,
    current_stage: Option<ProcessingStage>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(reporter: Box<dyn ProgressReporter>) -> Self {
        Self {
            reporter,
            run_started: Instant::now(),
            current_stage: None,
        }
    }

    #[must_use]
    pub fn no_op() -> Self {
        Self::new(Box::new(NoOpProgressReporter))
    }

    #[must_use]
    pub fn logging(verbose: bool) -> Self {
        Self::new(Box::new(LogProgressReporter::new(verbose)))
    }

    pub fn report_stage(&mut self, stage: ProcessingStage) {
        self.current_stage = Some(stage);
        self.reporter
            .report_progress(ProgressUpdate::new(stage, self.run_started));
    }

    pub fn report_completion(&mut self, timings: &ProcessingTimings) {
        self.current_stage = Some(ProcessingStage::Completed);
        self.reporter.report_completion(timings);
    }

    /// Attribute a failure to the stage last entered
    pub fn report_error(&self, error: &str) {
        let stage = self.current_stage.unwrap_or(ProcessingStage::ImageLoading);
        self.reporter.report_error(stage, error);
    }

    /// Reset the clock and stage for a new run
    pub fn restart(&mut self) {
        self.run_started = Instant::now();
        self.current_stage = None;
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.run_started.elapsed().as_millis() as u64
    }

    #[must_use]
    pub fn current_stage(&self) -> Option<ProcessingStage> {
        self.current_stage
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("current_stage", &self.current_stage)
            .field("elapsed_ms", &self.elapsed_ms())
            .finish_non_exhaustive()
    }
}
