//! Structured logging setup and shared span/event helpers
//!
//! Library code only emits events; binaries install the subscriber through
//! [`TracingConfig::init`]. Stdout carries protocol notifications, so console
//! output is always written to stderr.

#[cfg(feature = "cli")]
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Line format of emitted log records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingFormat {
    /// Colored, human-oriented
    #[default]
    Console,
    /// Plain text for pipes and CI logs
    Compact,
    /// One JSON object per record, with span context
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Where log records go
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TracingOutput {
    #[default]
    Stderr,
    /// Append to a file through a background writer
    #[cfg(feature = "tracing-files")]
    File(std::path::PathBuf),
}

/// Subscriber settings
#[derive(Debug, Default)]
pub struct TracingConfig {
    /// Number of `-v` flags
    pub verbosity: u8,
    pub format: TracingFormat,
    pub output: TracingOutput,
    /// Explicit filter directives; when unset `RUST_LOG` is consulted before verbosity
    pub env_filter: Option<String>,
    /// Logged once at startup to correlate records from one engine process
    pub session_id: Option<String>,
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, directives: S) -> Self {
        self.env_filter = Some(directives.into());
        self
    }

    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Level implied by the verbosity count
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    #[cfg(feature = "cli")]
    fn build_filter(&self) -> anyhow::Result<EnvFilter> {
        if let Some(directives) = &self.env_filter {
            return Ok(EnvFilter::try_new(directives)?);
        }
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => Ok(EnvFilter::try_new(self.verbosity_to_filter())?),
        }
    }

    /// Install the global subscriber
    ///
    /// The returned guard must outlive all logging when writing to a file.
    #[cfg(feature = "cli")]
    pub fn init(self) -> anyhow::Result<Option<TracingGuard>> {
        let filter = self.build_filter()?;
        let (layer, guard) = self.output_layer();
        Registry::default().with(layer).with(filter).try_init()?;

        if let Some(session_id) = &self.session_id {
            tracing::info!(session_id = %session_id, "Background removal engine started");
        }
        Ok(guard)
    }

    #[cfg(feature = "cli")]
    fn output_layer(&self) -> (BoxedLayer, Option<TracingGuard>) {
        match &self.output {
            TracingOutput::Stderr => (format_layer(self.format, std::io::stderr, true), None),
            #[cfg(feature = "tracing-files")]
            TracingOutput::File(path) => {
                let directory = path
                    .parent()
                    .filter(|dir| !dir.as_os_str().is_empty())
                    .unwrap_or_else(|| std::path::Path::new("."));
                let file_name = path
                    .file_name()
                    .unwrap_or_else(|| std::ffi::OsStr::new("chroma-bgremove.log"));
                let (writer, file_guard) = tracing_appender::non_blocking(
                    tracing_appender::rolling::never(directory, file_name),
                );
                (
                    format_layer(self.format, writer, false),
                    Some(TracingGuard { _file: file_guard }),
                )
            },
        }
    }
}

#[cfg(feature = "cli")]
type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[cfg(feature = "cli")]
fn format_layer<W>(format: TracingFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        TracingFormat::Console => fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(false)
            .compact()
            .boxed(),
        TracingFormat::Compact => fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false)
            .compact()
            .boxed(),
        #[cfg(feature = "tracing-json")]
        TracingFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
    }
}

/// Keeps the background log writer flushing until dropped
#[cfg(feature = "cli")]
pub struct TracingGuard {
    #[cfg(feature = "tracing-files")]
    _file: tracing_appender::non_blocking::WorkerGuard,
}

#[cfg(feature = "cli")]
impl std::fmt::Debug for TracingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracingGuard").finish_non_exhaustive()
    }
}

/// Stderr subscriber for the binary, tagged with a fresh session id
#[cfg(feature = "cli")]
pub fn init_cli_tracing(
    verbosity: u8,
    format: TracingFormat,
) -> anyhow::Result<Option<TracingGuard>> {
    TracingConfig::new()
        .with_verbosity(verbosity)
        .with_format(format)
        .with_session_id(uuid::Uuid::new_v4().to_string())
        .init()
}

/// Span constructors shared by the session and the worker
pub mod spans {
    use tracing::{Level, Span};

    /// One protocol command, tagged with its correlation id
    pub fn command(name: &str, id: Option<&str>) -> Span {
        tracing::span!(Level::DEBUG, "command", command = %name, id = id.unwrap_or("-"))
    }

    /// One removal run from load to save
    pub fn removal_run(input: &std::path::Path, targets: usize, feathering: bool) -> Span {
        tracing::span!(
            Level::INFO,
            "removal_run",
            input = %input.display(),
            targets,
            feathering
        )
    }

    /// Classify and feather passes over a decoded image
    pub fn compositing(dimensions: (u32, u32), band: f32) -> Span {
        tracing::span!(
            Level::DEBUG,
            "compositing",
            width = dimensions.0,
            height = dimensions.1,
            band
        )
    }
}

/// Event helpers for recurring log records
pub mod events {
    use tracing::{debug, error, info};

    pub fn run_completed(output: &std::path::Path, total_ms: u64, removed_ratio: f32) {
        info!(
            output = %output.display(),
            total_ms,
            removed_ratio,
            "Removal run completed"
        );
    }

    pub fn error_with_context(error: &dyn std::error::Error, context: &str) {
        error!(error = %error, context = %context, "Operation failed");
    }

    pub fn performance_metric(operation: &str, duration_ms: u64) {
        debug!(operation = %operation, duration_ms, "Performance metric");
    }
}
