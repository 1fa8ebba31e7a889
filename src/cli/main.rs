//! Chroma-key background removal CLI
//!
//! `serve` runs the engine behind the JSON-lines protocol on stdin/stdout;
//! `remove` performs a single removal and exits.

use super::config::CliConfigBuilder;
use crate::{
    config::{OutputFormat, QueuePolicy},
    services::{ImageIOService, LogProgressReporter},
    session::Session,
    tracing_config::{init_cli_tracing, TracingFormat},
    types::{ColorTarget, RemovalResult, Rgb, Tolerance},
    worker,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Color-keyed background removal
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "chroma-bgremove")]
pub struct Cli {
    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log format; logs are always written to stderr
    #[arg(long, value_enum, default_value_t = CliLogFormat::Console, global = true)]
    pub log_format: CliLogFormat,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Serve the JSON-lines command protocol on stdin/stdout
    Serve(ServeArgs),
    /// Remove colors from a single image and exit
    Remove(RemoveArgs),
}

/// Engine settings shared by both subcommands
#[derive(Args, Debug, Clone, Default)]
pub struct EngineArgs {
    /// JSON settings file; flags on the command line take precedence
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output format [default: from the output extension, else png]
    #[arg(short, long, value_enum)]
    pub format: Option<CliOutputFormat>,

    /// Neighborhood radius used to find edge pixels (1-8)
    #[arg(long, value_name = "PIXELS")]
    pub window_radius: Option<u32>,

    /// Feathering band half-width at sensitivity 100, in channel units
    #[arg(long, value_name = "UNITS")]
    pub feather_band: Option<f32>,

    /// Minimum effective tolerance for every color
    #[arg(long, value_name = "UNITS")]
    pub exact_slack: Option<u8>,

    /// Zero the color of fully removed pixels
    #[arg(long)]
    pub clear_removed_rgb: bool,

    /// Process rows on a single thread
    #[arg(long)]
    pub sequential: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Output slot overwritten by every run [default: temp/processed_image.png]
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Handling of process-image requests that arrive during a run
    #[arg(long, value_enum)]
    pub queue: Option<CliQueuePolicy>,

    /// Rerun the last image after every state-changing command
    #[arg(long)]
    pub auto_reprocess: bool,

    /// Emit an ack notification after each handled command
    #[arg(long)]
    pub ack: bool,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RemoveArgs {
    /// Input image
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Color to remove as RRGGBB or RRGGBB:TOLERANCE (repeatable)
    #[arg(
        short,
        long = "color",
        value_name = "COLOR",
        required = true,
        value_parser = parse_color_target
    )]
    pub colors: Vec<ColorTarget>,

    /// Feather edges between removed and kept regions
    #[arg(long)]
    pub edges: bool,

    /// Edge softness, 0 (hard) to 100 (softest)
    #[arg(long, default_value_t = 50)]
    pub sensitivity: u8,

    /// Output file [default: <INPUT>_no_bg.<ext>]
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliOutputFormat {
    Png,
    Tiff,
    Webp,
    Rgba8,
}

impl From<CliOutputFormat> for OutputFormat {
    fn from(format: CliOutputFormat) -> Self {
        match format {
            CliOutputFormat::Png => OutputFormat::Png,
            CliOutputFormat::Tiff => OutputFormat::Tiff,
            CliOutputFormat::Webp => OutputFormat::WebP,
            CliOutputFormat::Rgba8 => OutputFormat::Rgba8,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliQueuePolicy {
    Queue,
    Supersede,
}

impl From<CliQueuePolicy> for QueuePolicy {
    fn from(policy: CliQueuePolicy) -> Self {
        match policy {
            CliQueuePolicy::Queue => QueuePolicy::Queue,
            CliQueuePolicy::Supersede => QueuePolicy::Supersede,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliLogFormat {
    Console,
    Compact,
    #[cfg(feature = "tracing-json")]
    Json,
}

impl From<CliLogFormat> for TracingFormat {
    fn from(format: CliLogFormat) -> Self {
        match format {
            CliLogFormat::Console => TracingFormat::Console,
            CliLogFormat::Compact => TracingFormat::Compact,
            #[cfg(feature = "tracing-json")]
            CliLogFormat::Json => TracingFormat::Json,
        }
    }
}

/// Parse `RRGGBB[:TOLERANCE]`; tolerances outside 0-255 are clamped
fn parse_color_target(value: &str) -> std::result::Result<ColorTarget, String> {
    let (hex, tolerance) = match value.split_once(':') {
        Some((hex, tolerance)) => {
            let tolerance: i64 = tolerance
                .trim()
                .parse()
                .map_err(|e| format!("invalid tolerance '{}': {}", tolerance, e))?;
            (hex, Tolerance::clamped(tolerance))
        },
        None => (value, Tolerance::EXACT),
    };
    let rgb: Rgb = hex.parse().map_err(|e| format!("{}", e))?;
    Ok(ColorTarget::new(rgb, tolerance))
}

/// Main entry point for the CLI application
pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _tracing_guard = init_cli_tracing(cli.verbose, cli.log_format.into())
        .context("Failed to initialize tracing")?;

    match &cli.command {
        CliCommand::Serve(args) => serve(args).await,
        CliCommand::Remove(args) => remove(args, cli.verbose).await,
    }
}

async fn serve(args: &ServeArgs) -> Result<()> {
    let config =
        CliConfigBuilder::from_serve_args(args).context("Failed to build configuration")?;
    debug!(?config, "Serve configuration");

    let stats = worker::serve_stdio(config)
        .await
        .context("Worker stopped")?;
    info!(
        handled = stats.commands_handled,
        malformed = stats.malformed_lines,
        superseded = stats.superseded,
        "Input closed, shutting down"
    );
    Ok(())
}

async fn remove(args: &RemoveArgs, verbose: u8) -> Result<()> {
    if !ImageIOService::is_supported_format(&args.input) {
        warn!(
            input = %args.input.display(),
            "Unrecognized input extension, relying on content detection"
        );
    }

    let config = CliConfigBuilder::from_remove_args(args).context("Failed to build configuration")?;
    let output = config.output_path.clone();
    let input = args.input.clone();
    let colors = args.colors.clone();

    let result: RemovalResult = tokio::task::spawn_blocking(move || {
        Session::new(config)?
            .with_progress_reporter(Box::new(LogProgressReporter::new(verbose > 0)))
            .process_image(&input, Some(colors))
    })
    .await
    .context("Removal task panicked")?
    .with_context(|| format!("Failed to process {}", args.input.display()))?;

    let stats = result.mask.statistics();
    info!(
        removed = stats.removed_pixels,
        partial = stats.partial_pixels,
        kept = stats.kept_pixels,
        "{}",
        result.timing_summary()
    );
    println!("{}", result.output_path.as_deref().unwrap_or(&output).display());
    Ok(())
}
