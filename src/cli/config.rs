//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::{EngineArgs, RemoveArgs, ServeArgs};
use crate::{
    config::{OutputFormat, SessionConfig},
    services::OutputFormatHandler,
    types::EdgeSettings,
};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Convert CLI arguments to a validated `SessionConfig`
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the configuration for `serve`
    pub(crate) fn from_serve_args(args: &ServeArgs) -> Result<SessionConfig> {
        let mut config = Self::base_config(&args.engine)?;

        if let Some(output) = &args.output {
            config.output_path.clone_from(output);
            if args.engine.format.is_none() {
                if let Some(format) = OutputFormatHandler::from_path(output) {
                    config.output_format = format;
                }
            }
        }
        if let Some(queue) = args.queue {
            config.queue_policy = queue.into();
        }
        config.auto_reprocess |= args.auto_reprocess;
        config.acknowledge_commands |= args.ack;

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Build the configuration for `remove`
    ///
    /// Without `--output` the result is written next to the input.
    pub(crate) fn from_remove_args(args: &RemoveArgs) -> Result<SessionConfig> {
        let mut config = Self::base_config(&args.engine)?;

        if args.engine.format.is_none() {
            if let Some(format) = args.output.as_deref().and_then(OutputFormatHandler::from_path) {
                config.output_format = format;
            }
        }
        config.output_path = match &args.output {
            Some(output) => output.clone(),
            None => default_output_path(&args.input, config.output_format),
        };
        config.initial_edge_settings = EdgeSettings::new(args.edges, i64::from(args.sensitivity));

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Defaults, then the settings file, then explicit flags
    fn base_config(engine: &EngineArgs) -> Result<SessionConfig> {
        let mut config = match &engine.config {
            Some(path) => Self::load_config_file(path)?,
            None => SessionConfig::default(),
        };

        if let Some(format) = engine.format {
            config.output_format = format.into();
        }
        if let Some(radius) = engine.window_radius {
            config.edge_window_radius = radius;
        }
        if let Some(band) = engine.feather_band {
            config.max_feather_band = band;
        }
        if let Some(slack) = engine.exact_slack {
            config.exact_match_slack = slack;
        }
        config.clear_removed_rgb |= engine.clear_removed_rgb;
        if engine.sequential {
            config.parallel = false;
        }

        Ok(config)
    }

    fn load_config_file(path: &Path) -> Result<SessionConfig> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))
    }
}

/// `<dir>/<stem>_no_bg.<ext>` next to the input
pub(crate) fn default_output_path(input: &Path, format: OutputFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .map_or_else(|| "output".into(), |stem| stem.to_string_lossy());
    input.with_file_name(format!(
        "{}_no_bg.{}",
        stem,
        OutputFormatHandler::get_extension(format)
    ))
}
