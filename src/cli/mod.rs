//! Command-line front end for the chroma-bgremove engine
//!
//! This module is only available when the "cli" feature is enabled.

mod config;
#[path = "main.rs"]
mod main_impl;

pub use main_impl::{
    main, Cli, CliCommand, CliLogFormat, CliOutputFormat, CliQueuePolicy, EngineArgs, RemoveArgs,
    ServeArgs,
};
