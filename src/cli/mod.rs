//! Command handlers for the node binary

mod commands;

pub use commands::{cmd_config, cmd_keygen, cmd_start, load_settings, CliResult};
