use std::path::Path;

use serde_json::Value;
use shopmirror_core::MirrorConfig;

use crate::cli::ConfigCommands;
use crate::config_file::default_config_path;
use crate::error::CliError;

pub fn run_config(
    command: &ConfigCommands,
    config: &MirrorConfig,
    config_path: Option<&Path>,
) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show => {
            println!("{}", serde_json::to_string_pretty(&redacted_config(config)?)?);
        }
        ConfigCommands::Path => {
            let path = config_path.map_or_else(default_config_path, Path::to_path_buf);
            println!("{}", path.display());
        }
    }
    Ok(())
}

/// The config as JSON with the auth token masked.
pub fn redacted_config(config: &MirrorConfig) -> Result<Value, CliError> {
    let mut value = serde_json::to_value(config)?;
    if let Some(token) = value.get_mut("auth_token") {
        if !token.is_null() {
            *token = Value::String("[REDACTED]".to_string());
        }
    }
    Ok(value)
}
