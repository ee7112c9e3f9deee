//! Config file discovery and environment overrides.

use std::path::{Path, PathBuf};

use shopmirror_core::util::normalize_text_option;
use shopmirror_core::MirrorConfig;

use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "config.json";

pub const ENV_REMOTE_URL: &str = "SHOPMIRROR_REMOTE_URL";
pub const ENV_AUTH_TOKEN: &str = "SHOPMIRROR_AUTH_TOKEN";
pub const ENV_DB_PATH: &str = "SHOPMIRROR_DB_PATH";

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shopmirror")
        .join(CONFIG_FILE_NAME)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shopmirror")
        .join("cache.db")
}

/// Read a config file. A missing file at the default location yields the
/// defaults; a missing file that was asked for explicitly is an error.
pub fn load_from_path(path: &Path, explicit: bool) -> Result<MirrorConfig, CliError> {
    if !path.exists() {
        if explicit {
            return Err(CliError::Config(format!(
                "config file {} does not exist",
                path.display()
            )));
        }
        return Ok(MirrorConfig::default());
    }

    let raw = std::fs::read_to_string(path).map_err(|error| {
        CliError::Config(format!("Failed to read config at {}: {error}", path.display()))
    })?;
    MirrorConfig::from_json(&raw).map_err(|error| {
        CliError::Config(format!("Failed to parse config at {}: {error}", path.display()))
    })
}

/// Apply `SHOPMIRROR_*` variables on top of the file config.
pub fn apply_env_overrides(
    config: &mut MirrorConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    if let Some(url) = normalize_text_option(lookup(ENV_REMOTE_URL)) {
        config.remote_url = Some(url);
    }
    if let Some(token) = normalize_text_option(lookup(ENV_AUTH_TOKEN)) {
        config.auth_token = Some(token);
    }
    if let Some(path) = normalize_text_option(lookup(ENV_DB_PATH)) {
        config.database_path = Some(PathBuf::from(path));
    }
}

/// Effective config: file, then environment, then `--db-path`. The cache
/// lives in the user data directory unless something else says otherwise.
pub fn resolve_config(
    config_path: Option<&Path>,
    db_path: Option<PathBuf>,
) -> Result<MirrorConfig, CliError> {
    let mut config = match config_path {
        Some(path) => load_from_path(path, true)?,
        None => load_from_path(&default_config_path(), false)?,
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    if let Some(path) = db_path {
        config.database_path = Some(path);
    }
    if config.database_path.is_none() {
        config.database_path = Some(default_db_path());
    }
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_default_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_from_path(&dir.path().join("config.json"), false).unwrap();
        assert_eq!(config, MirrorConfig::default());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_from_path(&dir.path().join("nope.json"), true).is_err());
    }

    #[test]
    fn invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"pull_interval_secs": "often"}"#).unwrap();

        let error = load_from_path(&path, true).unwrap_err().to_string();
        assert!(error.contains("config.json"));
    }

    #[test]
    fn env_overrides_win_and_ignore_blanks() {
        let mut config = MirrorConfig {
            remote_url: Some("https://file.firebaseio.com".to_string()),
            ..MirrorConfig::default()
        };
        apply_env_overrides(&mut config, |key| match key {
            ENV_REMOTE_URL => Some("  ".to_string()),
            ENV_AUTH_TOKEN => Some("token".to_string()),
            ENV_DB_PATH => Some("/tmp/cache.db".to_string()),
            _ => None,
        });

        assert_eq!(
            config.remote_url.as_deref(),
            Some("https://file.firebaseio.com")
        );
        assert_eq!(config.auth_token.as_deref(), Some("token"));
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/cache.db")));
    }
}
