//! Configuration file resolution and loading
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config file (`<config_dir>/dmp/config.toml`)
//! 4. None: the caller falls back to built-in defaults

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "DMP_CONFIG";

/// Resolve which config file to load, if any.
///
/// An explicitly requested file (argument or environment) must exist; the per-user
/// default is only used when present.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Result<Option<PathBuf>> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return require_existing(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return require_existing(PathBuf::from(path));
        }
    }

    // Priority 3: per-user config file
    let user_config = default_config_path();
    match user_config {
        Some(path) if path.exists() => Ok(Some(path)),
        _ => Ok(None),
    }
}

/// Platform per-user config path (`~/.config/dmp/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("dmp").join("config.toml"))
}

/// Load and deserialize a TOML file
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    debug!("Loading config file {}", path.display());
    let content = std::fs::read_to_string(path)?;
    let value = toml::from_str(&content)?;
    Ok(value)
}

fn require_existing(path: PathBuf) -> Result<Option<PathBuf>> {
    if path.exists() {
        Ok(Some(path))
    } else {
        Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serial_test::serial;
    use std::io::Write;

    #[derive(Debug, Deserialize)]
    struct Sample {
        name: String,
        #[serde(default)]
        count: u32,
    }

    #[test]
    #[serial]
    fn test_cli_arg_takes_priority() {
        let dir = tempfile::tempdir().unwrap();
        let cli = dir.path().join("cli.toml");
        std::fs::write(&cli, "name = \"cli\"").unwrap();
        let env = dir.path().join("env.toml");
        std::fs::write(&env, "name = \"env\"").unwrap();

        std::env::set_var("DMP_TEST_CONFIG_A", &env);
        let resolved = resolve_config_path(Some(&cli), "DMP_TEST_CONFIG_A").unwrap();
        std::env::remove_var("DMP_TEST_CONFIG_A");

        assert_eq!(resolved, Some(cli));
    }

    #[test]
    #[serial]
    fn test_env_var_used_without_cli_arg() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join("env.toml");
        std::fs::write(&env, "name = \"env\"").unwrap();

        std::env::set_var("DMP_TEST_CONFIG_B", &env);
        let resolved = resolve_config_path(None, "DMP_TEST_CONFIG_B").unwrap();
        std::env::remove_var("DMP_TEST_CONFIG_B");

        assert_eq!(resolved, Some(env));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = resolve_config_path(Some(Path::new("/nonexistent/dmp.toml")), "DMP_UNSET_VAR");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = \"player\"\ncount = 3").unwrap();

        let sample: Sample = load_toml(file.path()).unwrap();
        assert_eq!(sample.name, "player");
        assert_eq!(sample.count, 3);
    }

    #[test]
    fn test_load_toml_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = ").unwrap();

        let result: Result<Sample> = load_toml(file.path());
        assert!(matches!(result, Err(Error::ConfigParse(_))));
    }
}
