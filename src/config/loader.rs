// Configuration loader
// Loads gateway settings from ~/.tern/config.toml or an explicit path

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::settings::Settings;

/// Default location: `~/.tern/config.toml`.
pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".tern/config.toml"))
}

/// Load settings. An explicit path must exist; the default path may be
/// absent, in which case the gateway starts with no providers.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (default_config_path()?, false),
    };

    if !path.exists() {
        if required {
            bail!("Configuration file not found: {}", path.display());
        }
        tracing::debug!("no config file at {}, using defaults", path.display());
        return Ok(Settings::default());
    }

    let contents = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
    let settings: Settings = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse configuration file {}", path.display()))?;
    settings
        .validate()
        .context("Configuration validation failed")?;

    tracing::info!(
        "loaded {} provider(s) from {}",
        settings.providers.len(),
        path.display()
    );
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_explicit_missing_path_fails() {
        let err = load_settings(Some(Path::new("/nonexistent/tern.toml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [server]
            port = 4321

            [[providers]]
            id = "fs"
            name = "Filesystem"
            transport = "stdio"
            command = "mcp-fs"
            "#
        )
        .unwrap();

        let settings = load_settings(Some(file.path())).unwrap();
        assert_eq!(settings.server.port, 4321);
        assert_eq!(settings.providers.len(), 1);
    }

    #[test]
    fn test_invalid_provider_fails_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [[providers]]
            id = ""
            name = "Broken"
            transport = "stdio"
            command = "x"
            "#
        )
        .unwrap();

        let err = load_settings(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("validation"));
    }
}
