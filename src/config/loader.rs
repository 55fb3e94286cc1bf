//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::ServerDefaults;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate process defaults from a TOML file.
///
/// A missing file yields the built-in defaults.
pub fn load_config(path: &Path) -> Result<ServerDefaults, ConfigError> {
    let mut config = if path.exists() {
        let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&content).map_err(ConfigError::Parse)?
    } else {
        tracing::warn!(path = ?path, "Defaults file not found, using built-in defaults");
        ServerDefaults::default()
    };

    validate_config(&config).map_err(ConfigError::Validation)?;
    expand_auto_error_pages(&mut config).map_err(ConfigError::Io)?;

    Ok(config)
}

/// Register every numerically named file of `error_pages.auto` as the page for that status.
fn expand_auto_error_pages(config: &mut ServerDefaults) -> std::io::Result<()> {
    let Some(dir) = config.error_pages.auto.clone() else {
        return Ok(());
    };
    if !dir.is_dir() {
        tracing::warn!(dir = ?dir, "Error pages directory missing, skipping auto discovery");
        return Ok(());
    }

    for entry in fs::read_dir(&dir)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if name.parse::<u16>().is_err() {
            continue;
        }
        let target = format!("{}/{}", dir.display(), name);
        config.error_pages.pages.insert(name, target);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ServerDefaults::default());
    }

    #[test]
    fn test_auto_error_pages() {
        let dir = tempfile::tempdir().unwrap();
        let pages = dir.path().join("pages");
        fs::create_dir(&pages).unwrap();
        fs::write(pages.join("404"), "nf").unwrap();
        fs::write(pages.join("500"), "ie").unwrap();
        fs::write(pages.join("readme"), "x").unwrap();

        let path = dir.path().join("defaults.toml");
        fs::write(
            &path,
            format!(
                "[error_pages]\nauto = {:?}\n405 = \"/errors/405.html\"\n",
                pages.display().to_string()
            ),
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.error_page(405), Some("/errors/405.html"));
        assert_eq!(
            config.error_page(404),
            Some(format!("{}/404", pages.display()).as_str())
        );
        assert!(config.error_page(500).is_some());
        assert_eq!(config.error_pages.pages.len(), 3);
    }

    #[test]
    fn test_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("defaults.toml");
        fs::write(&path, "listener = 5").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Parse(_))));
    }
}
