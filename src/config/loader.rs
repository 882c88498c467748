//! Configuration loading with environment detection.
//!
//! Resolution order for the file path: explicit argument, `CONVEYOR_CONFIG`
//! environment variable, then `conveyor.yaml` in the working directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use super::error::{ConfigResult, ConfigurationError};
use super::ConveyorConfig;

/// Loads, validates, and owns the process-wide configuration.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Arc<ConveyorConfig>,
    environment: String,
    source: PathBuf,
}

impl ConfigManager {
    /// Load configuration from `path` or the default locations.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let source = match path {
            Some(p) => p.to_path_buf(),
            None => std::env::var("CONVEYOR_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("conveyor.yaml")),
        };

        let raw = fs::read_to_string(&source).map_err(|e| {
            ConfigurationError::file_read(source.display().to_string(), e.to_string())
        })?;

        let manager = Self::from_yaml(&raw)?;
        let manager = Self { source, ..manager };

        info!(
            environment = %manager.environment,
            source = %manager.source.display(),
            queues = manager.config.queues.len(),
            "configuration loaded"
        );
        Ok(manager)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(raw: &str) -> ConfigResult<Self> {
        let config: ConveyorConfig = serde_yaml::from_str(raw)?;
        config.validate()?;

        Ok(Self {
            config: Arc::new(config),
            environment: detect_environment(),
            source: PathBuf::from("<inline>"),
        })
    }

    pub fn config(&self) -> &ConveyorConfig {
        &self.config
    }

    /// Shared handle to the configuration, cloned into components.
    pub fn shared(&self) -> Arc<ConveyorConfig> {
        Arc::clone(&self.config)
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }
}

fn detect_environment() -> String {
    std::env::var("CONVEYOR_ENV").unwrap_or_else(|_| "development".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
broker:
  url: redis://localhost:7711
queues:
  emails:
    worker:
      kind: cli
      address: "bin/send-email"
"#
        )
        .unwrap();

        let manager = ConfigManager::load(Some(file.path())).unwrap();
        assert!(manager.config().queue("emails").is_some());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = ConfigManager::load(Some(Path::new("/nonexistent/conveyor.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigurationError::FileRead { .. }));
    }

    #[test]
    fn invalid_yaml_is_a_parse_error() {
        let err = ConfigManager::from_yaml("broker: [not a mapping").unwrap_err();
        assert!(matches!(err, ConfigurationError::Parse(_)));
    }
}
