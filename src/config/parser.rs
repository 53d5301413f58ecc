//! Settings parser.
//!
//! Loads operator settings from YAML, with `.env` loading and environment
//! variable overrides applied on top. A missing settings file is not an
//! error: the defaults describe a working deployment.

use crate::error::{ConfigError, OrchestratorError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::settings::OrchestratorSettings;

/// Settings file names searched for, in order.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["llmdeploy.yaml", "llmdeploy.yml", ".llmdeploy.yaml"];

/// Environment variable overrides and the setting each one replaces.
pub const ENV_OVERRIDES: &[&str] = &[
    "LLMDEPLOY_PROJECT_NAME",
    "LLMDEPLOY_TEMPLATE_PATH",
    "LLMDEPLOY_TEMPLATE_URL",
    "LLMDEPLOY_CLUSTER",
    "LLMDEPLOY_SERVICE",
    "LLMDEPLOY_QUEUE_URL",
    "LLMDEPLOY_RESULTS_BUCKET",
    "LLMDEPLOY_LOCAL_ENDPOINT",
];

/// Settings parser.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for `.env` lookup.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the directory holding the `.env` file.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads settings from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<OrchestratorSettings> {
        let path = path.as_ref();
        info!("Loading settings from: {}", path.display());

        if !path.exists() {
            return Err(OrchestratorError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses settings from a YAML string. Empty input yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<OrchestratorSettings> {
        debug!("Parsing YAML settings");

        if content.trim().is_empty() {
            return Ok(OrchestratorSettings::default());
        }

        let settings: OrchestratorSettings = serde_yaml::from_str(content).map_err(|e| {
            OrchestratorError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })?;

        debug!("Parsed settings for project: {}", settings.project.name);
        Ok(settings)
    }

    /// Resolves and loads settings.
    ///
    /// An explicit path must exist. Otherwise the file is searched upward
    /// from `start_dir`, and defaults are used when nothing is found.
    /// `.env` is loaded first and process environment overrides last.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file is missing, or any file is invalid.
    pub fn load(
        self,
        explicit: Option<&Path>,
        start_dir: impl AsRef<Path>,
    ) -> Result<OrchestratorSettings> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => find_config_file(start_dir),
        };

        let parser = match (&self.base_path, path.as_deref().and_then(Path::parent)) {
            (None, Some(dir)) => self.with_base_path(dir),
            _ => self,
        };
        parser.load_dotenv()?;

        let mut settings = match &path {
            Some(p) => parser.load_file(p)?,
            None => {
                info!("No settings file found, using defaults");
                OrchestratorSettings::default()
            }
        };

        apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Loads the `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the `.env` file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                OrchestratorError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Applies `LLMDEPLOY_*` overrides using the given variable lookup.
pub fn apply_env_overrides<F>(settings: &mut OrchestratorSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    for key in ENV_OVERRIDES {
        let Some(value) = lookup(key).filter(|v| !v.is_empty()) else {
            continue;
        };
        debug!("Applying override from {key}");

        match *key {
            "LLMDEPLOY_PROJECT_NAME" => settings.project.name = value,
            "LLMDEPLOY_TEMPLATE_PATH" => settings.template.path = PathBuf::from(value),
            "LLMDEPLOY_TEMPLATE_URL" => settings.template.url = Some(value),
            "LLMDEPLOY_CLUSTER" => settings.service.cluster = Some(value),
            "LLMDEPLOY_SERVICE" => settings.service.service = Some(value),
            "LLMDEPLOY_QUEUE_URL" => settings.queue.url = Some(value),
            "LLMDEPLOY_RESULTS_BUCKET" => settings.queue.results_bucket = Some(value),
            "LLMDEPLOY_LOCAL_ENDPOINT" => settings.service.local_fallback = Some(value),
            _ => {}
        }
    }
}

/// Finds a settings file in `start_dir` or any of its parents.
#[must_use]
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Option<PathBuf> {
    let mut current = start_dir.as_ref().to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found settings file: {}", config_path.display());
                return Some(config_path);
            }
        }

        if !current.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_minimal_settings() {
        let yaml = r"
project:
  name: test-project
";
        let settings = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        assert_eq!(settings.project.name, "test-project");
        assert_eq!(settings.service.container_port, 11434);
    }

    #[test]
    fn test_parse_empty_is_default() {
        let settings = ConfigParser::new().parse_yaml("  \n", None).unwrap();
        assert_eq!(settings, OrchestratorSettings::default());
    }

    #[test]
    fn test_parse_error_carries_location() {
        let err = ConfigParser::new()
            .parse_yaml("project: [unclosed", Some(Path::new("llmdeploy.yaml")))
            .unwrap_err();
        match err {
            OrchestratorError::Config(ConfigError::ParseError { location, .. }) => {
                assert_eq!(location.as_deref(), Some("llmdeploy.yaml"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("llmdeploy.yml"), "project:\n  name: found\n").unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("llmdeploy.yml"));

        let settings = ConfigParser::new().load_file(found).unwrap();
        assert_eq!(settings.project.name, "found");
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        let result = ConfigParser::new().load(Some(&missing), dir.path());
        assert!(matches!(
            result,
            Err(OrchestratorError::Config(ConfigError::FileNotFound { .. }))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars = HashMap::from([
            ("LLMDEPLOY_PROJECT_NAME", "override"),
            ("LLMDEPLOY_QUEUE_URL", "https://sqs.us-east-1.amazonaws.com/1/jobs"),
            ("LLMDEPLOY_LOCAL_ENDPOINT", "http://127.0.0.1:8080"),
            ("LLMDEPLOY_CLUSTER", ""),
        ]);
        let mut settings = OrchestratorSettings::default();

        apply_env_overrides(&mut settings, |key| vars.get(key).map(ToString::to_string));

        assert_eq!(settings.project.name, "override");
        assert_eq!(
            settings.queue.url.as_deref(),
            Some("https://sqs.us-east-1.amazonaws.com/1/jobs")
        );
        assert_eq!(settings.service.local_fallback.as_deref(), Some("http://127.0.0.1:8080"));
        assert_eq!(settings.service.cluster, None);
    }
}
