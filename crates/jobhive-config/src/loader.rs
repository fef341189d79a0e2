//! Configuration loader.

use std::fs;
use std::path::Path;

use regex::Regex;
use tracing::warn;

use crate::error::ConfigError;
use crate::schema::Config;
use crate::validator::ConfigValidator;

const ENV_REFERENCE: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}";

/// Reads `jobhive.toml` files, expanding `${VAR}` references first.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::load_str(&fs::read_to_string(path)?)
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        Ok(toml::from_str(&Self::expand_env_vars(content)?)?)
    }

    /// Load `path` (or the defaults when `None`) and reject it if validation
    /// reports errors. Warnings are logged.
    pub fn load_validated(path: Option<&Path>) -> Result<Config, ConfigError> {
        let config = match path {
            Some(path) => Self::load(path)?,
            None => Config::default(),
        };

        let report = ConfigValidator::validate(&config);
        for warning in &report.warnings {
            warn!(path = %warning.path, "{}", warning.message);
        }
        if !report.is_valid() {
            return Err(ConfigError::Invalid(
                report
                    .errors
                    .iter()
                    .map(|e| format!("{}: {}", e.path, e.message))
                    .collect(),
            ));
        }
        Ok(config)
    }

    /// Replace each `${VAR}` with the variable's value.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let pattern = Regex::new(ENV_REFERENCE)?;
        let mut expanded = String::with_capacity(content.len());
        let mut copied = 0;

        for cap in pattern.captures_iter(content) {
            let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
                continue;
            };
            let value = std::env::var(name.as_str()).map_err(|_| ConfigError::EnvVarNotSet {
                var: name.as_str().to_string(),
                line: content[..whole.start()].matches('\n').count() + 1,
            })?;
            expanded.push_str(&content[copied..whole.start()]);
            expanded.push_str(&value);
            copied = whole.end();
        }
        expanded.push_str(&content[copied..]);

        Ok(expanded)
    }
}
