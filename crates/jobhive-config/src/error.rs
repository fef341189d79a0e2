//! Configuration errors.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A `${VAR}` reference whose variable is unset.
    #[error("Environment variable {var} referenced on line {line} is not set")]
    EnvVarNotSet { var: String, line: usize },

    #[error("Invalid substitution pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Every validation error, formatted as `path: message`.
    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}
