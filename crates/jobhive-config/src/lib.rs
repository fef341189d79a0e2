//! # jobhive config
//!
//! Configuration management for the jobhive storage engine and job servers.

mod error;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{ConfigValidator, ValidationIssue, ValidationReport};
