//! # Modweave Config
//!
//! Configuration management for the modweave orchestrator.

mod error;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{ConfigIssue, ConfigReport, ConfigValidator};
