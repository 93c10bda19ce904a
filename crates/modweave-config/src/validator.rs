//! Configuration validation.

use std::fmt;

use crate::error::ConfigError;
use crate::schema::Config;

/// A finding at a dotted config path such as `orchestrator.max_depth`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub path: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Errors block startup; warnings are logged and ignored.
#[derive(Debug, Default)]
pub struct ConfigReport {
    pub errors: Vec<ConfigIssue>,
    pub warnings: Vec<ConfigIssue>,
}

impl ConfigReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: &str, message: impl Into<String>) {
        self.errors.push(ConfigIssue {
            path: path.to_string(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: &str, message: impl Into<String>) {
        self.warnings.push(ConfigIssue {
            path: path.to_string(),
            message: message.into(),
        });
    }

    /// The warnings, or the first error as `ConfigError::InvalidValue`.
    pub fn into_result(self) -> Result<Vec<ConfigIssue>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(issue) => Err(ConfigError::InvalidValue {
                field: issue.path,
                message: issue.message,
            }),
            None => Ok(self.warnings),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ConfigReport {
        let mut report = ConfigReport::default();
        Self::validate_orchestrator(config, &mut report);
        Self::validate_logging(config, &mut report);
        report
    }

    /// Validate and fail on the first error. Warnings are returned.
    pub fn check(config: &Config) -> Result<Vec<ConfigIssue>, ConfigError> {
        Self::validate(config).into_result()
    }

    fn validate_orchestrator(config: &Config, report: &mut ConfigReport) {
        let orchestrator = &config.orchestrator;

        if orchestrator.max_depth == 0 {
            report.error("orchestrator.max_depth", "max_depth must be greater than 0");
        } else if orchestrator.max_depth > 32 {
            report.warn(
                "orchestrator.max_depth",
                "max_depth is very high (>32), runaway compositions will take long to stop",
            );
        }

        for (path, value) in [
            ("orchestrator.timeout_ms", orchestrator.timeout_ms),
            ("orchestrator.dependency_timeout_ms", orchestrator.dependency_timeout_ms),
        ] {
            if value == Some(0) {
                report.error(path, "timeout must be greater than 0 when set");
            }
        }

        if let (Some(run), Some(dep)) = (orchestrator.timeout_ms, orchestrator.dependency_timeout_ms)
        {
            if dep > run {
                report.warn(
                    "orchestrator.dependency_timeout_ms",
                    format!("dependency budget {}ms exceeds the whole-run budget {}ms", dep, run),
                );
            }
        }

        if orchestrator.max_concurrency > 256 {
            report.warn(
                "orchestrator.max_concurrency",
                "max_concurrency is very high (>256), the provider may throttle",
            );
        }
    }

    fn validate_logging(config: &Config, report: &mut ConfigReport) {
        if config.logging.level.trim().is_empty() {
            report.error("logging.level", "Log level cannot be empty");
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
