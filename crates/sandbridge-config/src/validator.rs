//! Configuration validation.

use std::collections::HashSet;

use crate::error::ConfigError;
use crate::schema::Config;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Convert the first error, if any, into a `ConfigError`.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(ConfigError::InvalidValue {
                field: error.path,
                message: error.message,
            }),
            None => Ok(self.warnings),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_bridge(config, &mut result);
        Self::validate_logging(config, &mut result);
        Self::validate_sandbox(config, &mut result);

        result
    }

    fn validate_bridge(config: &Config, result: &mut ValidationResult) {
        let bridge = &config.bridge;

        if bridge.buffer_until_handshake && bridge.max_buffered_messages == 0 {
            result.add_error(ValidationError::new(
                "bridge.max_buffered_messages",
                "Must be positive while buffer_until_handshake is enabled",
            ));
        }

        if bridge.max_pending_per_client == 0 {
            result.add_warning(ValidationWarning::new(
                "bridge.max_pending_per_client",
                "Unbounded: listeners for clients that never register are kept forever",
            ));
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        if config.logging.level.trim().is_empty() {
            result.add_error(ValidationError::new(
                "logging.level",
                "Log level cannot be empty",
            ));
        }
    }

    fn validate_sandbox(config: &Config, result: &mut ValidationResult) {
        let sandbox = &config.sandbox;
        let mut seen = HashSet::new();

        for (i, id) in sandbox.clients.iter().enumerate() {
            if id.trim().is_empty() {
                result.add_error(ValidationError::new(
                    format!("sandbox.clients[{}]", i),
                    "Client id cannot be empty",
                ));
            } else if !seen.insert(id.as_str()) {
                result.add_error(ValidationError::new(
                    format!("sandbox.clients[{}]", i),
                    format!("Duplicate client id: {}", id),
                ));
            }
        }

        if let Some(entry) = &sandbox.entry {
            if !sandbox.files.contains_key(entry) {
                result.add_warning(ValidationWarning::new(
                    "sandbox.entry",
                    format!("Entry {} is not present in sandbox.files", entry),
                ));
            }
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
