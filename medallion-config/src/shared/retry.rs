use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Retry policy for transient store and source failures.
///
/// Retries apply at run level: a failed stage invocation is retried as a
/// whole, relying on checkpoints to make re-execution safe.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on the backoff delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl RetryConfig {
    /// Default number of attempts for a stage invocation.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Default initial backoff delay.
    pub const DEFAULT_BASE_DELAY_MS: u64 = 100;

    /// Default backoff delay cap.
    pub const DEFAULT_MAX_DELAY_MS: u64 = 5000;

    /// Validates retry configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "retry.max_attempts".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.max_delay_ms < self.base_delay_ms {
            return Err(ValidationError::InvalidFieldValue {
                field: "retry.max_delay_ms".to_string(),
                constraint: "must be greater than or equal to retry.base_delay_ms".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    RetryConfig::DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    RetryConfig::DEFAULT_BASE_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    RetryConfig::DEFAULT_MAX_DELAY_MS
}
