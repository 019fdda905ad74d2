//! Storage module - Persisting experiments and generation strategies.
//!
//! Snapshots are written as JSON files keyed by experiment name. Transient
//! I/O failures are retried with exponential backoff.

mod snapshot;
mod store;

use std::io;
use std::thread;
use std::time::Duration;

use crate::schema::ConfigError;

pub use snapshot::StrategySnapshot;
pub use store::{JsonFileStore, SnapshotSaver};

/// Errors from saving or loading snapshots.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("No stored {kind} for experiment {name}")]
    NotFound { kind: &'static str, name: String },
    #[error("{0}")]
    Unsupported(String),
    #[error("Stored strategy is invalid: {0}")]
    Config(#[from] ConfigError),
}

impl StorageError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::ResourceBusy
            ),
            _ => false,
        }
    }
}

/// Backoff policy for [`retry_on_transient`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }
}

/// Run `op`, retrying transient failures with exponential backoff.
pub fn retry_on_transient<T>(
    config: &RetryConfig,
    mut op: impl FnMut() -> Result<T, StorageError>,
) -> Result<T, StorageError> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                let delay = config.delay(attempt);
                log::warn!(
                    "Transient storage error (attempt {}/{}), retrying in {delay:?}: {e}",
                    attempt + 1,
                    config.max_retries + 1
                );
                thread::sleep(delay);
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_wait(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn interrupted() -> StorageError {
        io::Error::from(io::ErrorKind::Interrupted).into()
    }

    #[test]
    fn test_transient_classification() {
        assert!(interrupted().is_transient());
        let denied = StorageError::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!denied.is_transient());
        assert!(!StorageError::Unsupported("x".into()).is_transient());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RetryConfig {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(config.delay(0), Duration::from_millis(100));
        assert_eq!(config.delay(1), Duration::from_millis(200));
        assert_eq!(config.delay(2), Duration::from_millis(350));
    }

    #[test]
    fn test_retries_until_success() {
        let mut calls = 0;
        let result = retry_on_transient(&no_wait(3), || {
            calls += 1;
            if calls < 3 { Err(interrupted()) } else { Ok(calls) }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let mut calls = 0;
        let result: Result<(), _> = retry_on_transient(&no_wait(2), || {
            calls += 1;
            Err(interrupted())
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_permanent_errors_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = retry_on_transient(&no_wait(5), || {
            calls += 1;
            Err(StorageError::Unsupported("nope".into()))
        });
        assert!(matches!(result, Err(StorageError::Unsupported(_))));
        assert_eq!(calls, 1);
    }
}
