//! Environment-driven dispatcher configuration.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic** — values set via the `with_*` methods
//! 2. **Environment variables** — values from `COROSCOPE_*` variables
//! 3. **Defaults** — built-in defaults from [`DispatchConfig::default`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `COROSCOPE_WORKERS` | `usize` | `workers` |
//! | `COROSCOPE_IO_WORKERS` | `usize` | `io_workers` |
//! | `COROSCOPE_THREAD_STACK_SIZE` | `usize` | `thread_stack_size` |
//! | `COROSCOPE_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |

use thiserror::Error;

/// Environment variable name for the default pool's worker count.
pub const ENV_WORKERS: &str = "COROSCOPE_WORKERS";
/// Environment variable name for the IO pool's worker count.
pub const ENV_IO_WORKERS: &str = "COROSCOPE_IO_WORKERS";
/// Environment variable name for the worker thread stack size in bytes.
pub const ENV_THREAD_STACK_SIZE: &str = "COROSCOPE_THREAD_STACK_SIZE";
/// Environment variable name for the worker thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "COROSCOPE_THREAD_NAME_PREFIX";

const MAX_IO_WORKERS: usize = 64;

/// Error produced when the environment holds an unparseable value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A variable was set but its value did not parse.
    #[error("invalid value for {variable}: {value:?}")]
    InvalidValue {
        /// The offending environment variable.
        variable: &'static str,
        /// The raw value found in the environment.
        value: String,
    },
    /// A variable parsed but is outside the accepted range.
    #[error("value for {variable} out of range: {value}")]
    OutOfRange {
        /// The offending environment variable.
        variable: &'static str,
        /// The parsed value.
        value: usize,
    },
}

/// Tuning knobs for the worker-pool dispatchers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Worker threads in the default pool.
    pub workers: usize,
    /// Worker threads in the IO-biased pool.
    pub io_workers: usize,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
    /// Stack size for worker threads; `None` uses the platform default.
    pub thread_stack_size: Option<usize>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get);
        Self {
            workers,
            io_workers: (workers * 4).min(MAX_IO_WORKERS),
            thread_name_prefix: "coroscope".to_string(),
            thread_stack_size: None,
        }
    }
}

impl DispatchConfig {
    /// Builds a configuration from the defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(workers) = read_usize(ENV_WORKERS)? {
            if workers == 0 {
                return Err(ConfigError::OutOfRange {
                    variable: ENV_WORKERS,
                    value: workers,
                });
            }
            config.workers = workers;
            config.io_workers = (workers * 4).min(MAX_IO_WORKERS);
        }
        if let Some(io_workers) = read_usize(ENV_IO_WORKERS)? {
            if io_workers == 0 {
                return Err(ConfigError::OutOfRange {
                    variable: ENV_IO_WORKERS,
                    value: io_workers,
                });
            }
            config.io_workers = io_workers;
        }
        if let Some(stack) = read_usize(ENV_THREAD_STACK_SIZE)? {
            config.thread_stack_size = Some(stack);
        }
        if let Ok(prefix) = std::env::var(ENV_THREAD_NAME_PREFIX) {
            if !prefix.is_empty() {
                config.thread_name_prefix = prefix;
            }
        }
        Ok(config)
    }

    /// Sets the default pool's worker count.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the IO pool's worker count.
    #[must_use]
    pub fn with_io_workers(mut self, io_workers: usize) -> Self {
        self.io_workers = io_workers.max(1);
        self
    }

    /// Sets the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Sets the worker thread stack size in bytes.
    #[must_use]
    pub fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = Some(bytes);
        self
    }
}

fn read_usize(variable: &'static str) -> Result<Option<usize>, ConfigError> {
    match std::env::var(variable) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                variable,
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}
