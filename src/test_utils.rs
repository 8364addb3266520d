//! Test support: tracing setup and logging-first assertion helpers.
//!
//! Tests in this crate narrate themselves through the same `tracing`
//! pipeline the runtime logs into, so a failing run reads as one
//! interleaved story. The usual shape:
//!
//! ```ignore
//! coroscope::test_utils::init_logging();
//! coroscope::trace_test!("bounded_channel_preserves_fifo_order");
//! // ... drive the scenario ...
//! coroscope::trace_test_ok!("bounded_channel_preserves_fifo_order");
//! ```

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static LOG_SETUP: Once = Once::new();

/// Installs the test tracing subscriber. Idempotent.
///
/// Captures everything at `trace` by default; set `RUST_LOG` to narrow
/// the output when a run gets too chatty.
pub fn init_logging() {
    LOG_SETUP.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trace"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .compact()
            .try_init();
    });
}

/// Marks the start of a named test in the log stream.
#[macro_export]
macro_rules! trace_test {
    ($name:expr) => {
        tracing::info!(test = %$name, ">>> begin {}", $name);
    };
}

/// Marks the successful end of a named test, with optional summary
/// fields.
#[macro_export]
macro_rules! trace_test_ok {
    ($name:expr) => {
        tracing::info!(test = %$name, "<<< ok {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "<<< ok {}",
            $name
        );
    };
}

/// Logs a comparison, then asserts it, so the values under test appear in
/// the log right before any panic.
#[macro_export]
macro_rules! logged_assert {
    ($cond:expr, $what:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(what = %$what, expected = ?$expected, actual = ?$actual, "checking");
        assert!(
            $cond,
            "{} mismatch: expected {:?}, actual {:?}",
            $what, $expected, $actual
        );
    };
}
