//! Logging setup for the provider process.
//!
//! Logs go to **stderr**: stdout carries the handshake line the host reads
//! when it spawns the provider. Filtering follows `RUST_LOG`, e.g.
//!
//! ```bash
//! # Log every SQL statement the provider executes
//! RUST_LOG=redshift_provider=debug ./redshift-provider
//!
//! # Include driver-level logs
//! RUST_LOG=debug,sqlx=info ./redshift-provider
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter used when `RUST_LOG` is unset. sqlx logs every statement at
/// `info`, which duplicates the provider's own `debug` statement logging.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}

/// Initialize the default logging subscriber.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default(DEFAULT_FILTER);
}

/// Initialize logging with a custom default filter, used when `RUST_LOG` is not set.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(stderr_layer())
        .init();
}

/// Try to initialize logging, returning false if a subscriber was already set.
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(env_filter(DEFAULT_FILTER))
        .with(stderr_layer())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    // The global subscriber can only be set once per process, so only the
    // filter parsing is covered here.

    use super::*;

    #[test]
    fn test_env_filter_parsing() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
        assert!(EnvFilter::try_new("redshift_provider=debug").is_ok());
        assert!(EnvFilter::try_new("warn,redshift_provider::client=trace").is_ok());
    }
}
