use std::env;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable overriding the configured log filter.
pub const LOG_ENV: &str = "TIDYD_LOG";

/// Installs the global subscriber, writing to stderr so command output on
/// stdout stays clean.
///
/// `TIDYD_LOG` wins over `default_level`; an unparsable filter falls back to
/// `info`. Calling this twice keeps the first subscriber.
pub fn init(default_level: &str) {
    let filter = env::var(LOG_ENV).unwrap_or_else(|_| default_level.to_string());
    let filter_layer = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .with(filter_layer)
        .try_init();
}
