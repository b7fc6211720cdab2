//! Tracing subscriber initialization for hosts embedding tessera.
//!
//! Writes structured logs to stderr through one `tracing-subscriber` stack.
//!
//! # Priority (highest to lowest)
//!
//! 1. `TESSERA_LOG` env var (per-target directives, e.g. `tessera.index=trace,warn`)
//! 2. `RUST_LOG` env var
//! 3. `TESSERA_LOG_LEVEL` (a bare level)
//! 4. Default level: `warn`

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;

use tessera_core::tracing_config;

/// Install the global subscriber.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_subscriber() {
    tracing_subscriber::registry()
        .with(build_env_filter())
        .with(fmt_layer())
        .init();
}

/// Install the global subscriber unless one is already set.
///
/// # Errors
///
/// Returns `TryInitError` if a global subscriber already exists.
pub fn try_init_subscriber() -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(build_env_filter())
        .with(fmt_layer())
        .try_init()
}

fn fmt_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    let use_ansi = std::io::IsTerminal::is_terminal(&std::io::stderr());
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(use_ansi)
        .with_target(true)
        .with_level(true)
        .compact()
}

/// `TESSERA_LOG` > `RUST_LOG` > `TESSERA_LOG_LEVEL` > `warn`.
fn build_env_filter() -> EnvFilter {
    if let Ok(directives) = std::env::var("TESSERA_LOG")
        && let Ok(filter) = EnvFilter::try_new(&directives)
    {
        return filter;
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let level = tracing_config::level_from_env(Level::WARN);
    let directive = format!(
        "warn,{prefix}={level}",
        prefix = tracing_config::TARGET_PREFIX,
    );
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_env_filter_produces_valid_filter() {
        let _filter = build_env_filter();
    }

    #[test]
    fn try_init_twice_reports_error() {
        // Another test may have installed a subscriber first; either way the
        // second attempt in this process must fail without panicking.
        let _ = try_init_subscriber();
        assert!(try_init_subscriber().is_err());
    }
}
