//! Tracing conventions shared by the tessera crates.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the host (see `tessera::tracing_setup` for a ready-made one).
//!
//! ```text
//! RUST_LOG=tessera=debug
//! ```

use tracing::Level;

/// Target prefix used by all tessera tracing events.
pub const TARGET_PREFIX: &str = "tessera";

/// Event targets used across the workspace.
pub mod targets {
    /// Index lifecycle and operations.
    pub const INDEX: &str = "tessera.index";
    /// Mapping and vector file encoding.
    pub const PERSIST: &str = "tessera.persist";
    /// ANN graph wrapper.
    pub const GRAPH: &str = "tessera.graph";
    /// Status-code boundary.
    pub const BOUNDARY: &str = "tessera.boundary";
    /// Configuration loading.
    pub const CONFIG: &str = "tessera.config";
}

/// Parse a log level string (case-insensitive).
///
/// Recognized values: `trace`, `debug`, `info`, `warn`, `error`.
#[must_use]
pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Checks `TESSERA_LOG_LEVEL`, then falls back to the provided default.
#[must_use]
pub fn level_from_env(default: Level) -> Level {
    std::env::var("TESSERA_LOG_LEVEL")
        .ok()
        .and_then(|s| parse_level(&s))
        .unwrap_or(default)
}
