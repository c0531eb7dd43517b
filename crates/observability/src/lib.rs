//! Process-wide tracing setup shared by every binary embedding the engine.

/// Initialize tracing with defaults (`RUST_LOG`, falling back to `info`, JSON output).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(&TracingConfig::default());
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use tracing::{LogFormat, TracingConfig};
