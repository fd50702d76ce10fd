//! Logging setup for binaries and tests embedding the engine.

use tracing::Level;

/// Installs a `fmt` subscriber writing events up to `level` to stdout.
///
/// Does nothing if a global subscriber is already installed, so it is safe to
/// call from every test.
pub fn init_tracing(level: Level) {
  let _ = try_init_tracing(level);
}

/// Like [`init_tracing`], but reports whether this call installed the
/// subscriber.
///
/// # Errors
///
/// Fails if a global subscriber was already set.
pub fn try_init_tracing(level: Level) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
  tracing_subscriber::fmt()
    .with_max_level(level)
    .with_target(true)
    .try_init()
}
