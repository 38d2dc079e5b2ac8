//! Process-wide log output.

use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered by `RUST_LOG`, or by
/// `default_directive` (e.g. `"warn"` or `"lumen_ecs=debug"`) when the
/// variable is unset or invalid.
///
/// # Errors
///
/// Fails if `default_directive` does not parse or a global subscriber is
/// already installed.
pub fn init_logging(default_directive: &str) -> Result<(), anyhow::Error> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive).map_err(|e| {
            anyhow::anyhow!("invalid log directive '{default_directive}': {e}")
        })?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}
