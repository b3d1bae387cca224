//! Structured logging setup using the tracing crate

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// Log events are written to stdout. With `json` set the output is
/// JSON-formatted for log aggregation systems; otherwise it is the
/// human-readable format. The filter is taken from `RUST_LOG`, falling
/// back to `info`.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
///
/// # Examples
///
/// ```no_run
/// reeftile::logging::init_subscriber(false).expect("Failed to initialize logging");
/// tracing::info!("Cache core started");
/// ```
pub fn init_subscriber(json: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().try_init()?;
    } else {
        builder.try_init()?;
    }
    Ok(())
}
