//! Logging setup for binaries and tools embedding the crate.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "slipstack=info";

/// Builds the filter from `RUST_LOG`, falling back to `slipstack=info`.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber. `log` records from the database and
/// worker layers are forwarded into it.
///
/// Returns an error if a global subscriber was already set.
pub fn init_logging(json: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_log::LogTracer::init()?;

    let registry = tracing_subscriber::registry().with(env_filter());
    if json {
        let subscriber =
            registry.with(tracing_subscriber::fmt::layer().json().with_current_span(true));
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = registry.with(tracing_subscriber::fmt::layer().with_target(false));
        tracing::subscriber::set_global_default(subscriber)?;
    }

    tracing::debug!("Logging initialized");
    Ok(())
}
