//! Tracing subscriber setup.

use crate::config::LoggingSettings;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Output goes to
/// stderr; in a worker, stderr is the control pipe's peer in the master,
/// which relays it.
pub fn init(settings: &LoggingSettings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))?;

    let registry = tracing_subscriber::registry().with(filter);
    if settings.json {
        registry
            .with(fmt::layer().json().with_target(false).with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()?;
    }

    Ok(())
}
