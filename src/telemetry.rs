use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Environment;

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` overrides the default `info` filter. Production emits one JSON
/// object per line; development uses the compact human format.
pub fn init(environment: Environment) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if environment.is_production() {
        fmt().with_env_filter(filter).json().with_current_span(false).try_init()
    } else {
        fmt().with_env_filter(filter).compact().with_target(true).try_init()
    };

    if let Err(e) = result {
        tracing::warn!(error = %e, "tracing init failed");
    }
}
