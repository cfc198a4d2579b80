// ── Logging bootstrap ─────────────────────────────────────────────────────────

use crate::config::{LogFormat, LogSettings};
use crate::error::{Error, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set. The `logs-json`
/// feature forces JSON lines regardless of `settings.format`.
pub fn init_logging(settings: &LogSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .map_err(|e| Error::Config(format!("Invalid log level '{}': {}", settings.level, e)))?;

    let format = if cfg!(feature = "logs-json") {
        LogFormat::Json
    } else {
        settings.format
    };

    let installed = match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
    };

    installed.map_err(|e| Error::Config(format!("Logging already initialised: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_garbage_level() {
        std::env::remove_var("RUST_LOG");
        let settings = LogSettings {
            level: "easyshell=notalevel".into(),
            format: LogFormat::Text,
        };
        assert!(matches!(init_logging(&settings), Err(Error::Config(_))));
    }
}
