//! Logging setup.
//!
//! `tracing` events go to a single fmt layer filtered by `RUST_LOG`; records
//! from the `log` macros used in the IMAP client and the job store are
//! forwarded into the same subscriber.

use std::sync::Once;

use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Installs the global subscriber. Later calls are no-ops.
///
/// `RUST_LOG` controls levels (e.g. `info`, `sheetrelay::dispatch=debug`);
/// the default is `info`.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let installed = match format {
            LogFormat::Json => tracing::subscriber::set_global_default(
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json().with_current_span(true)),
            ),
            LogFormat::Text => tracing::subscriber::set_global_default(
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_target(false)),
            ),
        };
        if let Err(e) = installed {
            eprintln!("tracing subscriber already installed: {}", e);
            return;
        }

        if let Err(e) = tracing_log::LogTracer::init() {
            tracing::warn!(error = %e, "log records will not be captured");
        }
    });
}
