//! Process-wide log setup for the `slalapse` binary.
//!
//! Library code logs through the `log` facade and opens `tracing` spans
//! around finalization. Both end up in one `tracing-subscriber` registry.

use std::str::FromStr;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "slalapse=debug,info"
    } else {
        "info"
    }
}

/// Installs the global subscriber and bridges `log` records into it.
/// `RUST_LOG` overrides the default filter.
pub fn init(verbose: bool, format: LogFormat) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(verbose)))
        .map_err(|e| format!("Invalid log filter: {}", e))?;

    tracing_log::LogTracer::init().map_err(|e| format!("Failed to bridge log records: {}", e))?;

    let registry = Registry::default().with(filter);
    let result = match format {
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_target(true)),
        ),
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_current_span(true)),
        ),
    };
    result.map_err(|e| format!("Failed to install subscriber: {}", e))
}
