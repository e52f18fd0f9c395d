//! Structured logging configuration.
//!
//! The engine only emits `tracing` events; embedding processes call
//! [`init_logging`] once at startup to install a subscriber. `RUST_LOG`
//! takes precedence over the configured level.
//!
//! JSON output has one object per line:
//!
//! ```json
//! {"timestamp":"...","level":"WARN","target":"rbac_server::saga","fields":{"message":"compensation failed","step":"set_role_parents"}}
//! ```

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

use crate::config::LoggingSettings;

/// Configuration for structured logging.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// JSON lines (true) or human-readable text (false).
    pub json_format: bool,
    /// Level used when `RUST_LOG` is not set.
    pub default_level: Level,
    /// Emit span enter/exit events.
    pub include_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json_format: false,
            default_level: Level::INFO,
            include_spans: false,
        }
    }
}

impl LoggingConfig {
    pub fn json() -> Self {
        Self {
            json_format: true,
            ..Default::default()
        }
    }

    pub fn text() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.include_spans = true;
        self
    }

    /// Builds the logging configuration from the `logging` section.
    ///
    /// Unparseable levels fall back to INFO; [`RbacConfig::validate`]
    /// rejects them before this point in normal use.
    ///
    /// [`RbacConfig::validate`]: crate::config::RbacConfig::validate
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        let level = Level::from_str(settings.level.trim()).unwrap_or(Level::INFO);
        Self {
            json_format: settings.json,
            default_level: level,
            include_spans: false,
        }
    }
}

/// Installs the global subscriber.
///
/// Returns false when a global subscriber was already installed, in which
/// case the existing one is kept.
pub fn init_logging(config: LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_level.to_string()));

    let span_events = if config.include_spans {
        FmtSpan::ENTER | FmtSpan::EXIT
    } else {
        FmtSpan::NONE
    };

    if config.json_format {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .json()
                .with_span_events(span_events)
                .with_current_span(true)
                .with_target(true)
                .with_file(false)
                .with_line_number(false),
        );
        tracing::subscriber::set_global_default(subscriber).is_ok()
    } else {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .with_span_events(span_events)
                .with_target(true),
        );
        tracing::subscriber::set_global_default(subscriber).is_ok()
    }
}

/// A JSON subscriber writing to `writer`, for capturing logs in tests.
pub fn create_json_layer<W>(writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(EnvFilter::new("trace"))
        .with(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_current_span(true),
        )
}
