//! Logging setup for processes embedding the engine.

mod logging;

pub use logging::{create_json_layer, init_logging, LoggingConfig};
