//! Observability: structured logging and span helpers

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

pub use logging::{cycle_span, mqtt_span};
