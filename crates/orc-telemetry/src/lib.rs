//! Logging setup shared by the orc binaries.
//!
//! Human-readable or JSON output via `tracing-subscriber`, filtered by
//! `RUST_LOG` when set and by the configured level otherwise.

pub mod logging;

pub use logging::{init, LogOutput, LoggingConfig};
