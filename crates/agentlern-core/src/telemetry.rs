//! Log sink for the library crates.
//!
//! With the `telemetry` feature messages go through `tracing`; otherwise
//! they are written to stderr.

pub fn info(message: &str) {
    #[cfg(feature = "telemetry")]
    tracing::info!("{message}");
    #[cfg(not(feature = "telemetry"))]
    eprintln!("{message}");
}

pub fn warn(message: &str) {
    #[cfg(feature = "telemetry")]
    tracing::warn!("{message}");
    #[cfg(not(feature = "telemetry"))]
    eprintln!("Warning: {message}");
}

/// Only emitted with the `telemetry` feature.
pub fn debug(message: &str) {
    #[cfg(feature = "telemetry")]
    tracing::debug!("{message}");
    #[cfg(not(feature = "telemetry"))]
    let _ = message;
}
