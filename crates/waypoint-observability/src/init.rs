use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Wire an `EnvFilter` plus either a human-readable or JSON `fmt` layer into
/// the global default subscriber.
///
/// Call once, near process start. Safe to call from a binary embedding this
/// crate; library code should never call it itself.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_current_span(true)).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
