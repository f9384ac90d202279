//! Tracing initialization, exposing the `init_tracing()` entry point called
//! from `main`.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the global `tracing` subscriber.
///
/// Respects `RUST_LOG` if set; otherwise falls back to `LOG_LEVEL`
/// (defaulting to `info`). Uses a compact human-readable formatter on an
/// interactive terminal and structured JSON otherwise, so container log
/// collectors get parseable output without developers losing readability
/// at a terminal.
pub fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let registry = tracing_subscriber::registry().with(filter);

    if is_terminal() {
        registry.with(fmt::layer().with_target(false).compact()).init();
    } else {
        registry.with(fmt::layer().json().with_current_span(true)).init();
    }
}

fn is_terminal() -> bool {
    use std::io::IsTerminal;
    std::io::stdout().is_terminal()
}
