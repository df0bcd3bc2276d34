// ABOUTME: Library half of the cellar binary
// ABOUTME: Logging bootstrap, runtime wiring and the command handlers

pub mod commands;
pub mod context;

pub use context::{AppContext, TracingSink};

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber. `RUST_LOG` wins; otherwise `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber may already be set when embedded in tests
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
