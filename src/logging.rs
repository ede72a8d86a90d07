//! Logging configuration
//!
//! Diagnostics go to stderr through tracing; stdout is left to the operator
//! facing output (banner, prompts, `New IP:` lines).

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Initialize logging, honouring `RUST_LOG` when it is set
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("torshift=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
