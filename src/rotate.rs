//! Circuit rotation
//!
//! NEWNYM over the control port is tried first. Any failure of that session
//! falls back to restarting the whole service; only a failed restart stops
//! the run.

use crate::config::RunConfig;
use crate::control;
use crate::system::SystemControl;
use anyhow::{Context, Result};
use std::fmt;
use tokio::time;
use tracing::{info, warn};

/// How a rotation was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPath {
    /// `SIGNAL NEWNYM` accepted on the control port
    Signal,
    /// The control session failed and the service was restarted
    Restart,
}

impl fmt::Display for RotationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal => f.write_str("new circuit"),
            Self::Restart => f.write_str("service restart"),
        }
    }
}

/// Request a new circuit and wait for it to settle
pub async fn rotate(system: &dyn SystemControl, config: &RunConfig) -> Result<RotationPath> {
    let timings = &config.timings;
    info!("Requesting new Tor circuit...");

    match control::request_new_circuit(&config.control, timings.control_timeout).await {
        Ok(()) => {
            time::sleep(timings.signal_settle).await;
            Ok(RotationPath::Signal)
        },
        Err(e) => {
            warn!(
                "Failed to use control port ({}): {}; restarting Tor...",
                config.control, e
            );
            system
                .service_restart(&config.service)
                .await
                .with_context(|| format!("Failed to restart {}", config.service))?;
            time::sleep(timings.restart_settle).await;
            Ok(RotationPath::Restart)
        },
    }
}
