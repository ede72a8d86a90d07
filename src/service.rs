//! Tor service lifecycle

use crate::system::{ServiceState, SystemControl};
use anyhow::{bail, Context, Result};
use std::time::Duration;
use tokio::time;
use tracing::info;

/// Bring `unit` to the running state.
///
/// A single start is attempted; if the unit is still not running once
/// `settle` has passed the run cannot continue.
pub async fn ensure_running(system: &dyn SystemControl, unit: &str, settle: Duration) -> Result<()> {
    match system.service_status(unit).await? {
        ServiceState::Running => {
            info!("Tor service already running.");
            return Ok(());
        },
        ServiceState::Starting => {
            info!("Tor service is starting, waiting for it...");
        },
        ServiceState::Stopped => {
            info!("Starting Tor service...");
            system
                .service_start(unit)
                .await
                .with_context(|| format!("Failed to start {}", unit))?;
        },
    }

    time::sleep(settle).await;

    let state = system.service_status(unit).await?;
    if state != ServiceState::Running {
        bail!("{} is still {:?} after start", unit, state);
    }
    info!("✓ Tor service running");
    Ok(())
}
