//! Host system control
//!
//! Everything that shells out to the service manager or a package manager
//! sits behind [`SystemControl`], so the rest of the crate can be exercised
//! without touching the host.

use crate::provision::PackageManager;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// State of the daemon's unit as reported by the service manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
}

impl ServiceState {
    /// Map `systemctl is-active` output onto a state
    pub fn from_is_active(output: &str) -> Self {
        match output.trim() {
            "active" => Self::Running,
            "activating" | "reloading" => Self::Starting,
            _ => Self::Stopped,
        }
    }
}

#[async_trait]
pub trait SystemControl: Send + Sync {
    async fn service_status(&self, unit: &str) -> Result<ServiceState>;

    async fn service_start(&self, unit: &str) -> Result<()>;

    async fn service_restart(&self, unit: &str) -> Result<()>;

    /// Install `packages`, running every step the manager needs
    async fn package_install(&self, manager: PackageManager, packages: &[String]) -> Result<()>;

    /// Whether `command` resolves on `PATH`
    fn command_available(&self, command: &str) -> bool;
}

/// [`SystemControl`] backed by systemd and the distribution's package tools
#[derive(Debug, Default)]
pub struct Systemd;

#[async_trait]
impl SystemControl for Systemd {
    async fn service_status(&self, unit: &str) -> Result<ServiceState> {
        // is-active exits non-zero for anything but "active", so only stdout matters
        let output = Command::new("systemctl")
            .args(["is-active", unit])
            .output()
            .await
            .context("Failed to run systemctl")?;
        let state = ServiceState::from_is_active(&String::from_utf8_lossy(&output.stdout));
        debug!("{} is {:?}", unit, state);
        Ok(state)
    }

    async fn service_start(&self, unit: &str) -> Result<()> {
        run("systemctl", &["start".to_string(), unit.to_string()]).await
    }

    async fn service_restart(&self, unit: &str) -> Result<()> {
        run("systemctl", &["restart".to_string(), unit.to_string()]).await
    }

    async fn package_install(&self, manager: PackageManager, packages: &[String]) -> Result<()> {
        for argv in manager.invocations(packages) {
            let Some((program, args)) = argv.split_first() else {
                continue;
            };
            run(program, args).await?;
        }
        Ok(())
    }

    fn command_available(&self, command: &str) -> bool {
        which::which(command).is_ok()
    }
}

async fn run(program: &str, args: &[String]) -> Result<()> {
    let cmdline = format!("{} {}", program, args.join(" "));
    debug!("Running `{}`", cmdline);

    let status = Command::new(program)
        .args(args)
        .status()
        .await
        .with_context(|| format!("Failed to spawn `{}`", cmdline))?;

    if !status.success() {
        bail!("`{}` failed with {}", cmdline, status);
    }
    Ok(())
}

/// Whether the process runs with an effective uid of root
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

/// Fail unless running as root
pub fn ensure_root() -> Result<()> {
    if !is_root() {
        bail!("This tool must be run as root (e.g., sudo torshift)");
    }
    Ok(())
}
