//! Dependency provisioning
//!
//! Detects the distribution from `/etc/os-release` and installs whichever of
//! curl, tor and netcat is missing with the matching package manager.

use crate::system::SystemControl;
use anyhow::{bail, Context, Result};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

pub const OS_RELEASE: &str = "/etc/os-release";

/// Commands the run depends on
const REQUIRED_COMMANDS: &[&str] = &["curl", "tor", "nc"];

/// Package manager families the installer knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Yum,
    Pacman,
}

impl PackageManager {
    /// Match a distribution `NAME` against the supported families
    pub fn for_distro(distro: &str) -> Option<Self> {
        let matches = |names: &[&str]| names.iter().any(|n| distro.contains(n));

        if matches(&["Ubuntu", "Debian", "Kali"]) {
            Some(Self::Apt)
        } else if matches(&["Fedora", "CentOS", "Red Hat", "Amazon Linux"]) {
            Some(Self::Yum)
        } else if matches(&["Arch"]) {
            Some(Self::Pacman)
        } else {
            None
        }
    }

    /// The argv of every process needed to install `packages`, in order
    pub fn invocations(self, packages: &[String]) -> Vec<Vec<String>> {
        let with_packages = |base: &[&str]| {
            base.iter()
                .map(|s| s.to_string())
                .chain(packages.iter().cloned())
                .collect::<Vec<_>>()
        };

        match self {
            Self::Apt => vec![
                vec!["apt-get".to_string(), "update".to_string()],
                with_packages(&["apt-get", "install", "-y"]),
            ],
            Self::Yum => vec![with_packages(&["yum", "install", "-y"])],
            Self::Pacman => vec![with_packages(&["pacman", "-Syu", "--noconfirm"])],
        }
    }

    /// Package providing `command` under this family
    fn package_for(self, command: &str) -> &str {
        match (self, command) {
            (Self::Pacman, "nc") => "netcat-openbsd",
            (_, "nc") => "netcat",
            (_, other) => other,
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Apt => "apt-get",
            Self::Yum => "yum",
            Self::Pacman => "pacman",
        };
        f.write_str(name)
    }
}

/// Extract the `NAME=` value from os-release content
pub fn distro_name(os_release: &str) -> String {
    os_release
        .lines()
        .find_map(|line| line.strip_prefix("NAME="))
        .map(|value| value.trim().trim_matches('"').to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Read the distribution name, `Unknown` when the file is unreadable
pub fn detect_distro(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(content) => distro_name(&content),
        Err(e) => {
            debug!("Could not read {}: {}", path.display(), e);
            "Unknown".to_string()
        },
    }
}

/// Install missing dependencies for `distro`.
///
/// Returns the packages that were installed. An unsupported distribution is
/// rejected before anything is checked or installed.
pub async fn provision(system: &dyn SystemControl, distro: &str) -> Result<Vec<String>> {
    info!("Detected Linux distribution: {}", distro);

    let Some(manager) = PackageManager::for_distro(distro) else {
        bail!(
            "Unsupported distribution '{}'. Install {} manually.",
            distro,
            REQUIRED_COMMANDS.join(", ")
        );
    };

    let missing: Vec<String> = REQUIRED_COMMANDS
        .iter()
        .filter(|cmd| !system.command_available(cmd))
        .map(|cmd| manager.package_for(cmd).to_string())
        .collect();

    if missing.is_empty() {
        info!("Dependencies ({}) already installed.", REQUIRED_COMMANDS.join(", "));
        return Ok(missing);
    }

    info!("Installing missing packages: {}", missing.join(", "));
    if manager == PackageManager::Pacman {
        info!("Arch Linux detected: performing full system update to install packages...");
    }

    system
        .package_install(manager, &missing)
        .await
        .with_context(|| format!("Failed to install packages with {}", manager))?;

    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::testing::FakeSystem;

    #[test]
    fn test_distro_name_strips_quotes() {
        let content = "PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\nNAME=\"Debian GNU/Linux\"\nID=debian\n";
        assert_eq!(distro_name(content), "Debian GNU/Linux");
    }

    #[test]
    fn test_distro_name_missing_key() {
        assert_eq!(distro_name("ID=alpine\n"), "Unknown");
    }

    #[test]
    fn test_detect_distro_missing_file() {
        assert_eq!(detect_distro(Path::new("/nonexistent/os-release")), "Unknown");
    }

    #[test]
    fn test_family_matching() {
        assert_eq!(PackageManager::for_distro("Ubuntu"), Some(PackageManager::Apt));
        assert_eq!(PackageManager::for_distro("Kali GNU/Linux"), Some(PackageManager::Apt));
        assert_eq!(PackageManager::for_distro("Amazon Linux"), Some(PackageManager::Yum));
        assert_eq!(PackageManager::for_distro("Red Hat Enterprise Linux"), Some(PackageManager::Yum));
        assert_eq!(PackageManager::for_distro("Arch Linux"), Some(PackageManager::Pacman));
        assert_eq!(PackageManager::for_distro("Alpine Linux"), None);
        assert_eq!(PackageManager::for_distro("Unknown"), None);
    }

    #[test]
    fn test_apt_updates_before_install() {
        let argv = PackageManager::Apt.invocations(&["tor".to_string()]);
        assert_eq!(argv[0], ["apt-get", "update"]);
        assert_eq!(argv[1], ["apt-get", "install", "-y", "tor"]);
    }

    #[tokio::test]
    async fn test_unsupported_distro_installs_nothing() {
        let system = FakeSystem::default();
        let err = provision(&system, "Alpine Linux").await.unwrap_err();
        assert!(err.to_string().contains("Unsupported distribution 'Alpine Linux'"));
        assert_eq!(system.count("install"), 0);
    }

    #[tokio::test]
    async fn test_only_missing_packages_installed() {
        let system = FakeSystem {
            installed: ["curl".to_string()].into_iter().collect(),
            ..FakeSystem::default()
        };
        let installed = provision(&system, "Arch Linux").await.unwrap();
        assert_eq!(installed, ["tor", "netcat-openbsd"]);
        assert_eq!(system.calls(), ["install pacman tor netcat-openbsd"]);
    }

    #[tokio::test]
    async fn test_nothing_missing_is_a_no_op() {
        let system = FakeSystem {
            installed: REQUIRED_COMMANDS.iter().map(|c| c.to_string()).collect(),
            ..FakeSystem::default()
        };
        assert!(provision(&system, "Ubuntu").await.unwrap().is_empty());
        assert!(system.calls().is_empty());
    }

    #[tokio::test]
    async fn test_install_failure_is_fatal() {
        let system = FakeSystem {
            fail_install: true,
            ..FakeSystem::default()
        };
        let err = provision(&system, "Fedora Linux").await.unwrap_err();
        assert!(format!("{err:#}").contains("Failed to install packages with yum"));
        assert_eq!(system.count("install yum"), 1);
    }

    #[test]
    fn test_pacman_netcat_package() {
        assert_eq!(PackageManager::Pacman.package_for("nc"), "netcat-openbsd");
        assert_eq!(PackageManager::Yum.package_for("nc"), "netcat");
        assert_eq!(PackageManager::Apt.package_for("tor"), "tor");
    }
}
