use crate::{cmd, probe::Distro};

/// Native package managers the provisioners know how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Pacman,
    Apk,
    Zypper,
}

impl PackageManager {
    pub fn for_distro(distro: Distro) -> Option<Self> {
        match distro {
            Distro::Debian | Distro::Ubuntu | Distro::Proxmox => Some(PackageManager::Apt),
            Distro::Fedora => Some(PackageManager::Dnf),
            Distro::Arch => Some(PackageManager::Pacman),
            Distro::Alpine => Some(PackageManager::Apk),
            Distro::OpenSuse => Some(PackageManager::Zypper),
            Distro::TrueNas | Distro::Unknown => None,
        }
    }

    /// Picks the first manager found on `PATH`.
    pub fn detect() -> Option<Self> {
        [
            PackageManager::Apt,
            PackageManager::Dnf,
            PackageManager::Pacman,
            PackageManager::Zypper,
            PackageManager::Apk,
        ]
        .into_iter()
        .find(|m| cmd::is_available(m.program()))
    }

    pub fn program(self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get",
            PackageManager::Dnf => "dnf",
            PackageManager::Pacman => "pacman",
            PackageManager::Apk => "apk",
            PackageManager::Zypper => "zypper",
        }
    }

    /// Shell line that refreshes and upgrades every installed package.
    pub fn upgrade_command(self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get update && apt-get -y upgrade",
            PackageManager::Dnf => "dnf -y upgrade",
            PackageManager::Pacman => "pacman -Syu --noconfirm",
            PackageManager::Apk => "apk update && apk upgrade",
            PackageManager::Zypper => "zypper --non-interactive update",
        }
    }

    /// Non-interactive install arguments for `packages`.
    pub fn install_args(self, packages: &[&str]) -> Vec<String> {
        let head: &[&str] = match self {
            PackageManager::Apt => &["install", "-y"],
            PackageManager::Dnf => &["install", "-y"],
            PackageManager::Pacman => &["-S", "--noconfirm", "--needed"],
            PackageManager::Apk => &["add"],
            PackageManager::Zypper => &["--non-interactive", "install"],
        };
        head.iter()
            .chain(packages.iter())
            .map(|s| s.to_string())
            .collect()
    }
}
