//! Optional capabilities installed after storage is in place.
//!
//! The pipeline only ever sees the [`Provisioner`] contract; how each one
//! drives packages, units or config files stays behind it.

pub mod automation;
pub mod backup;
pub mod dyndns;
pub mod security;
pub mod service;

use std::{
    fs, io,
    os::unix::fs::PermissionsExt,
    path::Path,
};

use tracing::debug;

use crate::{
    cmd,
    config::{Config, ConfigDelta, Service},
    error::{ForgeError, ProvisionError},
    paths::Paths,
    pkg::PackageManager,
    probe::Distro,
};

// ── Contract ──────────────────────────────────────────────────────────────────

pub trait Provisioner {
    fn name(&self) -> &str;
    /// Whether `config` asks for this capability at all.
    fn wanted(&self, config: &Config) -> bool;
    fn is_installed(&self) -> bool;
    /// Whether an installed capability still matches `config`. Drifted ones
    /// are installed again, so `install` must be safe to repeat.
    fn in_sync(&self, _config: &Config) -> bool {
        true
    }
    fn install(&mut self, config: &Config) -> Result<ServiceRecord, ProvisionError>;
    fn restart(&mut self) -> Result<(), ProvisionError>;
    /// Removing something that was never installed succeeds.
    fn uninstall(&mut self) -> Result<(), ProvisionError>;
}

/// What an install produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceRecord {
    pub name: String,
    pub unit: Option<String>,
    pub ports: Vec<u16>,
    /// Changes the provisioner wants recorded in the config document.
    pub deltas: Vec<ConfigDelta>,
}

impl ServiceRecord {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }
}

/// Every provisioner this host knows about, in install order.
pub fn registry(distro: Distro, paths: &Paths) -> Vec<Box<dyn Provisioner>> {
    let manager = PackageManager::for_distro(distro);
    let mut all: Vec<Box<dyn Provisioner>> = vec![
        Box::new(security::SshHardening::new(paths)),
        Box::new(security::Firewall::new(distro)),
        Box::new(security::Fail2ban::new(manager)),
        Box::new(dyndns::DuckDns::new(paths)),
    ];
    for service in Service::ALL {
        if let Some(p) = service::ServiceProvisioner::for_service(service, manager, paths) {
            all.push(Box::new(p));
        }
    }
    all.push(Box::new(backup::UsbBackup::new(paths)));
    all.push(Box::new(automation::Automation::new(manager, paths)));
    all
}

// ── Shared helpers ────────────────────────────────────────────────────────────

pub(crate) fn run(name: &str, program: &str, args: &[&str]) -> Result<(), ProvisionError> {
    cmd::run_interactive(program, args).map_err(|e| ProvisionError::from_forge(name, e))
}

/// Pipes a vendor install script into `sh`.
pub(crate) fn run_script(name: &str, url: &str, args: &[&str]) -> Result<(), ProvisionError> {
    let line = if args.is_empty() {
        format!("curl -fsSL {} | sh", url)
    } else {
        format!("curl -fsSL {} | sh -s -- {}", url, args.join(" "))
    };
    run(name, "sh", &["-c", &line])
}

pub(crate) fn install_packages(
    name: &str,
    manager: Option<PackageManager>,
    packages: &[&str],
) -> Result<(), ProvisionError> {
    let manager = manager
        .ok_or_else(|| ProvisionError::unsupported(name, "no supported package manager on this distro"))?;
    let args = manager.install_args(packages);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    run(name, manager.program(), &args)
}

/// Writes `content` to `path` with `mode`, creating parent directories.
pub(crate) fn write_file(name: &str, path: &Path, content: &str, mode: u32) -> Result<(), ProvisionError> {
    let io_err = |source: io::Error| ProvisionError::Io {
        name: name.to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, content).map_err(io_err)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(io_err)?;
    debug!(provisioner = name, path = %path.display(), "file written");
    Ok(())
}

pub(crate) fn remove_file(name: &str, path: &Path) -> Result<(), ProvisionError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ProvisionError::Io {
            name: name.to_string(),
            source,
        }),
    }
}

pub(crate) fn unit_error(name: &str) -> impl Fn(ForgeError) -> ProvisionError + '_ {
    move |e| ProvisionError::from_forge(name, e)
}
