use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::ForgeError, probe::Distro};

// ── Service catalog ───────────────────────────────────────────────────────────

/// Optional capabilities the operator can enable. Config keys must come from
/// this list; anything else fails to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Plex,
    Minecraft,
    Casaos,
    Cockpit,
    Warpinator,
    Virtualbox,
    Netdata,
    Duckdns,
    Restic,
    Tailscale,
    UsbBackup,
}

impl Service {
    pub const ALL: [Service; 11] = [
        Service::Plex,
        Service::Minecraft,
        Service::Casaos,
        Service::Cockpit,
        Service::Warpinator,
        Service::Virtualbox,
        Service::Netdata,
        Service::Duckdns,
        Service::Restic,
        Service::Tailscale,
        Service::UsbBackup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Service::Plex => "plex",
            Service::Minecraft => "minecraft",
            Service::Casaos => "casaos",
            Service::Cockpit => "cockpit",
            Service::Warpinator => "warpinator",
            Service::Virtualbox => "virtualbox",
            Service::Netdata => "netdata",
            Service::Duckdns => "duckdns",
            Service::Restic => "restic",
            Service::Tailscale => "tailscale",
            Service::UsbBackup => "usb_backup",
        }
    }

    /// Short description shown next to the install prompt.
    pub fn description(self) -> &'static str {
        match self {
            Service::Plex => "Stream media to TVs and mobile",
            Service::Minecraft => "Run Minecraft server (Fabric, Vanilla, etc)",
            Service::Casaos => "HomeLab GUI dashboard",
            Service::Cockpit => "Remote system monitoring",
            Service::Warpinator => "GUI-based LAN file transfers",
            Service::Virtualbox => "Virtual machine host",
            Service::Netdata => "Live system health + metrics",
            Service::Duckdns => "Dynamic DNS client",
            Service::Restic => "Backup system (remote or USB)",
            Service::Tailscale => "Mesh VPN for remote access",
            Service::UsbBackup => "Auto-runs backup when USB drive inserted",
        }
    }

    /// The service-manager unit that proves the service is running, if the
    /// service has one.
    pub fn unit(self) -> Option<&'static str> {
        match self {
            Service::Plex => Some("plexmediaserver.service"),
            Service::Minecraft => Some("minecraft.service"),
            Service::Casaos => Some("casaos.service"),
            Service::Cockpit => Some("cockpit.socket"),
            Service::Virtualbox => Some("vboxdrv.service"),
            Service::Netdata => Some("netdata.service"),
            Service::Duckdns => Some("duckdns.timer"),
            Service::Tailscale => Some("tailscaled.service"),
            Service::Warpinator | Service::Restic | Service::UsbBackup => None,
        }
    }

    /// Ports the service listens on unless overridden in its settings.
    pub fn default_ports(self) -> &'static [u16] {
        match self {
            Service::Plex => &[32400],
            Service::Minecraft => &[25565, 25566, 25567],
            Service::Casaos => &[80],
            Service::Cockpit => &[9090],
            Service::Netdata => &[19999],
            _ => &[],
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Credentials ───────────────────────────────────────────────────────────────

/// A credential that renders as `***` wherever it is formatted.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Admin {
    pub user: String,
    #[serde(default)]
    pub secret: Secret,
}

// ── Network / security ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub primary_interface: Option<String>,
    #[serde(default)]
    pub wifi_proxy: bool,
    #[serde(default)]
    pub dns: Option<DynDns>,
}

/// Dynamic-DNS credentials; the updater is only provisioned when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynDns {
    pub token: Secret,
    pub domain: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirewallTool {
    Ufw,
    Firewalld,
}

impl FirewallTool {
    pub fn for_distro(distro: Distro) -> Option<Self> {
        match distro {
            Distro::Debian | Distro::Ubuntu | Distro::Proxmox | Distro::TrueNas => {
                Some(FirewallTool::Ufw)
            }
            Distro::Fedora => Some(FirewallTool::Firewalld),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub firewall: Option<FirewallTool>,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
}

fn default_ssh_port() -> u16 {
    22
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            firewall: None,
            ssh_port: default_ssh_port(),
        }
    }
}

/// Service-specific options. `ports` overrides the catalog defaults; any
/// other key is kept verbatim for the service's provisioner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSettings {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,
    #[serde(flatten)]
    pub options: BTreeMap<String, serde_yaml::Value>,
}

// ── Storage records ───────────────────────────────────────────────────────────

/// A committed disk: formatted, mounted, and registered in fstab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRecord {
    pub uuid: String,
    pub mount_point: String,
    pub fs_type: String,
    pub fstab_line: String,
}

/// A USB device prepared as a backup target (mounted on demand only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbBackupTarget {
    pub label: String,
    pub mount_point: String,
    pub uuid: String,
}

// ── Config document ───────────────────────────────────────────────────────────

/// Operator intent, persisted as YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub system_name: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub admin: Admin,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub services: BTreeMap<Service, bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub service_settings: BTreeMap<Service, ServiceSettings>,
    #[serde(default)]
    pub mounts: Vec<MountRecord>,
    #[serde(default)]
    pub usb_backups: Vec<UsbBackupTarget>,
    #[serde(default)]
    pub automation_enabled: bool,
    /// Keys this version does not know about, carried through unchanged.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Config {
    pub fn new(system_name: impl Into<String>) -> Self {
        Self {
            system_name: system_name.into(),
            hostname: String::new(),
            admin: Admin::default(),
            network: NetworkConfig::default(),
            security: SecurityConfig::default(),
            services: BTreeMap::new(),
            service_settings: BTreeMap::new(),
            mounts: Vec::new(),
            usb_backups: Vec::new(),
            automation_enabled: false,
            extra: BTreeMap::new(),
        }
    }

    pub fn is_enabled(&self, service: Service) -> bool {
        self.services.get(&service).copied().unwrap_or(false)
    }

    pub fn enabled_services(&self) -> impl Iterator<Item = Service> + '_ {
        self.services
            .iter()
            .filter(|(_, on)| **on)
            .map(|(service, _)| *service)
    }

    /// Ports declared for `service`: the settings override, else the catalog.
    pub fn service_ports(&self, service: Service) -> Vec<u16> {
        match self.service_settings.get(&service) {
            Some(settings) if !settings.ports.is_empty() => settings.ports.clone(),
            _ => service.default_ports().to_vec(),
        }
    }

    pub fn has_mount_uuid(&self, uuid: &str) -> bool {
        self.mounts.iter().any(|m| m.uuid == uuid)
    }

    pub fn has_usb_uuid(&self, uuid: &str) -> bool {
        self.usb_backups.iter().any(|u| u.uuid == uuid)
    }

    /// Checks the document-level invariants.
    pub fn validate(&self) -> Result<(), ForgeError> {
        if self.system_name.trim().is_empty() {
            return Err(ForgeError::InvalidConfig("system name must not be empty".into()));
        }

        let ssh = self.security.ssh_port;
        if ssh == 0 {
            return Err(ForgeError::InvalidConfig("SSH port must be positive".into()));
        }

        let mut claimed: BTreeMap<u16, String> = BTreeMap::new();
        claimed.insert(ssh, "ssh".into());
        for service in self.enabled_services() {
            for port in self.service_ports(service) {
                if port == 0 {
                    return Err(ForgeError::InvalidConfig(format!(
                        "{service} declares port 0"
                    )));
                }
                if let Some(owner) = claimed.insert(port, service.to_string()) {
                    if owner != service.as_str() {
                        return Err(ForgeError::InvalidConfig(format!(
                            "port {port} is claimed by both {owner} and {service}"
                        )));
                    }
                }
            }
        }

        let mut points = BTreeSet::new();
        let mut uuids = BTreeSet::new();
        for m in &self.mounts {
            if !points.insert(m.mount_point.as_str()) {
                return Err(ForgeError::InvalidConfig(format!(
                    "mount point {} is registered twice",
                    m.mount_point
                )));
            }
            if !uuids.insert(m.uuid.as_str()) {
                return Err(ForgeError::InvalidConfig(format!(
                    "UUID {} is registered twice",
                    m.uuid
                )));
            }
        }

        Ok(())
    }
}

// ── Deltas ────────────────────────────────────────────────────────────────────

/// A partial update submitted to the config store.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigDelta {
    AddMount(MountRecord),
    AddUsbBackup(UsbBackupTarget),
    SetFirewall(Option<FirewallTool>),
    SetAutomation(bool),
}

impl ConfigDelta {
    /// Applies the delta in place. Re-adding a record whose UUID is already
    /// registered is a no-op; a different UUID on a taken mount point is an
    /// error.
    pub fn apply(self, config: &mut Config) -> Result<(), ForgeError> {
        match self {
            ConfigDelta::AddMount(record) => {
                if config.has_mount_uuid(&record.uuid) {
                    return Ok(());
                }
                if config.mounts.iter().any(|m| m.mount_point == record.mount_point) {
                    return Err(ForgeError::InvalidConfig(format!(
                        "mount point {} already belongs to another disk",
                        record.mount_point
                    )));
                }
                config.mounts.push(record);
            }
            ConfigDelta::AddUsbBackup(target) => {
                if !config.has_usb_uuid(&target.uuid) {
                    config.usb_backups.push(target);
                }
            }
            ConfigDelta::SetFirewall(tool) => config.security.firewall = tool,
            ConfigDelta::SetAutomation(on) => config.automation_enabled = on,
        }
        Ok(())
    }
}

// ── State cache ───────────────────────────────────────────────────────────────

/// Last-observed facts. Advisory only; rebuilt wholesale after each install.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateCache {
    pub last_run: DateTime<Utc>,
    pub distro: Distro,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub system_name: String,
    #[serde(default)]
    pub services: BTreeMap<Service, bool>,
    #[serde(default)]
    pub drives: Vec<String>,
}

impl StateCache {
    pub fn capture(config: &Config, distro: Distro, drives: Vec<String>, now: DateTime<Utc>) -> Self {
        Self {
            last_run: now,
            distro,
            hostname: config.hostname.clone(),
            system_name: config.system_name.clone(),
            services: config.services.clone(),
            drives,
        }
    }

    /// True when nothing the disk stages depend on has changed since the
    /// cache was written.
    pub fn matches(&self, config: &Config, distro: Distro, drives: &[String]) -> bool {
        self.distro == distro && self.services == config.services && self.drives == drives
    }
}
