//! Read-only environment facts.
//!
//! Every probe tolerates a missing command or file and degrades to an
//! unknown value instead of failing the run.

use std::{
    collections::BTreeMap,
    fmt, fs,
    net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    cmd,
    config::{Config, FirewallTool, Service},
    error::ForgeError,
    lsblk::{self, BlockDevice, BlockInventory},
};

const REACHABILITY_TARGET: ([u8; 4], u16) = ([1, 1, 1, 1], 53);
const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(3);
const PORT_TIMEOUT: Duration = Duration::from_millis(500);
const DNS_PROBE_HOST: &str = "duckduckgo.com";
const APPARMOR_FLAG: &str = "/sys/module/apparmor/parameters/enabled";

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distro {
    Debian,
    Ubuntu,
    Arch,
    Fedora,
    Alpine,
    #[serde(rename = "opensuse")]
    OpenSuse,
    Proxmox,
    #[serde(rename = "truenas")]
    TrueNas,
    Unknown,
}

impl fmt::Display for Distro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Distro::Debian => "Debian",
            Distro::Ubuntu => "Ubuntu",
            Distro::Arch => "Arch",
            Distro::Fedora => "Fedora",
            Distro::Alpine => "Alpine",
            Distro::OpenSuse => "openSUSE",
            Distro::Proxmox => "Proxmox",
            Distro::TrueNas => "TrueNAS",
            Distro::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// RAM and free space on `/`, in GB. `None` means the fact is unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Resources {
    pub ram_gb: Option<f64>,
    pub free_disk_gb: Option<f64>,
}

/// Mandatory access control frameworks that can get in a service's way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityModules {
    /// `getenforce` output; `None` without SELinux tooling.
    pub selinux: Option<String>,
    pub apparmor: bool,
}

impl SecurityModules {
    pub fn selinux_enforcing(&self) -> bool {
        self.selinux
            .as_deref()
            .is_some_and(|mode| mode.eq_ignore_ascii_case("enforcing"))
    }
}

/// Service name → ports it wants.
pub type PortRequest = BTreeMap<String, Vec<u16>>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PortConflict {
    pub service: String,
    pub port: u16,
}

// ── Probe contract ────────────────────────────────────────────────────────────

pub trait Probe {
    /// True iff a direct connection to a well-known public address succeeds.
    fn reachability(&self) -> bool;
    fn dns(&self) -> Option<IpAddr>;
    fn resources(&self) -> Resources;
    fn distro(&self) -> Distro;
    fn time_synced(&self) -> Option<bool>;
    fn live_boot(&self) -> bool;
    fn block_devices(&self) -> BlockInventory;
    /// IPv4 address per interface.
    fn interfaces(&self) -> BTreeMap<String, Ipv4Addr>;
    /// True when something already accepts connections on the local port.
    fn is_listening(&self, port: u16) -> bool;
    /// Raw mount table, for diagnostics and mount checks.
    fn mount_table(&self) -> Option<String>;
    /// Raw UUID/label listing, for diagnostics.
    fn uuid_table(&self) -> Option<String>;
    fn security_modules(&self) -> SecurityModules;
    /// The rule set `tool` currently enforces, as the tool prints it.
    fn firewall_rules(&self, tool: FirewallTool) -> Option<String>;

    /// USB-attached disks, mounted or not.
    fn usb_devices(&self) -> Vec<BlockDevice> {
        let inv = self.block_devices();
        inv.mounted
            .into_iter()
            .chain(inv.unmounted)
            .filter(BlockDevice::is_usb)
            .collect()
    }

    /// Requested ports that are already in use.
    fn ports(&self, requested: &PortRequest) -> Vec<PortConflict> {
        let mut conflicts = Vec::new();
        for (service, ports) in requested {
            for &port in ports {
                if self.is_listening(port) {
                    conflicts.push(PortConflict {
                        service: service.clone(),
                        port,
                    });
                }
            }
        }
        conflicts
    }

    fn mount_points(&self) -> Vec<String> {
        self.mount_table()
            .map(|t| parse_mount_points(&t))
            .unwrap_or_default()
    }
}

/// Preflight facts gathered once at the start of a run.
#[derive(Debug, Clone)]
pub struct Facts {
    pub internet: bool,
    pub dns: Option<IpAddr>,
    pub resources: Resources,
    pub time_synced: Option<bool>,
    pub distro: Distro,
    pub live_boot: bool,
    pub security: SecurityModules,
}

impl Facts {
    pub fn gather(probe: &dyn Probe) -> Self {
        let facts = Self {
            internet: probe.reachability(),
            dns: probe.dns(),
            resources: probe.resources(),
            time_synced: probe.time_synced(),
            distro: probe.distro(),
            live_boot: probe.live_boot(),
            security: probe.security_modules(),
        };
        debug!(?facts, "preflight facts gathered");
        facts
    }
}

/// Ports SSH and each enabled service (for which `include` holds) will need.
pub fn requested_ports(config: &Config, include: impl Fn(Service) -> bool) -> PortRequest {
    let mut request = PortRequest::new();
    request.insert("ssh".into(), vec![config.security.ssh_port]);
    for service in config.enabled_services().filter(|s| include(*s)) {
        let ports = config.service_ports(service);
        if !ports.is_empty() {
            request.insert(service.to_string(), ports);
        }
    }
    request
}

// ── Host implementation ───────────────────────────────────────────────────────

/// Probes the machine this process runs on.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl Probe for SystemProbe {
    fn reachability(&self) -> bool {
        let (ip, port) = REACHABILITY_TARGET;
        let addr = SocketAddr::from((ip, port));
        match TcpStream::connect_timeout(&addr, REACHABILITY_TIMEOUT) {
            Ok(_) => true,
            Err(e) => {
                warn!("reachability check failed: {}", e);
                false
            }
        }
    }

    fn dns(&self) -> Option<IpAddr> {
        match (DNS_PROBE_HOST, 443).to_socket_addrs() {
            Ok(mut addrs) => addrs.next().map(|a| a.ip()),
            Err(e) => {
                warn!("DNS resolution of {} failed: {}", DNS_PROBE_HOST, e);
                None
            }
        }
    }

    fn resources(&self) -> Resources {
        let ram_gb = fs::read_to_string("/proc/meminfo")
            .map_err(|e| ForgeError::degraded("RAM", e))
            .and_then(|s| parse_meminfo_gb(&s));
        let free_disk_gb = cmd::run_capture("df", &["-Pk", "/"])
            .map_err(|e| ForgeError::degraded("free disk", e))
            .and_then(|s| parse_df_free_gb(&s));

        Resources {
            ram_gb: degrade(ram_gb),
            free_disk_gb: degrade(free_disk_gb),
        }
    }

    fn distro(&self) -> Distro {
        match fs::read_to_string("/etc/os-release") {
            Ok(s) => parse_os_release(&s),
            Err(e) => {
                warn!("cannot read /etc/os-release: {}", e);
                Distro::Unknown
            }
        }
    }

    fn time_synced(&self) -> Option<bool> {
        let out = cmd::run_capture("timedatectl", &["show", "-p", "NTPSynchronized", "--value"])
            .map_err(|e| ForgeError::degraded("clock sync", e));
        degrade(out.map(|s| s.trim() == "yes"))
    }

    fn live_boot(&self) -> bool {
        fs::read_to_string("/proc/cmdline")
            .map(|c| c.contains("boot=live") || c.contains("live-media"))
            .unwrap_or(false)
    }

    fn block_devices(&self) -> BlockInventory {
        degrade(lsblk::inventory()).unwrap_or_default()
    }

    fn interfaces(&self) -> BTreeMap<String, Ipv4Addr> {
        let out = cmd::run_capture("ip", &["-o", "-4", "addr", "show"])
            .map_err(|e| ForgeError::degraded("network interfaces", e));
        degrade(out).map(|s| parse_ip_addr(&s)).unwrap_or_default()
    }

    fn is_listening(&self, port: u16) -> bool {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        TcpStream::connect_timeout(&addr, PORT_TIMEOUT).is_ok()
    }

    fn mount_table(&self) -> Option<String> {
        let table = fs::read_to_string("/proc/self/mounts")
            .map_err(|e| ForgeError::degraded("mount table", e));
        degrade(table)
    }

    fn uuid_table(&self) -> Option<String> {
        degrade(cmd::run_capture("blkid", &[]).map_err(|e| ForgeError::degraded("UUID map", e)))
    }

    fn security_modules(&self) -> SecurityModules {
        let selinux = if cmd::is_available("getenforce") {
            let mode = cmd::run_capture("getenforce", &[]).map_err(|e| ForgeError::degraded("SELinux", e));
            degrade(mode).map(|m| m.trim().to_string())
        } else {
            None
        };
        let apparmor = fs::read_to_string(APPARMOR_FLAG)
            .map(|flag| flag.trim() == "Y")
            .unwrap_or(false);
        SecurityModules { selinux, apparmor }
    }

    fn firewall_rules(&self, tool: FirewallTool) -> Option<String> {
        let listing = match tool {
            FirewallTool::Ufw => cmd::run_capture("ufw", &["status", "verbose"]),
            FirewallTool::Firewalld => cmd::run_capture("firewall-cmd", &["--list-all"]),
        };
        degrade(listing.map_err(|e| ForgeError::degraded("firewall rules", e)))
    }
}

fn degrade<T>(result: Result<T, ForgeError>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("{}", e);
            None
        }
    }
}

// ── Parsers ───────────────────────────────────────────────────────────────────

pub fn parse_os_release(content: &str) -> Distro {
    let mut id = String::new();
    let mut id_like = String::new();
    for line in content.lines() {
        if let Some(v) = line.strip_prefix("ID=") {
            id = v.trim_matches('"').to_lowercase();
        } else if let Some(v) = line.strip_prefix("ID_LIKE=") {
            id_like = v.trim_matches('"').to_lowercase();
        }
    }

    let by_id = match id.as_str() {
        "debian" => Some(Distro::Debian),
        "ubuntu" => Some(Distro::Ubuntu),
        "arch" => Some(Distro::Arch),
        "fedora" => Some(Distro::Fedora),
        "alpine" => Some(Distro::Alpine),
        "proxmox" => Some(Distro::Proxmox),
        "truenas" => Some(Distro::TrueNas),
        s if s == "suse" || s.starts_with("opensuse") || s == "sles" => Some(Distro::OpenSuse),
        _ => None,
    };
    if let Some(d) = by_id {
        return d;
    }

    for like in id_like.split_whitespace() {
        match like {
            "debian" | "ubuntu" => return Distro::Debian,
            "arch" => return Distro::Arch,
            "fedora" | "rhel" => return Distro::Fedora,
            "suse" => return Distro::OpenSuse,
            _ => {}
        }
    }
    Distro::Unknown
}

pub fn parse_meminfo_gb(content: &str) -> Result<f64, ForgeError> {
    let kb = content
        .lines()
        .find_map(|l| l.strip_prefix("MemTotal:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| ForgeError::degraded("RAM", "no MemTotal line"))?;
    Ok(round2(kb as f64 / 1024.0 / 1024.0))
}

pub fn parse_df_free_gb(content: &str) -> Result<f64, ForgeError> {
    // Filesystem 1024-blocks Used Available Capacity Mounted-on
    let kb = content
        .lines()
        .nth(1)
        .and_then(|l| l.split_whitespace().nth(3))
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| ForgeError::degraded("free disk", "unexpected df output"))?;
    Ok(round2(kb as f64 / 1024.0 / 1024.0))
}

/// Parses `ip -o -4 addr show`. Lines look like
/// `2: eth0    inet 192.168.1.10/24 brd 192.168.1.255 scope global eth0`.
pub fn parse_ip_addr(content: &str) -> BTreeMap<String, Ipv4Addr> {
    let mut found = BTreeMap::new();
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(pos) = fields.iter().position(|f| *f == "inet") else { continue };
        let (Some(name), Some(cidr)) = (fields.get(1), fields.get(pos + 1)) else { continue };
        let addr = cidr.split('/').next().unwrap_or("");
        if let Ok(ip) = addr.parse::<Ipv4Addr>() {
            found.insert(name.trim_end_matches(':').to_string(), ip);
        }
    }
    found
}

/// Second field of each `/proc/self/mounts` line, with `\040` unescaped.
pub fn parse_mount_points(table: &str) -> Vec<String> {
    table
        .lines()
        .filter_map(|l| l.split_whitespace().nth(1))
        .map(|p| p.replace("\\040", " "))
        .collect()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
