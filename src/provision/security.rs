use std::{
    collections::BTreeSet,
    fs, io,
    path::PathBuf,
};

use tracing::info;

use crate::{
    cmd,
    config::{Config, ConfigDelta, FirewallTool},
    error::ProvisionError,
    paths::Paths,
    pkg::PackageManager,
    probe::Distro,
    units::{ServiceManager, Systemctl},
};

use super::{install_packages, run, unit_error, write_file, Provisioner, ServiceRecord};

// ── SSH hardening ─────────────────────────────────────────────────────────────

const SSH: &str = "ssh-hardening";

/// Disables root login and moves sshd to the configured port. The original
/// `sshd_config` is kept next to it and put back on uninstall.
pub struct SshHardening {
    config_path: PathBuf,
    units: Systemctl,
}

impl SshHardening {
    pub fn new(paths: &Paths) -> Self {
        Self {
            config_path: paths.sshd_config.clone(),
            units: Systemctl,
        }
    }

    fn backup_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.polyforge.bak", self.config_path.display()))
    }

    fn unit(&self) -> &'static str {
        if self.units.exists("sshd.service") {
            "sshd.service"
        } else {
            "ssh.service"
        }
    }
}

impl Provisioner for SshHardening {
    fn name(&self) -> &str {
        SSH
    }

    fn wanted(&self, _config: &Config) -> bool {
        true
    }

    fn is_installed(&self) -> bool {
        self.backup_path().exists()
    }

    fn in_sync(&self, config: &Config) -> bool {
        match fs::read_to_string(&self.config_path) {
            Ok(current) => is_hardened(&current, config.security.ssh_port),
            Err(_) => false,
        }
    }

    fn install(&mut self, config: &Config) -> Result<ServiceRecord, ProvisionError> {
        let current = match fs::read_to_string(&self.config_path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ProvisionError::unsupported(SSH, "sshd is not installed"))
            }
            Err(source) => return Err(io_error(source)),
        };

        let backup = self.backup_path();
        if !backup.exists() {
            fs::copy(&self.config_path, &backup).map_err(io_error)?;
        }

        let port = config.security.ssh_port;
        write_file(SSH, &self.config_path, &harden(&current, port), 0o644)?;
        let unit = self.unit();
        self.units.restart(unit).map_err(unit_error(SSH))?;
        info!(port, "sshd hardened");

        Ok(ServiceRecord::new(SSH).with_unit(unit).with_ports(vec![port]))
    }

    fn restart(&mut self) -> Result<(), ProvisionError> {
        self.units.restart(self.unit()).map_err(unit_error(SSH))
    }

    fn uninstall(&mut self) -> Result<(), ProvisionError> {
        let backup = self.backup_path();
        if !backup.exists() {
            return Ok(());
        }
        fs::rename(&backup, &self.config_path).map_err(io_error)?;
        self.units.restart(self.unit()).map_err(unit_error(SSH))
    }
}

fn io_error(source: io::Error) -> ProvisionError {
    ProvisionError::Io {
        name: SSH.to_string(),
        source,
    }
}

/// Sets `PermitRootLogin no` and `Port <port>`, replacing an existing
/// directive (or its commented default) in place. New directives go before
/// the first `Match` block so they apply globally.
pub fn harden(content: &str, port: u16) -> String {
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let wanted = [
        ("PermitRootLogin", "no".to_string()),
        ("Port", port.to_string()),
    ];

    for (key, value) in &wanted {
        let setting = format!("{} {}", key, value);
        let find = |commented: bool| {
            lines.iter().position(|l| {
                directive(l).is_some_and(|(k, c)| c == commented && k.eq_ignore_ascii_case(key))
            })
        };
        match find(false).or_else(|| find(true)) {
            Some(i) => lines[i] = setting,
            None => {
                let at = lines
                    .iter()
                    .position(|l| directive(l).is_some_and(|(k, c)| !c && k.eq_ignore_ascii_case("Match")))
                    .unwrap_or(lines.len());
                lines.insert(at, setting);
            }
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// True when `harden` would leave `content` as it is.
pub fn is_hardened(content: &str, port: u16) -> bool {
    harden(content, port).trim_end() == content.trim_end()
}

/// The keyword of a config line, and whether it is commented out.
fn directive(line: &str) -> Option<(&str, bool)> {
    let trimmed = line.trim();
    let commented = trimmed.starts_with('#');
    let body = trimmed.trim_start_matches('#').trim_start();
    body.split_whitespace().next().map(|k| (k, commented))
}

// ── Firewall ──────────────────────────────────────────────────────────────────

const FIREWALL: &str = "firewall";

/// ufw on the Debian family, firewalld on the Fedora family.
pub struct Firewall {
    tool: Option<FirewallTool>,
    units: Systemctl,
}

impl Firewall {
    pub fn new(distro: Distro) -> Self {
        Self {
            tool: FirewallTool::for_distro(distro),
            units: Systemctl,
        }
    }
}

/// SSH plus every enabled service port, once each.
pub fn open_ports(config: &Config) -> Vec<u16> {
    let mut ports = BTreeSet::new();
    ports.insert(config.security.ssh_port);
    for service in config.enabled_services() {
        ports.extend(config.service_ports(service));
    }
    ports.into_iter().collect()
}

/// The commands that open `ports` and switch the firewall on.
pub fn rules(tool: FirewallTool, ports: &[u16]) -> Vec<Vec<String>> {
    let mut out = Vec::new();
    match tool {
        FirewallTool::Ufw => {
            for port in ports {
                out.push(vec!["ufw".into(), "allow".into(), format!("{}/tcp", port)]);
            }
            out.push(vec!["ufw".into(), "--force".into(), "enable".into()]);
        }
        FirewallTool::Firewalld => {
            for port in ports {
                out.push(vec![
                    "firewall-cmd".into(),
                    "--permanent".into(),
                    format!("--add-port={}/tcp", port),
                ]);
            }
            out.push(vec!["firewall-cmd".into(), "--reload".into()]);
        }
    }
    out
}

/// TCP ports `ufw status` lists as allowed. IPv6 duplicates collapse.
pub fn parse_ufw_ports(status: &str) -> BTreeSet<u16> {
    status
        .lines()
        .filter(|l| l.contains("ALLOW"))
        .filter_map(|l| l.split_whitespace().next())
        .map(|rule| rule.strip_suffix("/tcp").unwrap_or(rule))
        .filter_map(|port| port.parse().ok())
        .collect()
}

/// TCP ports in `firewall-cmd --list-ports` output, e.g. `22/tcp 9090/tcp`.
pub fn parse_firewalld_ports(list: &str) -> BTreeSet<u16> {
    list.split_whitespace()
        .filter_map(|p| p.strip_suffix("/tcp"))
        .filter_map(|p| p.parse().ok())
        .collect()
}

/// Ports `config` wants open that the active rule set lacks.
pub fn missing_ports(config: &Config, active: &BTreeSet<u16>) -> Vec<u16> {
    open_ports(config)
        .into_iter()
        .filter(|p| !active.contains(p))
        .collect()
}

fn run_all(commands: &[Vec<String>]) -> Result<(), ProvisionError> {
    for command in commands {
        let Some((program, args)) = command.split_first() else { continue };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run(FIREWALL, program, &args)?;
    }
    Ok(())
}

impl Provisioner for Firewall {
    fn name(&self) -> &str {
        FIREWALL
    }

    fn wanted(&self, _config: &Config) -> bool {
        self.tool.is_some()
    }

    fn is_installed(&self) -> bool {
        match self.tool {
            Some(FirewallTool::Ufw) => cmd::run_capture("ufw", &["status"])
                .map(|s| s.contains("Status: active"))
                .unwrap_or(false),
            Some(FirewallTool::Firewalld) => self.units.is_active("firewalld.service"),
            None => false,
        }
    }

    fn in_sync(&self, config: &Config) -> bool {
        let active = match self.tool {
            Some(FirewallTool::Ufw) => cmd::run_capture("ufw", &["status"]).map(|s| parse_ufw_ports(&s)),
            Some(FirewallTool::Firewalld) => {
                cmd::run_capture("firewall-cmd", &["--list-ports"]).map(|s| parse_firewalld_ports(&s))
            }
            None => return true,
        };
        match active {
            Ok(active) => {
                let missing = missing_ports(config, &active);
                if !missing.is_empty() {
                    info!(?missing, "firewall lacks rules for configured ports");
                }
                missing.is_empty()
            }
            Err(_) => false,
        }
    }

    fn install(&mut self, config: &Config) -> Result<ServiceRecord, ProvisionError> {
        let tool = self
            .tool
            .ok_or_else(|| ProvisionError::unsupported(FIREWALL, "no firewall tool for this distro"))?;
        let ports = open_ports(config);

        let mut record = ServiceRecord::new(FIREWALL).with_ports(ports.clone());
        if tool == FirewallTool::Firewalld {
            self.units.enable_now("firewalld.service").map_err(unit_error(FIREWALL))?;
            record = record.with_unit("firewalld.service");
        }
        run_all(&rules(tool, &ports))?;
        info!(?tool, ?ports, "firewall configured");

        record.deltas.push(ConfigDelta::SetFirewall(Some(tool)));
        Ok(record)
    }

    fn restart(&mut self) -> Result<(), ProvisionError> {
        match self.tool {
            Some(FirewallTool::Ufw) => run(FIREWALL, "ufw", &["reload"]),
            Some(FirewallTool::Firewalld) => self
                .units
                .restart("firewalld.service")
                .map_err(unit_error(FIREWALL)),
            None => Err(ProvisionError::unsupported(FIREWALL, "no firewall tool for this distro")),
        }
    }

    fn uninstall(&mut self) -> Result<(), ProvisionError> {
        match self.tool {
            Some(FirewallTool::Ufw) if cmd::is_available("ufw") => {
                run(FIREWALL, "ufw", &["--force", "disable"])
            }
            Some(FirewallTool::Firewalld) => self
                .units
                .disable_now("firewalld.service")
                .map_err(unit_error(FIREWALL)),
            _ => Ok(()),
        }
    }
}

// ── fail2ban ──────────────────────────────────────────────────────────────────

const FAIL2BAN: &str = "fail2ban";
const FAIL2BAN_UNIT: &str = "fail2ban.service";

pub struct Fail2ban {
    manager: Option<PackageManager>,
    units: Systemctl,
}

impl Fail2ban {
    pub fn new(manager: Option<PackageManager>) -> Self {
        Self {
            manager,
            units: Systemctl,
        }
    }
}

impl Provisioner for Fail2ban {
    fn name(&self) -> &str {
        FAIL2BAN
    }

    fn wanted(&self, _config: &Config) -> bool {
        true
    }

    fn is_installed(&self) -> bool {
        self.units.exists(FAIL2BAN_UNIT)
    }

    fn install(&mut self, _config: &Config) -> Result<ServiceRecord, ProvisionError> {
        install_packages(FAIL2BAN, self.manager, &["fail2ban"])?;
        self.units.enable_now(FAIL2BAN_UNIT).map_err(unit_error(FAIL2BAN))?;
        Ok(ServiceRecord::new(FAIL2BAN).with_unit(FAIL2BAN_UNIT))
    }

    fn restart(&mut self) -> Result<(), ProvisionError> {
        self.units.restart(FAIL2BAN_UNIT).map_err(unit_error(FAIL2BAN))
    }

    fn uninstall(&mut self) -> Result<(), ProvisionError> {
        self.units.disable_now(FAIL2BAN_UNIT).map_err(unit_error(FAIL2BAN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Service;

    #[test]
    fn harden_replaces_active_and_commented_directives() {
        let before = "#Port 22\nPermitRootLogin yes\nPasswordAuthentication yes\n";
        let after = harden(before, 2222);
        assert_eq!(after, "Port 2222\nPermitRootLogin no\nPasswordAuthentication yes\n");
    }

    #[test]
    fn harden_prefers_the_active_line() {
        let before = "#PermitRootLogin prohibit-password\nPermitRootLogin yes\n";
        let after = harden(before, 22);
        assert!(after.starts_with("#PermitRootLogin prohibit-password\nPermitRootLogin no\n"));
    }

    #[test]
    fn harden_inserts_missing_directives_before_match_blocks() {
        let before = "UsePAM yes\nMatch User backup\n    ForceCommand internal-sftp\n";
        let after = harden(before, 2200);
        assert_eq!(
            after,
            "UsePAM yes\nPermitRootLogin no\nPort 2200\nMatch User backup\n    ForceCommand internal-sftp\n"
        );
    }

    #[test]
    fn harden_is_stable_on_its_own_output() {
        let once = harden("Port 22\n", 2222);
        assert_eq!(harden(&once, 2222), once);
    }

    #[test]
    fn changed_port_is_not_hardened() {
        let hardened = harden("#Port 22\nPermitRootLogin yes\n", 22);
        assert!(is_hardened(&hardened, 22));
        assert!(!is_hardened(&hardened, 2222));
        assert!(!is_hardened("PermitRootLogin yes\n", 22));
    }

    #[test]
    fn ufw_status_lists_allowed_tcp_ports() {
        let status = "Status: active\n\n\
To                         Action      From\n\
--                         ------      ----\n\
22/tcp                     ALLOW       Anywhere\n\
32400/tcp                  ALLOW       Anywhere\n\
22/tcp (v6)                ALLOW       Anywhere (v6)\n";
        let ports = parse_ufw_ports(status);
        assert_eq!(ports.into_iter().collect::<Vec<_>>(), vec![22, 32400]);
    }

    #[test]
    fn firewalld_list_ports_are_parsed() {
        let ports = parse_firewalld_ports("22/tcp 9090/tcp 5353/udp\n");
        assert_eq!(ports.into_iter().collect::<Vec<_>>(), vec![22, 9090]);
    }

    #[test]
    fn newly_enabled_service_port_is_missing() {
        let mut config = Config::new("node");
        let active: BTreeSet<u16> = [22].into_iter().collect();
        assert!(missing_ports(&config, &active).is_empty());

        config.services.insert(Service::Plex, true);
        config.security.ssh_port = 2222;
        assert_eq!(missing_ports(&config, &active), vec![2222, 32400]);
    }

    #[test]
    fn firewall_opens_ssh_and_enabled_service_ports() {
        let mut config = Config::new("node");
        config.security.ssh_port = 2222;
        config.services.insert(Service::Plex, true);
        config.services.insert(Service::Cockpit, false);
        assert_eq!(open_ports(&config), vec![2222, 32400]);
    }

    #[test]
    fn ufw_rules_end_by_enabling() {
        let rules = rules(FirewallTool::Ufw, &[22, 9090]);
        assert_eq!(rules[0], vec!["ufw", "allow", "22/tcp"]);
        assert_eq!(rules[1], vec!["ufw", "allow", "9090/tcp"]);
        assert_eq!(rules.last().unwrap(), &vec!["ufw", "--force", "enable"]);
    }

    #[test]
    fn firewalld_rules_are_permanent_then_reloaded() {
        let rules = rules(FirewallTool::Firewalld, &[22]);
        assert_eq!(rules, vec![
            vec!["firewall-cmd", "--permanent", "--add-port=22/tcp"],
            vec!["firewall-cmd", "--reload"],
        ]);
    }

    #[test]
    fn distro_without_a_firewall_tool_is_not_wanted() {
        let config = Config::new("node");
        assert!(!Firewall::new(Distro::Arch).wanted(&config));
        assert!(Firewall::new(Distro::Fedora).wanted(&config));
    }
}
