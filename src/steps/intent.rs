//! Operator intent: load the stored document, derive smart defaults, or ask.

use std::{collections::BTreeMap, net::Ipv4Addr};

use tracing::{info, warn};

use crate::{
    config::{Config, DynDns, Secret, Service},
    error::ForgeError,
    probe::Probe,
    prompt::Operator,
    store::ConfigStore,
    ui,
};

pub const DEFAULT_SYSTEM_NAME: &str = "polyforge-node";
const DEFAULT_ADMIN: &str = "polyadmin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intake {
    /// Use the stored document as-is.
    Load,
    /// Ask only for a name; everything else gets a default.
    Auto,
    /// Ask every question.
    Interactive,
}

impl Intake {
    fn label(self) -> &'static str {
        match self {
            Intake::Load => "Load saved configuration",
            Intake::Auto => "Auto (smart defaults)",
            Intake::Interactive => "Interactive (answer every question)",
        }
    }
}

/// Produces the config for this run and makes sure it is stored.
///
/// Without an operator only the stored document is used; a missing one is
/// an error rather than a silent default.
pub fn gather(
    store: &mut dyn ConfigStore,
    operator: &mut dyn Operator,
    probe: &dyn Probe,
) -> Result<Config, ForgeError> {
    if !operator.is_interactive() {
        let config = store.load()?;
        config.validate()?;
        info!("using stored configuration");
        return Ok(config);
    }

    let stored = match store.load() {
        Ok(c) => Some(c),
        Err(ForgeError::ConfigMissing(_)) => None,
        Err(e @ ForgeError::ConfigCorrupt { .. }) => {
            warn!("{}", e);
            ui::print_warning(&format!("{}. It will be replaced.", e));
            None
        }
        Err(e) => return Err(e),
    };

    let mut choices = Vec::with_capacity(3);
    if stored.is_some() {
        choices.push(Intake::Load);
    }
    choices.push(Intake::Auto);
    choices.push(Intake::Interactive);
    let labels: Vec<String> = choices.iter().map(|c| c.label().to_string()).collect();
    let pick = operator.select("How should PolyForge be configured?", &labels, 0)?;
    let intake = choices.get(pick).copied().unwrap_or(Intake::Auto);

    let config = match (intake, stored) {
        (Intake::Load, Some(config)) => {
            config.validate()?;
            return Ok(config);
        }
        (_, previous) => {
            let mut fresh = collect(operator, probe, intake)?;
            if let Some(previous) = previous {
                carry_over(&previous, &mut fresh);
            }
            fresh
        }
    };

    config.validate()?;
    store.save(&config)?;
    ui::print_success("Configuration saved.");
    Ok(config)
}

/// Asks the questions for `intake`. Nothing is stored.
pub fn collect(
    operator: &mut dyn Operator,
    probe: &dyn Probe,
    intake: Intake,
) -> Result<Config, ForgeError> {
    let name = operator.input("System name", DEFAULT_SYSTEM_NAME)?;
    let mut config = Config::new(name.trim());
    config.hostname = hostname_from(&config.system_name);
    config.admin.user = DEFAULT_ADMIN.to_string();
    config.automation_enabled = true;

    let interfaces = probe.interfaces();
    config.network.primary_interface = pick_interface(&interfaces);

    if intake != Intake::Interactive {
        return Ok(config);
    }

    config.admin.user = operator.input("Admin user", DEFAULT_ADMIN)?;
    config.admin.secret = Secret::new(operator.secret("Admin password")?);
    config.hostname = operator.input("Hostname", &config.hostname)?;

    let token = operator.secret("DuckDNS token (leave empty to skip)")?;
    if !token.trim().is_empty() {
        let domain = operator.input("DuckDNS domain (without .duckdns.org)", "")?;
        if !domain.trim().is_empty() {
            config.network.dns = Some(DynDns {
                token: Secret::new(token.trim()),
                domain: domain.trim().to_string(),
            });
        }
    }

    let port = operator.input("SSH port", "22")?;
    config.security.ssh_port = port
        .trim()
        .parse()
        .map_err(|_| ForgeError::InvalidConfig(format!("SSH port '{}' is not a valid port", port.trim())))?;

    let names: Vec<String> = interfaces.keys().cloned().collect();
    if !names.is_empty() {
        let default = config
            .network
            .primary_interface
            .as_ref()
            .and_then(|p| names.iter().position(|n| n == p))
            .unwrap_or(0);
        let idx = operator.select("Primary network interface", &names, default)?;
        config.network.primary_interface = names.get(idx).cloned();
    }
    config.network.wifi_proxy =
        operator.confirm("Fall back to Wi-Fi when the wired link drops?", false)?;

    for service in Service::ALL {
        let on = operator.confirm(
            &format!("Install {} ({})?", service, service.description()),
            false,
        )?;
        config.services.insert(service, on);
    }

    config.automation_enabled = operator.confirm(
        "Enable automated maintenance (daily upgrades and health check)?",
        true,
    )?;
    Ok(config)
}

/// Records about the machine survive re-answering the questions.
pub fn carry_over(previous: &Config, fresh: &mut Config) {
    fresh.mounts = previous.mounts.clone();
    fresh.usb_backups = previous.usb_backups.clone();
    fresh.service_settings = previous.service_settings.clone();
    fresh.extra = previous.extra.clone();
}

/// Lowercase letters, digits and dashes, at most 63 characters.
pub fn hostname_from(name: &str) -> String {
    let mut out = String::new();
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let out: String = out.trim_matches('-').chars().take(63).collect();
    let out = out.trim_end_matches('-').to_string();
    if out.is_empty() {
        "polyforge".to_string()
    } else {
        out
    }
}

/// `eth0` when present, else the first interface that is not loopback or
/// a container bridge.
pub fn pick_interface(interfaces: &BTreeMap<String, Ipv4Addr>) -> Option<String> {
    if interfaces.contains_key("eth0") {
        return Some("eth0".to_string());
    }
    interfaces
        .keys()
        .find(|n| *n != "lo" && !n.starts_with("docker") && !n.starts_with("veth") && !n.starts_with("br-"))
        .cloned()
}
