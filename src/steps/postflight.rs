//! What the operator sees once services are in place: the address to reach
//! the node on, the firewall rules now in force, and a reboot offer.

use std::net::Ipv4Addr;

use console::style;
use tracing::{info, warn};

use crate::{
    config::Config,
    error::ForgeError,
    probe::Probe,
    prompt::Operator,
    steps::intent,
    ui,
    units::ServiceManager,
};

/// The configured primary interface's address, or the address of the
/// interface an install would have picked.
pub fn lan_address(probe: &dyn Probe, config: &Config) -> Option<Ipv4Addr> {
    let interfaces = probe.interfaces();
    config
        .network
        .primary_interface
        .as_ref()
        .and_then(|name| interfaces.get(name).copied())
        .or_else(|| intent::pick_interface(&interfaces).and_then(|name| interfaces.get(&name).copied()))
}

/// Prints the recorded firewall tool's active rules. Returns the listing.
pub fn firewall_audit(probe: &dyn Probe, config: &Config) -> Option<String> {
    let Some(tool) = config.security.firewall else {
        ui::print_info("No firewall recorded; nothing to audit.");
        return None;
    };
    match probe.firewall_rules(tool) {
        Some(listing) => {
            println!("  {}", style("Firewall rules").bold());
            for line in listing.lines().filter(|l| !l.trim().is_empty()) {
                println!("    {}", style(line).dim());
            }
            Some(listing)
        }
        None => {
            ui::print_warning("Could not read the firewall rules back.");
            None
        }
    }
}

/// Asks whether to reboot now. Never asked without an operator.
pub fn offer_reboot(operator: &mut dyn Operator, units: &dyn ServiceManager) -> Result<bool, ForgeError> {
    if !operator.is_interactive() {
        return Ok(false);
    }
    if !operator.confirm("Reboot now?", false)? {
        return Ok(false);
    }
    info!("reboot requested by operator");
    if let Err(e) = units.reboot() {
        warn!("reboot failed: {}", e);
        ui::print_error(&format!("Reboot failed: {}", e));
        return Ok(false);
    }
    Ok(true)
}
