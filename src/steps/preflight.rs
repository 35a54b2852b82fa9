use crate::{
    error::ForgeError,
    probe::{Facts, PortConflict, Probe},
    ui,
};

/// Checks that the process is running as root (UID 0).
pub fn check_root() -> Result<(), ForgeError> {
    let uid = std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|s| parse_uid(&s))
        .unwrap_or(1); // default to non-root if unreadable

    if uid != 0 {
        return Err(ForgeError::NotRoot);
    }
    Ok(())
}

fn parse_uid(status: &str) -> Option<u32> {
    status
        .lines()
        .find(|l| l.starts_with("Uid:"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|v| v.parse::<u32>().ok())
}

/// Gathers the preflight facts and prints them.
pub fn run(probe: &dyn Probe) -> Facts {
    let pb = ui::spinner("Probing the machine…");
    let facts = Facts::gather(probe);
    pb.finish_and_clear();

    ui::print_owned_box("Preflight", &summary_rows(&facts));
    println!();

    if !facts.internet {
        ui::print_warning("No internet connection. Package installs will fail.");
    }
    if facts.time_synced == Some(false) {
        ui::print_warning("System clock is not NTP-synchronized.");
    }
    if facts.live_boot {
        ui::print_warning("Running from a live session. Changes will not survive a reboot.");
    }
    if facts.security.selinux_enforcing() {
        ui::print_warning("SELinux is enforcing. Some services may need their own policies.");
    }
    if facts.security.apparmor {
        ui::print_warning("AppArmor is enabled. Container and media services may need profile changes.");
    }
    facts
}

pub fn summary_rows(facts: &Facts) -> Vec<(String, String)> {
    let yes_no = |b: bool| (if b { "yes" } else { "no" }).to_string();
    let gb = |v: Option<f64>| v.map(|g| format!("{:.1} GB", g)).unwrap_or_else(|| "unknown".into());

    vec![
        ("Internet".into(), yes_no(facts.internet)),
        (
            "DNS".into(),
            facts.dns.map(|ip| ip.to_string()).unwrap_or_else(|| "unresolvable".into()),
        ),
        ("RAM".into(), gb(facts.resources.ram_gb)),
        ("Free disk".into(), gb(facts.resources.free_disk_gb)),
        (
            "Clock sync".into(),
            facts.time_synced.map(yes_no).unwrap_or_else(|| "unknown".into()),
        ),
        ("Distro".into(), facts.distro.to_string()),
        ("Live boot".into(), yes_no(facts.live_boot)),
        (
            "SELinux".into(),
            facts.security.selinux.clone().unwrap_or_else(|| "not present".into()),
        ),
        (
            "AppArmor".into(),
            (if facts.security.apparmor { "enabled" } else { "disabled" }).into(),
        ),
    ]
}

/// Prints port conflicts. They are warnings: the service may still be
/// reconfigured to another port.
pub fn report_conflicts(conflicts: &[PortConflict]) {
    if conflicts.is_empty() {
        ui::print_success("No port conflicts.");
        return;
    }
    for c in conflicts {
        ui::print_warning(&format!("Port {} wanted by {} is already in use.", c.port, c.service));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        probe::{Distro, Resources, SecurityModules},
        testing::FakeMachine,
    };

    #[test]
    fn uid_is_read_from_status() {
        let status = "Name:\tpolyforge\nUid:\t0\t0\t0\t0\nGid:\t0\t0\t0\t0\n";
        assert_eq!(parse_uid(status), Some(0));
        assert_eq!(parse_uid("Name:\tx\n"), None);
    }

    #[test]
    fn unknown_facts_render_as_unknown() {
        let facts = Facts {
            internet: false,
            dns: None,
            resources: Resources::default(),
            time_synced: None,
            distro: Distro::Unknown,
            live_boot: false,
            security: SecurityModules::default(),
        };
        let rows = summary_rows(&facts);
        let get = |k: &str| rows.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("DNS"), Some("unresolvable"));
        assert_eq!(get("RAM"), Some("unknown"));
        assert_eq!(get("Clock sync"), Some("unknown"));
        assert_eq!(get("Distro"), Some("Unknown"));
        assert_eq!(get("SELinux"), Some("not present"));
        assert_eq!(get("AppArmor"), Some("disabled"));
    }

    #[test]
    fn security_modules_reach_the_summary() {
        let machine = FakeMachine::new();
        machine.set_security(Some("Enforcing"), true);
        let facts = run(&machine.probe());
        assert!(facts.security.selinux_enforcing());
        let rows = summary_rows(&facts);
        let get = |k: &str| rows.iter().find(|(key, _)| key == k).map(|(_, v)| v.clone());
        assert_eq!(get("SELinux").as_deref(), Some("Enforcing"));
        assert_eq!(get("AppArmor").as_deref(), Some("enabled"));
    }
}
