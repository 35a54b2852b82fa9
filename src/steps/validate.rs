//! Read-only health checklist. Every check runs; failures are collected.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::{
    config::{Config, Service},
    probe::Probe,
    store::ConfigStore,
    ui,
    units::ServiceManager,
};

const DNS_UNIT: &str = "duckdns.timer";
const NO_CONFIG: &str = "config unavailable";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl Check {
    fn pass(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Runs the whole checklist. Never touches the store beyond reading it.
pub fn run(store: &mut dyn ConfigStore, probe: &dyn Probe, units: &dyn ServiceManager) -> Vec<Check> {
    let mut checks = Vec::new();

    let config = match store.load() {
        Ok(config) => {
            match config.validate() {
                Ok(()) => checks.push(Check::pass("config", "present and parseable")),
                Err(e) => checks.push(Check::fail("config", e.to_string())),
            }
            Some(config)
        }
        Err(e) => {
            checks.push(Check::fail("config", e.to_string()));
            None
        }
    };

    checks.push(match &config {
        Some(config) => mounts(config, probe),
        None => Check::fail("mounts", NO_CONFIG),
    });

    checks.push(if probe.reachability() {
        Check::pass("network", "reachable")
    } else {
        Check::fail("network", "unreachable")
    });

    checks.push(match &config {
        Some(config) => dns_update(config, units),
        None => Check::fail("dns-update", NO_CONFIG),
    });

    if let Some(config) = &config {
        for service in config.enabled_services().filter(|s| *s != Service::Duckdns) {
            checks.push(service_check(service, units));
        }
    }

    for c in checks.iter().filter(|c| !c.passed) {
        warn!(check = %c.name, "check failed: {}", c.detail);
    }
    checks
}

fn mounts(config: &Config, probe: &dyn Probe) -> Check {
    if config.mounts.is_empty() {
        return Check::pass("mounts", "none registered");
    }
    let live: BTreeSet<String> = probe.mount_points().into_iter().collect();
    let missing: Vec<&str> = config
        .mounts
        .iter()
        .map(|m| m.mount_point.as_str())
        .filter(|p| !live.contains(*p))
        .collect();
    if missing.is_empty() {
        Check::pass("mounts", format!("{} mounted", config.mounts.len()))
    } else {
        Check::fail("mounts", format!("not mounted: {}", missing.join(", ")))
    }
}

fn dns_update(config: &Config, units: &dyn ServiceManager) -> Check {
    if config.network.dns.is_none() && !config.is_enabled(Service::Duckdns) {
        return Check::pass("dns-update", "not configured");
    }
    if units.is_active(DNS_UNIT) {
        Check::pass("dns-update", format!("{} active", DNS_UNIT))
    } else {
        Check::fail("dns-update", format!("{} inactive", DNS_UNIT))
    }
}

fn service_check(service: Service, units: &dyn ServiceManager) -> Check {
    let name = format!("service:{}", service);
    match service.unit() {
        Some(unit) if units.is_active(unit) => Check::pass(name, format!("{} active", unit)),
        Some(unit) => Check::fail(name, format!("{} inactive", unit)),
        None => Check::pass(name, "no unit"),
    }
}

/// Prints the checklist and returns how many checks failed.
pub fn report(checks: &[Check]) -> usize {
    for c in checks {
        ui::print_check(&c.name, c.passed, &c.detail);
    }
    let failed = checks.iter().filter(|c| !c.passed).count();
    println!();
    if failed == 0 {
        ui::print_success(&format!("All {} checks passed.", checks.len()));
    } else {
        ui::print_error(&format!("{} of {} checks failed.", failed, checks.len()));
    }
    info!(total = checks.len(), failed, "validation finished");
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{DynDns, MountRecord, Secret},
        testing::{FakeMachine, FakeUnits, MemoryStore},
    };

    fn names(checks: &[Check]) -> Vec<&str> {
        checks.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn every_check_runs_without_a_config() {
        let machine = FakeMachine::new();
        let mut store = MemoryStore::empty();
        let checks = run(&mut store, &machine.probe(), &FakeUnits::default());

        assert_eq!(names(&checks), vec!["config", "mounts", "network", "dns-update"]);
        let failed: Vec<&str> = checks.iter().filter(|c| !c.passed).map(|c| c.name.as_str()).collect();
        assert_eq!(failed, vec!["config", "mounts", "network", "dns-update"]);
        assert_eq!(store.saves, 0);
    }

    #[test]
    fn healthy_node_passes_everything() {
        let machine = FakeMachine::new();
        machine.set_internet(true);
        machine.add_disk("sdb", "500G", "UNKNOWN");
        machine.mount_externally("sdb", "/data/unknown_500_hdd", "aaaa");

        let mut config = Config::new("node");
        config.services.insert(Service::Plex, true);
        config.services.insert(Service::Restic, true);
        config.network.dns = Some(DynDns {
            token: Secret::new("t"),
            domain: "forge".into(),
        });
        config.mounts.push(MountRecord {
            uuid: "aaaa".into(),
            mount_point: "/data/unknown_500_hdd".into(),
            fs_type: "ext4".into(),
            fstab_line: String::new(),
        });
        let mut store = MemoryStore::with(config);
        let units = FakeUnits::with_active(&["plexmediaserver.service", "duckdns.timer"]);

        let checks = run(&mut store, &machine.probe(), &units);
        assert!(checks.iter().all(|c| c.passed), "{:?}", checks);
        assert!(names(&checks).contains(&"service:restic"));
        assert_eq!(report(&checks), 0);
    }

    #[test]
    fn one_failure_does_not_stop_the_rest() {
        let machine = FakeMachine::new();
        machine.set_internet(true);
        let mut config = Config::new("node");
        config.services.insert(Service::Plex, true);
        config.services.insert(Service::Cockpit, true);
        config.mounts.push(MountRecord {
            uuid: "aaaa".into(),
            mount_point: "/data/gone".into(),
            fs_type: "ext4".into(),
            fstab_line: String::new(),
        });
        let mut store = MemoryStore::with(config);
        let units = FakeUnits::with_active(&["cockpit.socket"]);

        let checks = run(&mut store, &machine.probe(), &units);
        let failed: Vec<&str> = checks.iter().filter(|c| !c.passed).map(|c| c.name.as_str()).collect();
        assert_eq!(failed, vec!["mounts", "service:plex"]);
        assert_eq!(report(&checks), 2);
        assert!(checks.iter().any(|c| c.name == "service:cockpit" && c.passed));
    }
}
