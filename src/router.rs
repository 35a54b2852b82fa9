//! One run, one mode. Each mode drives its own subset of the pipeline.

use std::{collections::BTreeSet, net::Ipv4Addr};

use chrono::{Local, Utc};
use tracing::{debug, info, warn};

use crate::{
    artifacts,
    cli::RunMode,
    config::{Config, ConfigDelta, Service, StateCache},
    error::ForgeError,
    paths::Paths,
    probe::{requested_ports, Probe},
    prompt::Operator,
    provision::{automation, Provisioner},
    steps::{
        disks::{DiskOps, DiskProvisioner, DiskReport, DiskState, Target},
        intent::{self, Intake},
        postflight, preflight, repair, uninstall, usb, validate,
    },
    store::ConfigStore,
    ui,
    units::ServiceManager,
};

const INSTALL_STEPS: u8 = 5;

/// Everything a run talks to.
pub struct Host<'a> {
    pub probe: &'a dyn Probe,
    pub disks: &'a mut dyn DiskOps,
    pub store: &'a mut dyn ConfigStore,
    pub operator: &'a mut dyn Operator,
    pub units: &'a dyn ServiceManager,
    pub provisioners: &'a mut [Box<dyn Provisioner>],
    pub paths: Paths,
}

/// Flags that modify a mode rather than select one.
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    pub disable_automation: bool,
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    ChecksFailed(usize),
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Success => 0,
            Outcome::ChecksFailed(_) => 1,
        }
    }
}

pub fn dispatch(mode: RunMode, host: &mut Host<'_>, options: &Options) -> Result<Outcome, ForgeError> {
    info!(%mode, "run started");
    match mode {
        RunMode::Install => install(host, options),
        RunMode::DryRun => dry_run(host),
        RunMode::Validate => validate(host),
        RunMode::Repair => repair(host),
        RunMode::Reconfigure => reconfigure(host),
        RunMode::Uninstall => uninstall(host, options),
    }
}

// ── Install ───────────────────────────────────────────────────────────────────

fn install(host: &mut Host<'_>, options: &Options) -> Result<Outcome, ForgeError> {
    ui::print_step(1, INSTALL_STEPS, "Preflight");
    let facts = preflight::run(host.probe);

    ui::print_step(2, INSTALL_STEPS, "Configuration");
    let mut config = intent::gather(&mut *host.store, &mut *host.operator, host.probe)?;
    if options.disable_automation && config.automation_enabled {
        config = host.store.merge(ConfigDelta::SetAutomation(false))?;
    }
    let installed = installed_names(&*host.provisioners);
    let request = requested_ports(&config, |s| !installed.contains(s.as_str()));
    preflight::report_conflicts(&host.probe.ports(&request));

    ui::print_step(3, INSTALL_STEPS, "Storage");
    artifacts::snapshot(
        host.paths.mount_snapshot(Local::now()),
        "Mount table",
        host.probe.mount_table(),
    );
    let drives = host.probe.block_devices().drive_names();
    let unchanged = match host.store.load_state() {
        Ok(cache) if cache.matches(&config, facts.distro, &drives) => Some(cache.last_run),
        Ok(_) => None,
        Err(e) => {
            debug!("no usable state cache: {}", e);
            None
        }
    };

    // Disks that failed stay `Discovered`; while any do, no cache is kept so
    // the next run offers them again.
    let mut stranded = 0;
    if let Some(at) = unchanged {
        ui::print_info(&format!(
            "Drives unchanged since {}; skipping disk discovery.",
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        ));
    } else {
        for dir in host.paths.data_skeleton() {
            host.disks.ensure_dir(&dir)?;
        }
        let mut disks = DiskProvisioner::new(host.probe, &mut *host.disks, &host.paths);
        let candidates = disks.discover();
        if candidates.is_empty() {
            ui::print_info("No unmounted disks found.");
        }
        let fixed = disks.provision(&mut *host.store, &mut *host.operator, Target::Fixed, candidates)?;
        let removable = usb::run(
            &mut disks,
            host.probe.usb_devices(),
            &mut *host.store,
            &mut *host.operator,
        )?;
        stranded = count_stranded(&fixed) + count_stranded(&removable);
    }

    ui::print_step(4, INSTALL_STEPS, "Services");
    let mut config = host.store.snapshot().cloned().unwrap_or(config);
    let mut failed = 0;
    for p in host.provisioners.iter_mut() {
        let name = p.name().to_string();

        if options.disable_automation && name == automation::NAME {
            match p.uninstall() {
                Ok(()) => ui::print_success("Automated maintenance disabled."),
                Err(e) => {
                    warn!(provisioner = %name, "uninstall failed: {}", e);
                    ui::print_error(&e.to_string());
                    failed += 1;
                }
            }
            continue;
        }
        if !p.wanted(&config) {
            debug!(provisioner = %name, "not wanted");
            continue;
        }
        if p.is_installed() {
            if p.in_sync(&config) {
                ui::print_info(&format!("{} already installed.", name));
                continue;
            }
            ui::print_info(&format!("{} no longer matches the configuration; applying again.", name));
        }

        match p.install(&config) {
            Ok(record) => {
                for delta in record.deltas {
                    config = host.store.merge(delta)?;
                }
                info!(provisioner = %name, unit = ?record.unit, ports = ?record.ports, "installed");
                ui::print_success(&format!("{} installed.", name));
            }
            Err(e) => {
                warn!(provisioner = %name, "install failed: {}", e);
                ui::print_error(&e.to_string());
                failed += 1;
            }
        }
    }

    if stranded > 0 {
        warn!(stranded, "disks left unprovisioned; state cache dropped");
        host.store.erase_state()?;
    } else {
        let drives = host.probe.block_devices().drive_names();
        host.store
            .save_state(&StateCache::capture(&config, facts.distro, drives, Utc::now()))?;
    }

    ui::print_step(5, INSTALL_STEPS, "Summary");
    artifacts::snapshot(
        host.paths.uuid_snapshot(Local::now()),
        "UUID map",
        host.probe.uuid_table(),
    );
    postflight::firewall_audit(host.probe, &config);
    let lan = postflight::lan_address(host.probe, &config);
    ui::print_owned_box("PolyForge", &summary_rows(&config, failed, lan));
    if stranded > 0 {
        ui::print_warning(&format!(
            "{} disk(s) could not be provisioned. They will be offered again on the next run.",
            stranded
        ));
    }
    if failed > 0 {
        ui::print_warning(&format!(
            "{} provisioner(s) failed. Fix the cause and run again; finished steps are skipped.",
            failed
        ));
    } else {
        ui::print_success("Node is ready.");
    }
    postflight::offer_reboot(&mut *host.operator, host.units)?;
    Ok(Outcome::Success)
}

fn count_stranded(reports: &[DiskReport]) -> usize {
    reports.iter().filter(|r| r.state == DiskState::Discovered).count()
}

fn installed_names(provisioners: &[Box<dyn Provisioner>]) -> BTreeSet<String> {
    provisioners
        .iter()
        .filter(|p| p.is_installed())
        .map(|p| p.name().to_string())
        .collect()
}

fn summary_rows(config: &Config, failed: usize, lan: Option<Ipv4Addr>) -> Vec<(String, String)> {
    let services: Vec<&str> = config.enabled_services().map(Service::as_str).collect();
    vec![
        ("System".into(), config.system_name.clone()),
        ("Hostname".into(), config.hostname.clone()),
        (
            "LAN address".into(),
            lan.map(|ip| ip.to_string()).unwrap_or_else(|| "N/A".into()),
        ),
        ("Mounts".into(), config.mounts.len().to_string()),
        ("USB targets".into(), config.usb_backups.len().to_string()),
        (
            "Services".into(),
            if services.is_empty() { "none".into() } else { services.join(", ") },
        ),
        (
            "Automation".into(),
            (if config.automation_enabled { "on" } else { "off" }).into(),
        ),
        ("Failures".into(), failed.to_string()),
    ]
}

// ── Dry run ───────────────────────────────────────────────────────────────────

fn dry_run(host: &mut Host<'_>) -> Result<Outcome, ForgeError> {
    ui::print_warning("DRY-RUN: nothing on this machine will be changed.");
    preflight::run(host.probe);

    let config = match host.store.load() {
        Ok(config) => Some(config),
        Err(ForgeError::ConfigMissing(path)) => {
            ui::print_info(&format!(
                "No configuration at {}; an install would ask for one.",
                path.display()
            ));
            None
        }
        Err(e @ ForgeError::ConfigCorrupt { .. }) => {
            ui::print_warning(&format!("{}; an install would replace it.", e));
            None
        }
        Err(e) => return Err(e),
    };
    if let Some(config) = &config {
        let lan = postflight::lan_address(host.probe, config);
        ui::print_owned_box("Configuration", &summary_rows(config, 0, lan));
    }

    let disks = DiskProvisioner::new(host.probe, &mut *host.disks, &host.paths);
    let candidates = disks.discover();
    if candidates.is_empty() {
        ui::print_info("No unmounted disks would be offered.");
    }
    for disk in &candidates {
        ui::print_info(&format!("Would offer {} for formatting.", disk.display()));
    }

    let Some(config) = config else {
        return Ok(Outcome::Success);
    };

    for disk in usb::candidates(host.probe.usb_devices(), &config) {
        ui::print_info(&format!("Would offer USB device {} as a backup target.", disk.display()));
    }
    for p in host.provisioners.iter() {
        if !p.wanted(&config) {
            continue;
        }
        if !p.is_installed() {
            ui::print_info(&format!("Would install {}.", p.name()));
        } else if !p.in_sync(&config) {
            ui::print_info(&format!("Would apply {} again.", p.name()));
        }
    }
    let installed = installed_names(&*host.provisioners);
    let request = requested_ports(&config, |s| !installed.contains(s.as_str()));
    preflight::report_conflicts(&host.probe.ports(&request));

    Ok(Outcome::Success)
}

// ── Validate / repair ─────────────────────────────────────────────────────────

fn validate(host: &mut Host<'_>) -> Result<Outcome, ForgeError> {
    let checks = validate::run(&mut *host.store, host.probe, host.units);
    match validate::report(&checks) {
        0 => Ok(Outcome::Success),
        n => Ok(Outcome::ChecksFailed(n)),
    }
}

fn repair(host: &mut Host<'_>) -> Result<Outcome, ForgeError> {
    let results = repair::run(&mut *host.provisioners);
    repair::report(&results);
    Ok(Outcome::Success)
}

// ── Reconfigure / uninstall ───────────────────────────────────────────────────

/// Asks the intent questions again and replaces the stored document. Disk
/// and USB records carry over so registered volumes stay registered. The
/// old document stays in place until the new one is complete.
fn reconfigure(host: &mut Host<'_>) -> Result<Outcome, ForgeError> {
    let previous = match host.store.load() {
        Ok(config) => Some(config),
        Err(e) => {
            debug!("nothing to carry over: {}", e);
            None
        }
    };

    let intake = if host.operator.is_interactive() {
        Intake::Interactive
    } else {
        Intake::Auto
    };
    let mut config = intent::collect(&mut *host.operator, host.probe, intake)?;
    if let Some(previous) = &previous {
        intent::carry_over(previous, &mut config);
    }
    config.validate()?;
    host.store.save(&config)?;
    host.store.erase_state()?;

    ui::print_success("Configuration rewritten.");
    ui::print_info("Run polyforge again without --reconfigure to apply it.");
    Ok(Outcome::Success)
}

fn uninstall(host: &mut Host<'_>, options: &Options) -> Result<Outcome, ForgeError> {
    uninstall::confirm(&mut *host.operator, options.force)?;
    let removal = uninstall::run(&mut *host.provisioners, &mut *host.store, host.probe, &host.paths)?;
    uninstall::report(&removal);
    Ok(Outcome::Success)
}
