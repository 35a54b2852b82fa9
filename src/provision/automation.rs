use std::path::PathBuf;

use tracing::info;

use crate::{
    config::Config,
    error::ProvisionError,
    paths::Paths,
    pkg::PackageManager,
    units::{ServiceManager, Systemctl},
};

use super::{remove_file, unit_error, write_file, Provisioner, ServiceRecord};

pub const NAME: &str = "automation";
const SERVICE_UNIT: &str = "polyforge-maintain.service";
const TIMER_UNIT: &str = "polyforge-maintain.timer";
const SCRIPT: &str = "polyforge-maintain";

/// Daily maintenance: package upgrades followed by a validation pass whose
/// result lands in the journal.
pub struct Automation {
    manager: Option<PackageManager>,
    script: PathBuf,
    unit_dir: PathBuf,
    units: Systemctl,
}

impl Automation {
    pub fn new(manager: Option<PackageManager>, paths: &Paths) -> Self {
        Self {
            manager,
            script: paths.bin_dir.join(SCRIPT),
            unit_dir: paths.unit_dir.clone(),
            units: Systemctl,
        }
    }
}

pub fn maintenance_script(manager: Option<PackageManager>, binary: &str) -> String {
    let upgrade = manager
        .map(|m| format!("{}\n", m.upgrade_command()))
        .unwrap_or_default();
    format!("#!/bin/sh\nset -u\n{}exec {} --validate --no-prompt\n", upgrade, binary)
}

fn service_unit(script: &str) -> String {
    format!(
        "[Unit]
Description=polyforge daily maintenance

[Service]
Type=oneshot
ExecStart={}
",
        script
    )
}

const TIMER: &str = "[Unit]
Description=Run polyforge maintenance daily

[Timer]
OnCalendar=daily
Persistent=true

[Install]
WantedBy=timers.target
";

impl Provisioner for Automation {
    fn name(&self) -> &str {
        NAME
    }

    fn wanted(&self, config: &Config) -> bool {
        config.automation_enabled
    }

    fn is_installed(&self) -> bool {
        self.units.exists(TIMER_UNIT)
    }

    fn install(&mut self, _config: &Config) -> Result<ServiceRecord, ProvisionError> {
        let binary = std::env::current_exe()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "polyforge".to_string());
        let script = self.script.to_string_lossy().into_owned();

        write_file(NAME, &self.script, &maintenance_script(self.manager, &binary), 0o755)?;
        write_file(NAME, &self.unit_dir.join(SERVICE_UNIT), &service_unit(&script), 0o644)?;
        write_file(NAME, &self.unit_dir.join(TIMER_UNIT), TIMER, 0o644)?;
        self.units.reload().map_err(unit_error(NAME))?;
        self.units.enable_now(TIMER_UNIT).map_err(unit_error(NAME))?;
        info!("maintenance timer installed");

        Ok(ServiceRecord::new(NAME).with_unit(TIMER_UNIT))
    }

    fn restart(&mut self) -> Result<(), ProvisionError> {
        self.units.restart(TIMER_UNIT).map_err(unit_error(NAME))
    }

    fn uninstall(&mut self) -> Result<(), ProvisionError> {
        self.units.disable_now(TIMER_UNIT).map_err(unit_error(NAME))?;
        remove_file(NAME, &self.unit_dir.join(TIMER_UNIT))?;
        remove_file(NAME, &self.unit_dir.join(SERVICE_UNIT))?;
        remove_file(NAME, &self.script)
    }
}
