use std::path::{Path, PathBuf};

use tracing::info;

use crate::{
    config::{Config, DynDns, Service},
    error::ProvisionError,
    paths::Paths,
    units::{ServiceManager, Systemctl},
};

use super::{remove_file, unit_error, write_file, Provisioner, ServiceRecord};

const NAME: &str = "duckdns";
const SERVICE_UNIT: &str = "duckdns.service";
const TIMER_UNIT: &str = "duckdns.timer";

/// Keeps the DuckDNS record pointed at this host with a five-minute timer.
pub struct DuckDns {
    dir: PathBuf,
    unit_dir: PathBuf,
    units: Systemctl,
}

impl DuckDns {
    pub fn new(paths: &Paths) -> Self {
        Self {
            dir: paths.opt_root.join("duckdns"),
            unit_dir: paths.unit_dir.clone(),
            units: Systemctl,
        }
    }

    fn script(&self) -> PathBuf {
        self.dir.join("duck.sh")
    }
}

/// The DuckDNS credentials, when both the token and the domain are filled in.
pub fn credentials(config: &Config) -> Option<&DynDns> {
    config
        .network
        .dns
        .as_ref()
        .filter(|d| !d.token.expose().is_empty() && !d.domain.is_empty())
}

/// The updater script. It carries the token, so it is written owner-only.
pub fn update_script(dns: &DynDns, log: &Path) -> String {
    format!(
        "#!/bin/sh\n\
         echo url=\"https://www.duckdns.org/update?domains={domain}&token={token}&ip=\" \
         | curl -fsS -k -o {log} -K -\n",
        domain = dns.domain,
        token = dns.token.expose(),
        log = log.display(),
    )
}

fn service_unit(script: &Path) -> String {
    format!(
        "[Unit]
Description=DuckDNS update
After=network-online.target
Wants=network-online.target

[Service]
Type=oneshot
ExecStart={}
",
        script.display()
    )
}

const TIMER: &str = "[Unit]
Description=Refresh DuckDNS every five minutes

[Timer]
OnBootSec=2min
OnUnitActiveSec=5min

[Install]
WantedBy=timers.target
";

impl Provisioner for DuckDns {
    fn name(&self) -> &str {
        NAME
    }

    fn wanted(&self, config: &Config) -> bool {
        config.network.dns.is_some() || config.is_enabled(Service::Duckdns)
    }

    fn is_installed(&self) -> bool {
        self.units.exists(TIMER_UNIT)
    }

    fn install(&mut self, config: &Config) -> Result<ServiceRecord, ProvisionError> {
        let dns = credentials(config)
            .ok_or_else(|| ProvisionError::unsupported(NAME, "no DuckDNS token and domain configured"))?;

        let script = self.script();
        write_file(NAME, &script, &update_script(dns, &self.dir.join("duck.log")), 0o700)?;
        write_file(NAME, &self.unit_dir.join(SERVICE_UNIT), &service_unit(&script), 0o644)?;
        write_file(NAME, &self.unit_dir.join(TIMER_UNIT), TIMER, 0o644)?;
        self.units.reload().map_err(unit_error(NAME))?;
        self.units.enable_now(TIMER_UNIT).map_err(unit_error(NAME))?;
        info!(domain = %dns.domain, "DuckDNS updater installed");

        Ok(ServiceRecord::new(NAME).with_unit(TIMER_UNIT))
    }

    fn restart(&mut self) -> Result<(), ProvisionError> {
        self.units.restart(TIMER_UNIT).map_err(unit_error(NAME))
    }

    fn uninstall(&mut self) -> Result<(), ProvisionError> {
        self.units.disable_now(TIMER_UNIT).map_err(unit_error(NAME))?;
        remove_file(NAME, &self.unit_dir.join(TIMER_UNIT))?;
        remove_file(NAME, &self.unit_dir.join(SERVICE_UNIT))?;
        remove_file(NAME, &self.script())
    }
}
