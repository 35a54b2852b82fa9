use tracing::info;

use crate::{
    cmd,
    config::{Config, Service},
    error::ProvisionError,
    paths::Paths,
    pkg::PackageManager,
    units::{ServiceManager, Systemctl},
};

use super::{install_packages, remove_file, run_script, unit_error, write_file, Provisioner, ServiceRecord};

const FABRIC_SERVER_JAR: &str =
    "https://meta.fabricmc.net/v2/versions/loader/1.20.4/0.15.7/1.0.0/server/jar";

// ── Catalog recipes ───────────────────────────────────────────────────────────

enum Source {
    /// Native packages from [`packages`].
    Packages,
    /// Vendor script piped into `sh`, with arguments.
    Script(&'static str, &'static [&'static str]),
}

struct Recipe {
    source: Source,
    /// Checked on `PATH` when the service has no unit.
    binary: Option<&'static str>,
    /// Unit file this provisioner writes itself.
    unit_file: Option<fn(&Config, &Paths) -> String>,
}

fn recipe(service: Service) -> Option<Recipe> {
    let (source, binary, unit_file): (Source, Option<&'static str>, Option<fn(&Config, &Paths) -> String>) =
        match service {
            Service::Plex | Service::Cockpit | Service::Virtualbox => (Source::Packages, None, None),
            Service::Minecraft => (Source::Packages, None, Some(minecraft_unit as fn(&Config, &Paths) -> String)),
            Service::Warpinator => (Source::Packages, Some("warpinator"), None),
            Service::Restic => (Source::Packages, Some("restic"), None),
            Service::Casaos => (Source::Script("https://get.casaos.io", &[]), None, None),
            Service::Netdata => (
                Source::Script("https://get.netdata.cloud/kickstart.sh", &["--dont-wait"]),
                None,
                None,
            ),
            Service::Tailscale => (Source::Script("https://tailscale.com/install.sh", &[]), None, None),
            // These have dedicated provisioners.
            Service::Duckdns | Service::UsbBackup => return None,
        };
    Some(Recipe {
        source,
        binary,
        unit_file,
    })
}

/// Package names for `service` under `manager`; `None` when not packaged there.
fn packages(service: Service, manager: PackageManager) -> Option<&'static [&'static str]> {
    use PackageManager::*;

    let list: &'static [&'static str] = match (service, manager) {
        (Service::Plex, Apt | Dnf) => &["plexmediaserver"],
        (Service::Minecraft, Apt) => &["openjdk-17-jre-headless", "curl"],
        (Service::Minecraft, Dnf | Zypper) => &["java-17-openjdk-headless", "curl"],
        (Service::Minecraft, Pacman) => &["jre17-openjdk-headless", "curl"],
        (Service::Minecraft, Apk) => &["openjdk17-jre-headless", "curl"],
        (Service::Cockpit, Apt | Dnf | Pacman | Zypper) => &["cockpit"],
        (Service::Warpinator, Apt | Dnf | Pacman) => &["warpinator"],
        (Service::Virtualbox, Apt | Pacman | Zypper) => &["virtualbox"],
        (Service::Virtualbox, Dnf) => &["VirtualBox"],
        (Service::Restic, _) => &["restic"],
        _ => return None,
    };
    Some(list)
}

fn minecraft_unit(config: &Config, paths: &Paths) -> String {
    let dir = paths.opt_root.join("minecraft");
    let jar_url = config
        .service_settings
        .get(&Service::Minecraft)
        .and_then(|s| s.options.get("server_jar_url"))
        .and_then(|v| v.as_str())
        .unwrap_or(FABRIC_SERVER_JAR);
    let port = config
        .service_ports(Service::Minecraft)
        .first()
        .copied()
        .unwrap_or(25565);

    format!(
        "[Unit]
Description=Minecraft server for {name}
After=network-online.target
Wants=network-online.target

[Service]
WorkingDirectory={dir}
ExecStartPre=/bin/sh -c 'test -f server.jar || curl -fsSL -o server.jar {jar_url}'
ExecStartPre=/bin/sh -c 'echo eula=true > eula.txt; grep -q ^server-port= server.properties 2>/dev/null || echo server-port={port} >> server.properties'
ExecStart=/usr/bin/java -Xms1G -Xmx2G -jar server.jar nogui
Restart=on-failure

[Install]
WantedBy=multi-user.target
",
        name = config.system_name,
        dir = dir.display(),
        jar_url = jar_url,
        port = port,
    )
}

// ── Provisioner ───────────────────────────────────────────────────────────────

/// Any catalog service that installs from packages or a vendor script and
/// then runs as a unit.
pub struct ServiceProvisioner {
    service: Service,
    recipe: Recipe,
    manager: Option<PackageManager>,
    paths: Paths,
    units: Systemctl,
}

impl ServiceProvisioner {
    pub fn for_service(service: Service, manager: Option<PackageManager>, paths: &Paths) -> Option<Self> {
        Some(Self {
            service,
            recipe: recipe(service)?,
            manager,
            paths: paths.clone(),
            units: Systemctl,
        })
    }
}

impl Provisioner for ServiceProvisioner {
    fn name(&self) -> &str {
        self.service.as_str()
    }

    fn wanted(&self, config: &Config) -> bool {
        config.is_enabled(self.service)
    }

    fn is_installed(&self) -> bool {
        match (self.service.unit(), self.recipe.binary) {
            (Some(unit), _) => self.units.exists(unit),
            (None, Some(binary)) => cmd::is_available(binary),
            (None, None) => false,
        }
    }

    fn install(&mut self, config: &Config) -> Result<ServiceRecord, ProvisionError> {
        let name = self.service.as_str();
        match &self.recipe.source {
            Source::Packages => {
                let manager = self.manager.ok_or_else(|| {
                    ProvisionError::unsupported(name, "no supported package manager on this distro")
                })?;
                let list = packages(self.service, manager).ok_or_else(|| {
                    ProvisionError::unsupported(name, format!("not packaged for {}", manager.program()))
                })?;
                install_packages(name, Some(manager), list)?;
            }
            Source::Script(url, args) => run_script(name, url, args)?,
        }

        let mut record = ServiceRecord::new(name).with_ports(config.service_ports(self.service));
        if let Some(unit) = self.service.unit() {
            if let Some(render) = self.recipe.unit_file {
                write_file(name, &self.paths.unit_dir.join(unit), &render(config, &self.paths), 0o644)?;
                self.units.reload().map_err(unit_error(name))?;
            }
            self.units.enable_now(unit).map_err(unit_error(name))?;
            record = record.with_unit(unit);
        }
        info!(service = name, "service installed");
        Ok(record)
    }

    fn restart(&mut self) -> Result<(), ProvisionError> {
        let name = self.service.as_str();
        let unit = self
            .service
            .unit()
            .ok_or_else(|| ProvisionError::unsupported(name, "has no unit to restart"))?;
        self.units.restart(unit).map_err(unit_error(name))
    }

    fn uninstall(&mut self) -> Result<(), ProvisionError> {
        let name = self.service.as_str();
        let Some(unit) = self.service.unit() else {
            return Ok(());
        };
        self.units.disable_now(unit).map_err(unit_error(name))?;
        if self.recipe.unit_file.is_some() {
            remove_file(name, &self.paths.unit_dir.join(unit))?;
        }
        Ok(())
    }
}
