use std::path::PathBuf;

use crate::{
    config::{Config, Service, UsbBackupTarget},
    error::ProvisionError,
    paths::Paths,
    units::{ServiceManager, Systemctl},
};

use super::{remove_file, unit_error, write_file, Provisioner, ServiceRecord};

const NAME: &str = "usb_backup";
const UNIT: &str = "polyforge-usb-backup@.service";
const RULES: &str = "99-polyforge-usb-backup.rules";
const SCRIPT: &str = "polyforge-usb-backup";

/// Copies the data root onto a registered USB target whenever it is plugged
/// in. Targets come from the config's `usb_backups` list.
pub struct UsbBackup {
    data_root: PathBuf,
    bin: PathBuf,
    unit_dir: PathBuf,
    rules_dir: PathBuf,
    units: Systemctl,
}

impl UsbBackup {
    pub fn new(paths: &Paths) -> Self {
        Self {
            data_root: paths.data_root.clone(),
            bin: paths.bin_dir.join(SCRIPT),
            unit_dir: paths.unit_dir.clone(),
            rules_dir: paths.udev_rules_dir.clone(),
            units: Systemctl,
        }
    }
}

/// One udev match per registered target; each starts the templated unit
/// with the filesystem UUID as instance name.
pub fn udev_rules(targets: &[UsbBackupTarget]) -> String {
    let mut out = String::from("# Managed by polyforge.\n");
    for t in targets {
        out.push_str(&format!(
            "ACTION==\"add\", SUBSYSTEM==\"block\", ENV{{ID_FS_UUID}}==\"{}\", \
             RUN+=\"/bin/systemctl start --no-block polyforge-usb-backup@{}.service\"\n",
            t.uuid, t.uuid
        ));
    }
    out
}

/// Maps the instance UUID to its mount point, mounts, syncs, unmounts.
pub fn backup_script(targets: &[UsbBackupTarget], data_root: &str) -> String {
    let mut cases = String::new();
    for t in targets {
        cases.push_str(&format!("    {}) target=\"{}\" ;;\n", t.uuid, t.mount_point));
    }
    format!(
        "#!/bin/sh
set -eu
case \"$1\" in
{cases}    *) echo \"unknown backup target $1\" >&2; exit 1 ;;
esac
mount \"$target\"
trap 'umount \"$target\"' EXIT
rsync -a --delete {data_root}/ \"$target/polyforge-backup/\"
"
    )
}

fn unit(script: &str) -> String {
    format!(
        "[Unit]
Description=Back up data to USB target %i

[Service]
Type=oneshot
ExecStart={} %i
",
        script
    )
}

impl Provisioner for UsbBackup {
    fn name(&self) -> &str {
        NAME
    }

    fn wanted(&self, config: &Config) -> bool {
        config.is_enabled(Service::UsbBackup)
    }

    fn is_installed(&self) -> bool {
        self.rules_dir.join(RULES).exists()
    }

    fn install(&mut self, config: &Config) -> Result<ServiceRecord, ProvisionError> {
        if config.usb_backups.is_empty() {
            return Err(ProvisionError::unsupported(NAME, "no USB backup targets registered"));
        }
        let script = self.bin.to_string_lossy().into_owned();
        let data_root = self.data_root.to_string_lossy().into_owned();

        write_file(NAME, &self.bin, &backup_script(&config.usb_backups, &data_root), 0o755)?;
        write_file(NAME, &self.unit_dir.join(UNIT), &unit(&script), 0o644)?;
        write_file(NAME, &self.rules_dir.join(RULES), &udev_rules(&config.usb_backups), 0o644)?;
        self.units.reload().map_err(unit_error(NAME))?;
        super::run(NAME, "udevadm", &["control", "--reload-rules"])?;

        Ok(ServiceRecord::new(NAME))
    }

    fn restart(&mut self) -> Result<(), ProvisionError> {
        Err(ProvisionError::unsupported(NAME, "runs when a target is plugged in"))
    }

    fn uninstall(&mut self) -> Result<(), ProvisionError> {
        remove_file(NAME, &self.rules_dir.join(RULES))?;
        remove_file(NAME, &self.unit_dir.join(UNIT))?;
        remove_file(NAME, &self.bin)
    }
}
