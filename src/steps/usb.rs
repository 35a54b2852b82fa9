use tracing::debug;

use crate::{
    config::Config,
    error::ForgeError,
    lsblk::BlockDevice,
    prompt::Operator,
    steps::disks::{DiskProvisioner, DiskReport, Target},
    store::ConfigStore,
    ui,
};

/// USB devices not yet registered as backup targets, mounted or not.
pub fn candidates(usb: Vec<BlockDevice>, config: &Config) -> Vec<BlockDevice> {
    usb.into_iter()
        .filter(|d| match d.uuid.as_deref() {
            Some(uuid) if config.has_usb_uuid(uuid) || config.has_mount_uuid(uuid) => {
                debug!(device = %d.path(), "USB device already registered");
                false
            }
            _ => true,
        })
        .collect()
}

/// Offers each new USB device as a backup target. Mounted devices are only
/// registered; unmounted ones are formatted first.
pub fn run(
    disks: &mut DiskProvisioner<'_>,
    usb: Vec<BlockDevice>,
    store: &mut dyn ConfigStore,
    operator: &mut dyn Operator,
) -> Result<Vec<DiskReport>, ForgeError> {
    let config = match store.snapshot() {
        Some(c) => c.clone(),
        None => store.load()?,
    };
    let fresh = candidates(usb, &config);
    if fresh.is_empty() {
        ui::print_info("No new USB devices.");
        return Ok(Vec::new());
    }
    disks.provision(store, operator, Target::Usb, fresh)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::*;
    use crate::{
        paths::Paths,
        probe::Probe,
        steps::disks::DiskState,
        testing::{FakeMachine, MemoryStore, ScriptedOperator},
    };

    #[test]
    fn unmounted_usb_becomes_a_noauto_backup_target() {
        let machine = FakeMachine::new();
        machine.add_usb("sdd", "32G", "SanDisk");
        let paths = Paths::under(Path::new("/root"));
        let mut store = MemoryStore::with(Config::new("node"));
        let mut operator = ScriptedOperator::answering(true);

        let probe = machine.probe();
        let mut ops = machine.disk_ops();
        let mut disks = DiskProvisioner::new(&probe, &mut ops, &paths);
        let reports = run(&mut disks, probe.usb_devices(), &mut store, &mut operator).unwrap();

        assert_eq!(reports[0].state, DiskState::Mounted);
        let config = store.current().unwrap();
        assert!(config.mounts.is_empty());
        assert_eq!(config.usb_backups.len(), 1);
        assert_eq!(config.usb_backups[0].label, "SANDISK_32_USB");
        assert_eq!(
            PathBuf::from(&config.usb_backups[0].mount_point),
            paths.usb_root.join("usb_sandisk_32_usb")
        );
        let lines = machine.state().fstab_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("defaults,noauto"));
    }

    #[test]
    fn mounted_usb_is_registered_without_formatting() {
        let machine = FakeMachine::new();
        machine.add_usb("sdd", "32G", "SanDisk");
        machine.mount_externally("sdd", "/media/stick", "uuid-stick");
        let paths = Paths::under(Path::new("/root"));
        let mut store = MemoryStore::with(Config::new("node"));
        let mut operator = ScriptedOperator::answering(true);

        let probe = machine.probe();
        let mut ops = machine.disk_ops();
        let mut disks = DiskProvisioner::new(&probe, &mut ops, &paths);
        run(&mut disks, probe.usb_devices(), &mut store, &mut operator).unwrap();

        assert!(machine.state().formatted.is_empty());
        let config = store.current().unwrap();
        assert_eq!(config.usb_backups[0].mount_point, "/media/stick");
        assert_eq!(config.usb_backups[0].uuid, "uuid-stick");

        // A second pass finds nothing new to offer.
        let again = run(&mut disks, probe.usb_devices(), &mut store, &mut operator).unwrap();
        assert!(again.is_empty());
    }
}
