//! Removes what provisioning created. fstab lines are left in place.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::{info, warn};

use crate::{
    error::ForgeError,
    paths::Paths,
    probe::Probe,
    prompt::Operator,
    provision::Provisioner,
    store::ConfigStore,
    ui,
};

#[derive(Debug, Default)]
pub struct Removal {
    pub removed: Vec<PathBuf>,
    /// Directories left alone because a disk is mounted at or below them.
    pub kept: Vec<PathBuf>,
    pub failures: Vec<String>,
}

/// Asks before anything is removed. `force` skips the question; without an
/// operator and without `force` the uninstall is refused.
pub fn confirm(operator: &mut dyn Operator, force: bool) -> Result<(), ForgeError> {
    if force {
        return Ok(());
    }
    if !operator.is_interactive() {
        ui::print_warning("Refusing to uninstall without a prompt. Pass --force to proceed.");
        return Err(ForgeError::Cancelled);
    }
    let question = "Disable every PolyForge service, delete provisioned directories and erase the configuration?";
    if operator.confirm(question, false)? {
        Ok(())
    } else {
        Err(ForgeError::Cancelled)
    }
}

pub fn run(
    provisioners: &mut [Box<dyn Provisioner>],
    store: &mut dyn ConfigStore,
    probe: &dyn Probe,
    paths: &Paths,
) -> Result<Removal, ForgeError> {
    let mut removal = Removal::default();

    for p in provisioners.iter_mut() {
        match p.uninstall() {
            Ok(()) => info!(provisioner = p.name(), "uninstalled"),
            Err(e) => {
                warn!(provisioner = p.name(), "uninstall failed: {}", e);
                ui::print_error(&e.to_string());
                removal.failures.push(e.to_string());
            }
        }
    }

    let live = probe.mount_points();
    for dir in paths.provisioned_dirs() {
        if let Some(point) = live.iter().find(|p| Path::new(p).starts_with(&dir)) {
            ui::print_warning(&format!(
                "Keeping {}: {} is mounted there.",
                dir.display(),
                point
            ));
            removal.kept.push(dir);
            continue;
        }
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(dir = %dir.display(), "removed");
                removal.removed.push(dir);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(dir = %dir.display(), "could not remove: {}", e);
                removal.failures.push(format!("{}: {}", dir.display(), e));
            }
        }
    }

    store.erase()?;
    // Only an empty config directory goes; anything the operator put there stays.
    match fs::remove_dir(&paths.config_dir) {
        Ok(()) => info!(dir = %paths.config_dir.display(), "config directory removed"),
        Err(e) => info!(dir = %paths.config_dir.display(), "config directory kept: {}", e),
    }

    Ok(removal)
}

pub fn report(removal: &Removal) {
    for dir in &removal.removed {
        ui::print_success(&format!("Removed {}", dir.display()));
    }
    println!();
    if removal.failures.is_empty() {
        ui::print_success("PolyForge has been uninstalled. fstab entries were left in place.");
    } else {
        ui::print_warning(&format!(
            "Uninstall finished with {} problem(s); see the log.",
            removal.failures.len()
        ));
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{
        config::Config,
        testing::{CallLog, FakeMachine, FakeProvisioner, MemoryStore, ScriptedOperator},
    };

    #[test]
    fn unattended_uninstall_needs_force() {
        let mut operator = ScriptedOperator::unattended();
        assert!(matches!(confirm(&mut operator, false), Err(ForgeError::Cancelled)));
        assert!(confirm(&mut operator, true).is_ok());
    }

    #[test]
    fn declining_cancels() {
        let mut operator = ScriptedOperator::answering(false);
        assert!(matches!(confirm(&mut operator, false), Err(ForgeError::Cancelled)));
        let mut operator = ScriptedOperator::answering(true);
        assert!(confirm(&mut operator, false).is_ok());
    }

    #[test]
    fn nothing_installed_still_uninstalls_cleanly() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::under(dir.path());
        let machine = FakeMachine::new();
        let log = CallLog::default();
        let mut all: Vec<Box<dyn Provisioner>> = vec![
            Box::new(FakeProvisioner::new("plex", &log)),
            Box::new(FakeProvisioner::new("duckdns", &log)),
        ];
        let mut store = MemoryStore::with(Config::new("node"));

        let removal = run(&mut all, &mut store, &machine.probe(), &paths).unwrap();

        assert!(removal.failures.is_empty());
        assert!(removal.removed.is_empty());
        assert!(store.current().is_none());
        assert_eq!(log.entries(), vec!["uninstall plex", "uninstall duckdns"]);
    }

    #[test]
    fn mounted_data_is_never_removed() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::under(dir.path());
        let media = paths.data_root.join("media");
        let duck = paths.opt_root.join("duckdns");
        fs::create_dir_all(media.join("disk")).unwrap();
        fs::create_dir_all(&duck).unwrap();
        fs::write(duck.join("duck.sh"), "#!/bin/sh\n").unwrap();
        fs::create_dir_all(&paths.config_dir).unwrap();

        let machine = FakeMachine::new();
        machine.add_disk("sdb", "500G", "UNKNOWN");
        machine.mount_externally("sdb", &media.join("disk").to_string_lossy(), "aaaa");
        let mut store = MemoryStore::with(Config::new("node"));

        let mut none: Vec<Box<dyn Provisioner>> = Vec::new();
        let removal = run(&mut none, &mut store, &machine.probe(), &paths).unwrap();

        assert!(media.join("disk").exists());
        assert_eq!(removal.kept, vec![media]);
        assert!(!duck.exists());
        assert_eq!(removal.removed, vec![duck]);
        assert!(!paths.config_dir.exists());
        report(&removal);
    }
}
