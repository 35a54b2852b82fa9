use std::path::PathBuf;

use chrono::{DateTime, Local};

pub const DEFAULT_CONFIG_DIR: &str = "/etc/polyforge";
pub const DEFAULT_LOG_DIR: &str = "/var/log";

/// Every filesystem location the provisioner reads or writes.
#[derive(Debug, Clone)]
pub struct Paths {
    pub config_dir: PathBuf,
    pub log_dir: PathBuf,
    pub fstab: PathBuf,
    pub data_root: PathBuf,
    pub usb_root: PathBuf,
    pub opt_root: PathBuf,
    pub unit_dir: PathBuf,
    pub bin_dir: PathBuf,
    pub sshd_config: PathBuf,
    pub udev_rules_dir: PathBuf,
}

impl Paths {
    pub fn new(config_dir: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            log_dir: log_dir.into(),
            fstab: PathBuf::from("/etc/fstab"),
            data_root: PathBuf::from("/data"),
            usb_root: PathBuf::from("/mnt"),
            opt_root: PathBuf::from("/opt"),
            unit_dir: PathBuf::from("/etc/systemd/system"),
            bin_dir: PathBuf::from("/usr/local/bin"),
            sshd_config: PathBuf::from("/etc/ssh/sshd_config"),
            udev_rules_dir: PathBuf::from("/etc/udev/rules.d"),
        }
    }

    /// Places every location under `root`; used by tests.
    #[cfg(test)]
    pub fn under(root: &std::path::Path) -> Self {
        Self {
            config_dir: root.join("etc/polyforge"),
            log_dir: root.join("var/log"),
            fstab: root.join("etc/fstab"),
            data_root: root.join("data"),
            usb_root: root.join("mnt"),
            opt_root: root.join("opt"),
            unit_dir: root.join("etc/systemd/system"),
            bin_dir: root.join("usr/local/bin"),
            sshd_config: root.join("etc/ssh/sshd_config"),
            udev_rules_dir: root.join("etc/udev/rules.d"),
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.yaml")
    }

    pub fn state_file(&self) -> PathBuf {
        self.config_dir.join("state-cache.yaml")
    }

    pub fn bootstrap_log(&self) -> PathBuf {
        self.log_dir.join("polyforge_bootstrap.log")
    }

    pub fn crash_log(&self) -> PathBuf {
        self.log_dir.join("polyforge_crash.log")
    }

    pub fn mount_snapshot(&self, at: DateTime<Local>) -> PathBuf {
        self.log_dir
            .join(format!("polyforge_mounts_{}.txt", at.format("%Y%m%d_%H%M%S")))
    }

    pub fn uuid_snapshot(&self, at: DateTime<Local>) -> PathBuf {
        self.log_dir
            .join(format!("polyforge_uuidmap_{}.txt", at.format("%Y%m%d_%H%M%S")))
    }

    /// Directories laid down before any disk is provisioned.
    pub fn data_skeleton(&self) -> Vec<PathBuf> {
        vec![
            self.data_root.clone(),
            self.data_root.join("media"),
            self.data_root.join("backups"),
            self.data_root.join("minecraft"),
        ]
    }

    /// Directories created by provisioning that uninstall removes.
    pub fn provisioned_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.opt_root.join("duckdns"),
            self.opt_root.join("minecraft"),
            self.data_root.join("media"),
            self.data_root.join("backups"),
            self.data_root.join("minecraft"),
        ]
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_DIR, DEFAULT_LOG_DIR)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use chrono::TimeZone;

    use super::*;

    #[test]
    fn snapshot_names_carry_the_timestamp() {
        let paths = Paths::default();
        let at = Local.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(
            paths.mount_snapshot(at),
            PathBuf::from("/var/log/polyforge_mounts_20260304_050607.txt")
        );
        assert_eq!(
            paths.uuid_snapshot(at),
            PathBuf::from("/var/log/polyforge_uuidmap_20260304_050607.txt")
        );
    }

    #[test]
    fn documents_live_in_the_config_dir() {
        let paths = Paths::new("/srv/forge", "/tmp/logs");
        assert_eq!(paths.config_file(), Path::new("/srv/forge/config.yaml"));
        assert_eq!(paths.state_file(), Path::new("/srv/forge/state-cache.yaml"));
        assert_eq!(paths.crash_log(), Path::new("/tmp/logs/polyforge_crash.log"));
    }
}
