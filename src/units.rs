use tracing::debug;

use crate::{cmd, error::ForgeError};

/// The init system's unit controls, as used by provisioners and checks.
pub trait ServiceManager {
    fn exists(&self, unit: &str) -> bool;
    fn is_active(&self, unit: &str) -> bool;
    fn enable_now(&self, unit: &str) -> Result<(), ForgeError>;
    fn restart(&self, unit: &str) -> Result<(), ForgeError>;
    /// Stops and disables `unit`. A unit that does not exist is a no-op.
    fn disable_now(&self, unit: &str) -> Result<(), ForgeError>;
    fn reload(&self) -> Result<(), ForgeError>;
    fn reboot(&self) -> Result<(), ForgeError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Systemctl;

impl ServiceManager for Systemctl {
    fn exists(&self, unit: &str) -> bool {
        cmd::run_capture("systemctl", &["list-unit-files", "--no-legend", unit])
            .map(|out| out.lines().any(|l| l.split_whitespace().next() == Some(unit)))
            .unwrap_or(false)
    }

    fn is_active(&self, unit: &str) -> bool {
        cmd::run_status("systemctl", &["is-active", "--quiet", unit])
    }

    fn enable_now(&self, unit: &str) -> Result<(), ForgeError> {
        cmd::run_with_spinner(
            "systemctl",
            &["enable", "--now", unit],
            &format!("Enabling {}…", unit),
            &format!("{} enabled and started.", unit),
        )
    }

    fn restart(&self, unit: &str) -> Result<(), ForgeError> {
        cmd::run_capture("systemctl", &["restart", unit]).map(|_| ())
    }

    fn disable_now(&self, unit: &str) -> Result<(), ForgeError> {
        if !self.exists(unit) {
            debug!(unit, "unit not present, nothing to disable");
            return Ok(());
        }
        cmd::run_capture("systemctl", &["disable", "--now", unit]).map(|_| ())
    }

    fn reload(&self) -> Result<(), ForgeError> {
        cmd::run_capture("systemctl", &["daemon-reload"]).map(|_| ())
    }

    fn reboot(&self) -> Result<(), ForgeError> {
        cmd::run_capture("systemctl", &["reboot"]).map(|_| ())
    }
}
