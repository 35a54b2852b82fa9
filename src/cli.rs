use std::{fmt, path::PathBuf};

use clap::Parser;

use crate::paths::{DEFAULT_CONFIG_DIR, DEFAULT_LOG_DIR};

/// PolyForge - turn a bare machine into a self-hosted HomeLab node
#[derive(Parser, Debug)]
#[command(name = "polyforge")]
#[command(version)]
pub struct Cli {
    /// Probe the machine and print the plan without changing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Never prompt; use the stored configuration and take every default.
    ///
    /// Destructive offers default to "no", so no disk is formatted.
    #[arg(long)]
    pub no_prompt: bool,

    /// Erase the stored configuration and answer the questions again.
    #[arg(long)]
    pub reconfigure: bool,

    /// Restart every known service without touching config or disks.
    #[arg(long)]
    pub repair: bool,

    /// Disable every service, remove provisioned directories and erase the config.
    #[arg(long)]
    pub uninstall: bool,

    /// Run the health checklist and exit non-zero if any check fails.
    #[arg(long)]
    pub validate: bool,

    /// Remove the maintenance timer and record automation as disabled.
    #[arg(long)]
    pub disable_automation: bool,

    /// Skip the uninstall confirmation.
    #[arg(long)]
    pub force: bool,

    /// Directory holding config.yaml and state-cache.yaml.
    #[arg(long, env = "POLYFORGE_CONFIG_DIR", default_value = DEFAULT_CONFIG_DIR)]
    pub config_dir: PathBuf,

    /// Directory for the bootstrap log, snapshots and crash log.
    #[arg(long, env = "POLYFORGE_LOG_DIR", default_value = DEFAULT_LOG_DIR)]
    pub log_dir: PathBuf,
}

impl Cli {
    pub fn mode_flags(&self) -> ModeFlags {
        ModeFlags {
            uninstall: self.uninstall,
            reconfigure: self.reconfigure,
            repair: self.repair,
            validate: self.validate,
            dry_run: self.dry_run,
        }
    }
}

// ── Run mode ──────────────────────────────────────────────────────────────────

/// The mode-selecting flags, before precedence is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeFlags {
    pub uninstall: bool,
    pub reconfigure: bool,
    pub repair: bool,
    pub validate: bool,
    pub dry_run: bool,
}

impl ModeFlags {
    pub fn count(&self) -> usize {
        [self.uninstall, self.reconfigure, self.repair, self.validate, self.dry_run]
            .iter()
            .filter(|f| **f)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunMode {
    Install,
    DryRun,
    Validate,
    Repair,
    Reconfigure,
    Uninstall,
}

impl RunMode {
    /// The most destructive requested mode wins:
    /// Uninstall > Reconfigure > Repair > Validate > DryRun > Install.
    pub fn resolve(flags: ModeFlags) -> Self {
        if flags.uninstall {
            RunMode::Uninstall
        } else if flags.reconfigure {
            RunMode::Reconfigure
        } else if flags.repair {
            RunMode::Repair
        } else if flags.validate {
            RunMode::Validate
        } else if flags.dry_run {
            RunMode::DryRun
        } else {
            RunMode::Install
        }
    }

    /// Modes that only read the machine and may run without root.
    pub fn is_read_only(self) -> bool {
        matches!(self, RunMode::DryRun | RunMode::Validate)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunMode::Install => "install",
            RunMode::DryRun => "dry-run",
            RunMode::Validate => "validate",
            RunMode::Repair => "repair",
            RunMode::Reconfigure => "reconfigure",
            RunMode::Uninstall => "uninstall",
        };
        f.write_str(name)
    }
}
