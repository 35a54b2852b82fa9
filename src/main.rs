mod artifacts;
mod cli;
mod cmd;
mod config;
mod crash;
mod error;
mod lsblk;
mod paths;
mod pkg;
mod probe;
mod prompt;
mod provision;
mod router;
mod steps;
mod store;
#[cfg(test)]
mod testing;
mod ui;
mod units;

use std::{
    fs::{self, OpenOptions},
    sync::Mutex,
};

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, prelude::*, EnvFilter};

use cli::{Cli, RunMode};
use error::ForgeError;
use paths::Paths;
use probe::{Probe, SystemProbe};
use prompt::{Console, Operator, Unattended};
use router::{Host, Options};
use steps::{disks::SystemDiskOps, preflight};
use store::FileStore;
use units::Systemctl;

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();
    let paths = Paths::new(&cli.config_dir, &cli.log_dir);
    init_logging(&paths);
    cmd::set_unattended(cli.no_prompt);

    let flags = cli.mode_flags();
    let mode = RunMode::resolve(flags);
    ui::print_banner(&mode.to_string());
    if flags.count() > 1 {
        warn!(?flags, %mode, "several mode flags given");
        ui::print_warning(&format!(
            "Several mode flags given; running the most destructive one: {}.",
            mode
        ));
    }

    // Only the install path is long enough to warrant a crash report.
    let code = if mode == RunMode::Install {
        crash::guard(&paths.crash_log(), || run(mode, &cli, &paths))
    } else {
        match run(mode, &cli, &paths) {
            Ok(code) => code,
            Err(e) => {
                println!();
                ui::print_error(&e.to_string());
                1
            }
        }
    };
    std::process::exit(code);
}

fn run(mode: RunMode, cli: &Cli, paths: &Paths) -> Result<i32, ForgeError> {
    if !mode.is_read_only() {
        preflight::check_root()?;
    }

    let probe = SystemProbe;
    let mut disks = SystemDiskOps::new(&paths.fstab);
    let mut store = FileStore::new(paths.config_file(), paths.state_file());
    let mut operator: Box<dyn Operator> = if cli.no_prompt {
        Box::new(Unattended)
    } else {
        Box::new(Console)
    };
    let mut provisioners = provision::registry(probe.distro(), paths);
    let options = Options {
        disable_automation: cli.disable_automation,
        force: cli.force,
    };

    let mut host = Host {
        probe: &probe,
        disks: &mut disks,
        store: &mut store,
        operator: operator.as_mut(),
        units: &Systemctl,
        provisioners: &mut provisioners,
        paths: paths.clone(),
    };
    let outcome = router::dispatch(mode, &mut host, &options)?;
    info!(%mode, ?outcome, "run finished");
    Ok(outcome.exit_code())
}

// ── Logging ───────────────────────────────────────────────────────────────────

/// Everything goes to the bootstrap log; the terminal is reserved for the
/// operator. Without a writable log dir logging is dropped.
fn init_logging(paths: &Paths) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("polyforge=debug"));
    let file = fs::create_dir_all(&paths.log_dir).and_then(|_| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(paths.bootstrap_log())
    });
    let writer = match file {
        Ok(f) => BoxMakeWriter::new(Mutex::new(f)),
        Err(_) => BoxMakeWriter::new(std::io::sink),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
        .init();
}
