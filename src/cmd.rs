use std::{
    io,
    process::{Command, Stdio},
    sync::atomic::{AtomicBool, Ordering},
};

use dialoguer::Confirm;

use crate::{error::ForgeError, pkg::PackageManager, ui};

// ── Unattended flag ───────────────────────────────────────────────────────────

/// When `true`, a missing binary is reported instead of offering to install
/// it. Set from `--no-prompt`.
static UNATTENDED: AtomicBool = AtomicBool::new(false);

pub fn set_unattended(on: bool) {
    UNATTENDED.store(on, Ordering::Relaxed);
}

#[inline]
fn is_unattended() -> bool {
    UNATTENDED.load(Ordering::Relaxed)
}

// ── Internal helpers ──────────────────────────────────────────────────────────

fn not_found_or_io(program: &str, err: io::Error) -> ForgeError {
    if err.kind() == io::ErrorKind::NotFound {
        ForgeError::CommandNotFound(program.to_string())
    } else {
        ForgeError::Io(err)
    }
}

fn print_captured_output(stdout: &[u8], stderr: &[u8]) {
    let out = String::from_utf8_lossy(stdout);
    let err = String::from_utf8_lossy(stderr);
    if !out.trim().is_empty() {
        eprintln!("{}", out.trim());
    }
    if !err.trim().is_empty() {
        eprintln!("{}", err.trim());
    }
}

/// Maps a binary name to the package that ships it.
fn package_for(program: &str) -> &str {
    match program {
        "mkfs.ext4" | "mkfs.ext3" | "mkfs.ext2" | "e2fsck" | "tune2fs" => "e2fsprogs",
        "mount" | "umount" | "lsblk" | "blkid" | "findmnt" => "util-linux",
        "ufw" => "ufw",
        "firewall-cmd" => "firewalld",
        "fail2ban-client" => "fail2ban",
        "curl" => "curl",
        "rsync" => "rsync",
        other => other,
    }
}

/// When `program` is not found, asks the operator whether to install the
/// package that provides it. Returns `Err(CommandNotFound)` when declined,
/// unattended, or no package manager is available.
fn offer_install(program: &str) -> Result<(), ForgeError> {
    let not_found = || ForgeError::CommandNotFound(program.to_string());
    if is_unattended() {
        return Err(not_found());
    }
    let Some(manager) = PackageManager::detect() else {
        return Err(not_found());
    };
    let pkg = package_for(program);

    ui::print_warning(&format!("Command '{}' not found.", program));
    println!();

    if !Confirm::new()
        .with_prompt(format!("Install '{}' with {}?", pkg, manager.program()))
        .default(true)
        .interact()?
    {
        return Err(not_found());
    }

    println!();
    let args = manager.install_args(&[pkg]);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let status = Command::new(manager.program())
        .args(&args)
        .status()
        .map_err(|e| not_found_or_io(manager.program(), e))?;

    if !status.success() {
        return Err(ForgeError::CommandFailed(
            manager.program().to_string(),
            status.code().unwrap_or(-1),
        ));
    }

    if !is_available(program) {
        ui::print_error(&format!(
            "'{}' still not found after install. Check the package name.",
            program
        ));
        return Err(not_found());
    }

    Ok(())
}

// ── Public API ────────────────────────────────────────────────────────────────

/// True when `program` resolves on `PATH`.
pub fn is_available(program: &str) -> bool {
    Command::new("which")
        .arg(program)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Runs a command silently and reports only whether it exited zero.
/// A missing binary counts as `false`.
pub fn run_status(program: &str, args: &[&str]) -> bool {
    Command::new(program)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run a command that **takes over the terminal** (stdin/stdout/stderr inherited).
/// Use for vendor install scripts and package managers that stream progress.
pub fn run_interactive(program: &str, args: &[&str]) -> Result<(), ForgeError> {
    let attempt = |p: &str, a: &[&str]| -> Result<(), ForgeError> {
        let status = Command::new(p)
            .args(a)
            .status()
            .map_err(|e| not_found_or_io(p, e))?;

        if !status.success() {
            return Err(ForgeError::CommandFailed(
                p.to_string(),
                status.code().unwrap_or(-1),
            ));
        }
        Ok(())
    };

    match attempt(program, args) {
        Err(ForgeError::CommandNotFound(_)) => {
            offer_install(program)?;
            attempt(program, args)
        }
        other => other,
    }
}

/// Run a command **silently** while displaying a spinner.
/// On success prints `done_msg` with a ✓.
/// On failure prints captured output and returns an error.
pub fn run_with_spinner(
    program: &str,
    args: &[&str],
    spin_msg: &str,
    done_msg: &str,
) -> Result<(), ForgeError> {
    let attempt = |p: &str, a: &[&str]| -> Result<(), ForgeError> {
        let pb = ui::spinner(spin_msg);
        let result = Command::new(p)
            .args(a)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| not_found_or_io(p, e));
        pb.finish_and_clear();

        match result {
            Err(e) => Err(e),
            Ok(output) if !output.status.success() => {
                print_captured_output(&output.stdout, &output.stderr);
                Err(ForgeError::CommandFailed(
                    p.to_string(),
                    output.status.code().unwrap_or(-1),
                ))
            }
            Ok(_) => {
                ui::print_success(done_msg);
                Ok(())
            }
        }
    };

    match attempt(program, args) {
        Err(ForgeError::CommandNotFound(_)) => {
            offer_install(program)?;
            attempt(program, args)
        }
        other => other,
    }
}

/// Run a command, capture its stdout, and return it as a `String`.
/// Never offers to install a missing binary; probes call this.
pub fn run_capture(program: &str, args: &[&str]) -> Result<String, ForgeError> {
    let output = Command::new(program)
        .args(args)
        .stderr(Stdio::null())
        .output()
        .map_err(|e| not_found_or_io(program, e))?;

    if !output.status.success() {
        return Err(ForgeError::CommandFailed(
            program.to_string(),
            output.status.code().unwrap_or(-1),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
