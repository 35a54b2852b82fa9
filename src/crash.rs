//! Last line of defence around the install path.
//!
//! Anticipated failures get a one-line message. Anything else, including a
//! panic, is written to the crash log and the operator is pointed at it and
//! at `--repair`. Nothing is retried.

use std::{
    backtrace::Backtrace,
    cell::RefCell,
    error::Error,
    fmt::Write as _,
    fs,
    panic::{self, AssertUnwindSafe},
    path::Path,
};

use chrono::Local;
use tracing::error;

use crate::{error::ForgeError, ui};

thread_local! {
    static PANIC_REPORT: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Runs `run` and turns its result into an exit code.
pub fn guard(crash_log: &Path, run: impl FnOnce() -> Result<i32, ForgeError>) -> i32 {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(|info| {
        let report = format!("panic: {}\n\nbacktrace:\n{}", info, Backtrace::force_capture());
        PANIC_REPORT.with(|slot| *slot.borrow_mut() = Some(report));
    }));
    let result = panic::catch_unwind(AssertUnwindSafe(run));
    panic::set_hook(previous);

    match result {
        Ok(Ok(code)) => code,
        Ok(Err(e)) if e.is_anticipated() => {
            println!();
            ui::print_error(&e.to_string());
            1
        }
        Ok(Err(e)) => {
            let body = format!("{}\n\nbacktrace:\n{}", error_chain(&e), Backtrace::force_capture());
            report(crash_log, &e.to_string(), &body)
        }
        Err(payload) => {
            let body = PANIC_REPORT
                .with(|slot| slot.borrow_mut().take())
                .unwrap_or_else(|| format!("panic: {}", panic_message(payload.as_ref())));
            report(crash_log, "unexpected internal failure", &body)
        }
    }
}

fn report(crash_log: &Path, summary: &str, body: &str) -> i32 {
    error!("install aborted: {}", summary);
    let content = format!(
        "PolyForge crash report\ntime:    {}\nversion: {}\n\n{}\n",
        Local::now().to_rfc3339(),
        env!("CARGO_PKG_VERSION"),
        body
    );

    println!();
    ui::print_error(&format!("Install failed: {}", summary));
    match write_log(crash_log, &content) {
        Ok(()) => ui::print_info(&format!("Full diagnostics written to {}", crash_log.display())),
        Err(e) => {
            ui::print_warning(&format!("Could not write {}: {}", crash_log.display(), e));
            eprintln!("{}", content);
        }
    }
    ui::print_info("Re-run with --repair to restart services, or fix the cause and run again.");
    1
}

fn write_log(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, content)
}

fn error_chain(e: &ForgeError) -> String {
    let mut out = format!("error: {}", e);
    let mut source = e.source();
    while let Some(cause) = source {
        let _ = write!(out, "\ncaused by: {}", cause);
        source = cause.source();
    }
    out
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
