use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// ── Terminal helpers ──────────────────────────────────────────────────────────

fn term_width() -> usize {
    Term::stdout().size().1.max(60) as usize
}

fn rule() -> String {
    style("─".repeat(term_width().min(52))).dim().to_string()
}

// ── Banner ────────────────────────────────────────────────────────────────────

pub fn print_banner(mode: &str) {
    let logo = [
        r"   ___  ___  _ __   _____  ___  ___  ___ ",
        r"  | _ \/ _ \| |\ \ / / __|/ _ \| _ \/ __|",
        r"  |  _/ (_) | |_\ V /| _|| (_) |   / (_ |",
        r"  |_|  \___/|____|_| |_|  \___/|_|_\\___|",
    ];

    println!();
    for line in &logo {
        println!("{}", style(line).cyan().bold());
    }
    println!();
    println!(
        "{}",
        style(format!("   HomeLab provisioner  ·  {}  ·  v{}", mode, env!("CARGO_PKG_VERSION")))
            .dim()
            .italic()
    );
    println!();
    println!("{}", rule());
    println!();
}

// ── Step header ───────────────────────────────────────────────────────────────

/// Prints a visually distinct numbered step header.
pub fn print_step(step: u8, total: u8, title: &str) {
    println!();
    let tag = style(format!(" {}/{} ", step, total)).black().on_cyan().bold();
    let heading = style(format!("  {}", title)).white().bold();
    println!("{}{}", tag, heading);
    println!("{}", rule());
}

// ── Feedback messages ─────────────────────────────────────────────────────────

/// A step or action that finished.
pub fn print_success(msg: &str) {
    println!("  {}  {}", style("✓").green().bold(), style(msg).green());
}

/// Progress note.
pub fn print_info(msg: &str) {
    println!("  {}  {}", style("→").blue().bold(), msg);
}

/// Something the operator should know about; the run goes on.
pub fn print_warning(msg: &str) {
    println!("  {}  {}", style("⚠").yellow().bold(), style(msg).yellow());
}

/// Goes to stderr.
pub fn print_error(msg: &str) {
    eprintln!("  {}  {}", style("✗").red().bold(), style(msg).red());
}

/// A pass/fail line for checklists.
pub fn print_check(name: &str, passed: bool, detail: &str) {
    if passed {
        println!("  {}  {:<20}{}", style("✓").green().bold(), name, style(detail).dim());
    } else {
        println!("  {}  {:<20}{}", style("✗").red().bold(), name, style(detail).red());
    }
}

// ── Info box ──────────────────────────────────────────────────────────────────

/// Renders a bordered key→value box in the terminal.
///
/// ```text
/// ┌─ Preflight ──────────────────────────┐
/// │  Internet     yes                    │
/// │  Distro       Debian                 │
/// └──────────────────────────────────────┘
/// ```
pub fn print_kv_box(title: &str, rows: &[(&str, &str)]) {
    const BOX_INNER: usize = 38;

    let dashes = "─".repeat(BOX_INNER.saturating_sub(title.chars().count() + 2));
    println!(
        "  ┌─ {} {}┐",
        style(title).white().bold(),
        style(&dashes).dim()
    );

    for (key, val) in rows {
        println!(
            "  │  {:<13}{}",
            style(*key).dim(),
            style(*val).white().bold()
        );
    }

    println!("  └{}┘", style("─".repeat(BOX_INNER + 2)).dim());
}

/// Same box, for rows built at runtime.
pub fn print_owned_box(title: &str, rows: &[(String, String)]) {
    let borrowed: Vec<(&str, &str)> = rows
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    print_kv_box(title, &borrowed);
}

// ── Spinner ───────────────────────────────────────────────────────────────────

/// Returns a running braille spinner.
/// Call `pb.finish_and_clear()` when done.
pub fn spinner(msg: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("  {spinner:.cyan.bold}  {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(msg.into());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}
