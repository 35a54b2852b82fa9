use tracing::{info, warn};

use crate::{error::ProvisionError, provision::Provisioner, ui};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartOutcome {
    Accepted,
    Rejected(String),
    /// Not installed, or nothing to restart.
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restart {
    pub name: String,
    pub outcome: RestartOutcome,
}

/// Asks every installed provisioner to restart. Config and disks are never
/// touched.
pub fn run(provisioners: &mut [Box<dyn Provisioner>]) -> Vec<Restart> {
    let mut results = Vec::with_capacity(provisioners.len());

    for p in provisioners.iter_mut() {
        let name = p.name().to_string();
        let outcome = if !p.is_installed() {
            RestartOutcome::Skipped("not installed".into())
        } else {
            match p.restart() {
                Ok(()) => {
                    info!(provisioner = %name, "restart accepted");
                    RestartOutcome::Accepted
                }
                Err(ProvisionError::Unsupported { reason, .. }) => RestartOutcome::Skipped(reason),
                Err(e) => {
                    warn!(provisioner = %name, "restart rejected: {}", e);
                    RestartOutcome::Rejected(e.to_string())
                }
            }
        };
        results.push(Restart { name, outcome });
    }
    results
}

pub fn report(results: &[Restart]) {
    for r in results {
        match &r.outcome {
            RestartOutcome::Accepted => ui::print_success(&format!("{} restarted.", r.name)),
            RestartOutcome::Rejected(why) => ui::print_error(&format!("{} did not restart: {}", r.name, why)),
            RestartOutcome::Skipped(why) => ui::print_info(&format!("{} skipped ({}).", r.name, why)),
        }
    }
    let accepted = results
        .iter()
        .filter(|r| r.outcome == RestartOutcome::Accepted)
        .count();
    println!();
    ui::print_info(&format!("{} service(s) restarted.", accepted));
}
