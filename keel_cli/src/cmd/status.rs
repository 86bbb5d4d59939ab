use std::io::Write;

use anyhow::{Result, bail};
use keel_core::Role;
use keel_trust::TrustManager;

use crate::helpers::print_json;

pub async fn run_status(manager: &TrustManager) -> Result<()> {
    print_json(&manager.status().await)
}

pub async fn run_check_expiry(manager: &TrustManager) -> Result<()> {
    let warnings = manager.check_expiry().await?;
    if warnings.is_empty() {
        println!("no expired metadata");
        return Ok(());
    }
    for warning in &warnings {
        println!("{warning}");
    }
    bail!("{} metadata file(s) expired", warnings.len())
}

pub async fn run_metadata(role: Role, manager: &TrustManager) -> Result<()> {
    let bytes = match role {
        Role::Root => manager.root_metadata().await?,
        Role::Targets => manager.targets_metadata().await?,
        Role::Snapshot => manager.snapshot_metadata().await?,
        Role::Timestamp => manager.timestamp_metadata().await?,
    };
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&bytes)?;
    writeln!(stdout)?;
    Ok(())
}
