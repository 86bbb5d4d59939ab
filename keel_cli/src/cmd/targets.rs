use anyhow::{Context, Result};
use bytes::Bytes;
use keel_trust::TrustManager;

use crate::TargetsCmd;
use crate::helpers::{parse_custom, print_json};

pub async fn run_targets(cmd: TargetsCmd, manager: &TrustManager) -> Result<()> {
    match cmd {
        TargetsCmd::Add { name, path, custom } => {
            let custom = parse_custom(custom.as_deref())?;
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {path:?}"))?;
            let entry = manager.add_target(&name, Bytes::from(data), custom).await?;
            println!("{name}\t{}\t{}", entry.length, entry.hashes.sha256);
        }
        TargetsCmd::Remove { name } => {
            manager.remove_target(&name).await?;
            println!("removed {name}");
        }
        TargetsCmd::Get { name } => {
            print_json(&manager.get_target(&name).await?)?;
        }
        TargetsCmd::List => {
            for (name, entry) in manager.list_targets().await? {
                println!("{name}\t{}\t{}", entry.length, entry.hashes.sha256);
            }
        }
        TargetsCmd::Verify { name, path } => {
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {path:?}"))?;
            manager.verify_target(&name, &data).await?;
            println!("{name}: OK");
        }
    }
    Ok(())
}
