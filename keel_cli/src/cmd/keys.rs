use anyhow::Result;
use keel_trust::TrustManager;

use crate::KeysCmd;
use crate::helpers::print_json;

pub async fn run_keys(cmd: KeysCmd, manager: &TrustManager) -> Result<()> {
    match cmd {
        KeysCmd::Rotate { role } => {
            for id in manager.rotate_key(role).await? {
                println!("{id}");
            }
        }
        KeysCmd::Export => {
            print_json(&manager.export_public_keys().await?)?;
        }
    }
    Ok(())
}
