use anyhow::Result;
use keel_trust::{NewDelegation, TrustManager};

use crate::DelegationsCmd;
use crate::helpers::print_json;

pub async fn run_delegations(cmd: DelegationsCmd, manager: &TrustManager) -> Result<()> {
    match cmd {
        DelegationsCmd::Add {
            name,
            paths,
            threshold,
            terminating,
        } => {
            let role = manager
                .add_delegation(NewDelegation::new(name, paths, threshold).terminating(terminating))
                .await?;
            print_json(&role)?;
        }
        DelegationsCmd::Remove { name } => {
            manager.remove_delegation(&name).await?;
            println!("removed delegation {name}");
        }
        DelegationsCmd::List => {
            print_json(&manager.list_delegations().await?)?;
        }
    }
    Ok(())
}
