use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use keel_trust::{TrustConfig, TrustManager};
use tracing::{info, warn};

mod delegations;
mod keys;
mod refresh;
mod status;
mod targets;

pub use delegations::run_delegations;
pub use keys::run_keys;
pub use refresh::run_refresh;
pub use status::{run_check_expiry, run_metadata, run_status};
pub use targets::run_targets;

pub fn load_config(config_file: &Path) -> Result<TrustConfig> {
    let toml_content = std::fs::read_to_string(config_file).with_context(|| {
        format!("could not read {config_file:?}, run `keel config init` first")
    })?;
    let config: TrustConfig = toml::from_str(&toml_content)
        .with_context(|| format!("could not parse {config_file:?}"))?;
    config.validate()?;
    Ok(config)
}

async fn open_manager(config_file: &Path) -> Result<TrustManager> {
    let config = load_config(config_file)?;
    Ok(TrustManager::open(config).await?)
}

async fn run_init(manager: &TrustManager, force: bool) -> Result<()> {
    if manager.is_initialized().await {
        if !force {
            bail!("repository is already initialized, pass --force to replace it");
        }
        warn!("replacing the existing repository");
    }
    manager.initialize().await?;
    info!("repository initialized");
    Ok(())
}

pub async fn run_command(
    config_file: PathBuf,
    local_data_dir: &Path,
    cmd: crate::Commands,
) -> Result<()> {
    use crate::Commands;

    match cmd {
        Commands::Config { cmd } => cmd.run(config_file, local_data_dir),
        Commands::Init { force } => run_init(&open_manager(&config_file).await?, force).await,
        Commands::Targets { cmd } => run_targets(cmd, &open_manager(&config_file).await?).await,
        Commands::Delegations { cmd } => {
            run_delegations(cmd, &open_manager(&config_file).await?).await
        }
        Commands::Keys { cmd } => run_keys(cmd, &open_manager(&config_file).await?).await,
        Commands::Refresh { cmd } => run_refresh(cmd, &open_manager(&config_file).await?).await,
        Commands::Status => run_status(&open_manager(&config_file).await?).await,
        Commands::CheckExpiry => run_check_expiry(&open_manager(&config_file).await?).await,
        Commands::Metadata { role } => {
            run_metadata(role, &open_manager(&config_file).await?).await
        }
    }
}
