use std::time::Duration;

use anyhow::{Result, bail};
use keel_trust::TrustManager;
use tracing::{error, info};

use crate::RefreshCmd;
use crate::helpers::print_json;

pub async fn run_refresh(cmd: RefreshCmd, manager: &TrustManager) -> Result<()> {
    match cmd {
        RefreshCmd::Timestamp => {
            let version = manager.refresh_timestamp().await?;
            println!("timestamp version {version}");
        }
        RefreshCmd::Auto => {
            print_json(&manager.auto_refresh().await?)?;
        }
        RefreshCmd::Watch { interval_secs } => {
            if interval_secs == 0 {
                bail!("--interval-secs must be at least 1");
            }
            watch(manager, Duration::from_secs(interval_secs)).await?;
        }
    }
    Ok(())
}

/// Runs `auto_refresh` every `period` until Ctrl-C. A failed pass is
/// logged and retried on the next tick.
async fn watch(manager: &TrustManager, period: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(interval_secs = period.as_secs(), "watching for metadata to refresh");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match manager.auto_refresh().await {
                    Ok(report) if report.is_noop() => {}
                    Ok(report) => info!(?report, "refreshed metadata"),
                    Err(e) => error!(error = %e, "auto refresh failed"),
                }
            }
            res = tokio::signal::ctrl_c() => {
                res?;
                info!("stopping");
                return Ok(());
            }
        }
    }
}
