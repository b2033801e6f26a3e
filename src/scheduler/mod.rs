//! Cron-driven daemon loop (§5). Each fire re-invokes the current binary
//! out-of-process so a cycle crash never takes the scheduler down with it.

use anyhow::{Context, Result};
use chrono::Utc;
use cron::Schedule;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const SLEEP_QUANTUM: Duration = Duration::from_secs(10);

pub struct SchedulerConfig {
    pub cron_expression: String,
    pub binary_path: PathBuf,
    pub extra_args: Vec<String>,
}

/// Runs until `cancel` fires, sleeping in `SLEEP_QUANTUM` chunks so
/// shutdown and config-reload signals are observed promptly between
/// scheduled fires.
pub async fn run(config: SchedulerConfig, cancel: CancellationToken) -> Result<()> {
    let schedule = Schedule::from_str(&config.cron_expression).context("parsing cron schedule")?;

    loop {
        let now = Utc::now();
        let next = match schedule.upcoming(Utc).next() {
            Some(n) => n,
            None => {
                error!("cron schedule has no upcoming fire time, stopping scheduler");
                return Ok(());
            }
        };

        let mut remaining = (next - now).to_std().unwrap_or(Duration::ZERO);
        info!(next_fire = %next, "scheduler sleeping until next cycle");

        loop {
            if cancel.is_cancelled() {
                info!("scheduler shutting down");
                return Ok(());
            }
            if remaining.is_zero() {
                break;
            }
            let chunk = remaining.min(SLEEP_QUANTUM);
            tokio::select! {
                _ = tokio::time::sleep(chunk) => { remaining -= chunk; }
                _ = cancel.cancelled() => {
                    info!("scheduler shutting down mid-sleep");
                    return Ok(());
                }
            }
        }

        if let Err(e) = run_cycle_subprocess(&config).await {
            error!(error = %e, "scheduled cycle failed, continuing to next scheduled fire");
        }
    }
}

async fn run_cycle_subprocess(config: &SchedulerConfig) -> Result<()> {
    let status = Command::new(&config.binary_path)
        .arg("--run")
        .args(&config.extra_args)
        .status()
        .await
        .context("spawning cycle subprocess")?;

    if !status.success() {
        anyhow::bail!("cycle subprocess exited with {status}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_six_field_cron_expression() {
        let schedule = Schedule::from_str("0 */30 * * * *").unwrap();
        assert!(schedule.upcoming(Utc).next().is_some());
    }
}
