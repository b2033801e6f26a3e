//! Pre/post update hook runner: external scripts invoked around a
//! container recreate, with a timeout that escalates SIGTERM then SIGKILL.
//! Script *content* is out of scope (§1); only the run contract is owned
//! here.

use anyhow::{Context, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Completed { exit_code: i32 },
    TimedOut,
}

/// Runs `script` with `args`, waiting up to `deadline`. On timeout, sends
/// SIGTERM, waits `grace`, then SIGKILL if the process hasn't exited.
pub async fn run_hook(script: &str, args: &[String], deadline: Duration, grace: Duration) -> Result<HookOutcome> {
    let mut child = Command::new(script).args(args).spawn().with_context(|| format!("spawning hook script {script}"))?;

    match timeout(deadline, child.wait()).await {
        Ok(Ok(status)) => Ok(HookOutcome::Completed { exit_code: status.code().unwrap_or(-1) }),
        Ok(Err(e)) => Err(e).context("waiting for hook script"),
        Err(_) => {
            warn!(script, "hook script exceeded deadline, sending SIGTERM");
            if let Some(pid) = child.id() {
                let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
            if timeout(grace, child.wait()).await.is_err() {
                warn!(script, "hook script ignored SIGTERM, sending SIGKILL");
                if let Some(pid) = child.id() {
                    let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
                }
                let _ = child.wait().await;
            }
            Ok(HookOutcome::TimedOut)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_within_deadline() {
        let outcome = run_hook("/bin/true", &[], Duration::from_secs(5), Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome, HookOutcome::Completed { exit_code: 0 });
    }

    #[tokio::test]
    async fn escalates_to_sigkill_on_timeout() {
        let outcome = run_hook("/bin/sleep", &["5".to_string()], Duration::from_millis(50), Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(outcome, HookOutcome::TimedOut);
    }
}
