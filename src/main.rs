//! Entry point: parses the CLI, loads configuration, and dispatches to one
//! of three run modes — a single cycle, the cron-driven daemon loop, or the
//! self-update helper's single-shot target update (§6).

use anyhow::{Context, Result};
use captn::cleanup;
use captn::cli::{Cli, Filter};
use captn::config::{self, CaptnConfig};
use captn::credentials;
use captn::engine::docker::BollardDriver;
use captn::engine::Driver;
use captn::logging;
use captn::metrics;
use captn::models::{AssignmentTables, ContainerSnapshot, RuleBag};
use captn::notifications::{NotificationPayload, Notifier, WebhookNotifier};
use captn::orchestrator::{self, OrchestratorContext};
use captn::registry;
use captn::report::ReportCollector;
use captn::scheduler::{self, SchedulerConfig};
use captn::selfupdate;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.clear_logs {
        let config = config::load(&cli.config).unwrap_or_default();
        logging::clear_logs(&config.log_dir);
    }

    let mut config = config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("failed to load {}: {e:#}, falling back to defaults", cli.config.display());
        CaptnConfig::default()
    });
    if cli.dry_run {
        config.dry_run = true;
    }
    let log_level = if cli.log_level != "info" { cli.log_level.clone() } else { config.log_level.clone() };
    let _logging_guard = logging::init(&log_level, config.log_json, &config.log_dir);
    config::GLOBAL_CONFIG.store(Arc::new(config.clone()));
    let _watcher = config::start_config_watcher(cli.config.clone(), std::time::Duration::from_secs(10));

    let rules = config::load_rule_bag(&cli.config).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load rules, falling back to an empty rule bag");
        RuleBag::default()
    });
    let assignments = config::load_assignment_tables(&cli.config).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load assignment tables, falling back to empty tables");
        AssignmentTables::default()
    });

    let credentials_file = config.credentials_file.clone().map(|path| {
        credentials::load(&path).unwrap_or_else(|e| {
            warn!(error = %e, path = %path.display(), "failed to load credentials file, continuing anonymously");
            credentials::CredentialsFile::default()
        })
    });
    let registry_auth_enabled = config.registry_auth_enabled;
    let credentials_fn: Arc<dyn Fn(&str, &str) -> registry::RegistryCredential + Send + Sync> = {
        let file = credentials_file.clone();
        Arc::new(move |registry_host, repository| {
            if !registry_auth_enabled {
                return registry::RegistryCredential::anonymous();
            }
            match &file {
                Some(f) => credentials::resolve(f, registry_host, repository),
                None => registry::RegistryCredential::anonymous(),
            }
        })
    };

    let http = reqwest::Client::builder()
        .timeout(registry::MAX_REQUEST_TIMEOUT)
        .build()
        .context("building registry HTTP client")?;
    let registry_client_for: Arc<dyn Fn(&str) -> Box<dyn registry::RegistryClient> + Send + Sync> = {
        let http = http.clone();
        Arc::new(move |registry_host| registry::client_for(registry_host, http.clone()))
    };

    let ctx = OrchestratorContext {
        config: Arc::new(config.clone()),
        rules: Arc::new(rules),
        assignments: Arc::new(assignments),
        env_rules: Arc::new(config.env_filtering.clone()),
        credentials: credentials_fn,
        registry_client_for,
        dry_run: config.dry_run,
    };

    let driver: Box<dyn Driver> = Box::new(BollardDriver::connect().context("connecting to container engine")?);

    // Helper-role single shot: this process was spawned by
    // `selfupdate::spawn_helper` to apply the update the previous process
    // identified for itself, then exit.
    if selfupdate::is_helper_role() {
        let target = selfupdate::target_container().context("SELFUPDATEHELPER role set without TARGET_CONTAINER")?;
        return run_self_update_helper(&ctx, driver.as_ref(), &target).await;
    }

    if cli.daemon {
        let binary_path = std::env::current_exe().context("resolving own executable path")?;
        let scheduler_config = SchedulerConfig {
            cron_expression: config.schedule.clone(),
            binary_path,
            extra_args: vec!["--config".to_string(), cli.config.display().to_string()],
        };
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown.cancel();
        });
        let _metrics_handle = metrics::start_metrics_server("0.0.0.0:9090").await?;
        scheduler::run(scheduler_config, cancel).await?;
        return Ok(());
    }

    run_single_cycle(&ctx, driver.as_ref(), &cli, &config).await
}

async fn run_single_cycle(
    ctx: &OrchestratorContext,
    driver: &dyn Driver,
    cli: &Cli,
    config: &CaptnConfig,
) -> Result<()> {
    let containers = list_filtered_containers(driver, &cli.known_filters()).await?;

    let report = ReportCollector::new();
    let cancel = CancellationToken::new();
    let outcome = orchestrator::run_cycle(ctx, driver, containers, &report, &cancel).await?;

    if let Some(request) = outcome.self_update {
        info!(container = %request.container.name, "deferring self-update to a helper container");
        if let Err(e) = selfupdate::spawn_helper(driver, &request.container, &request.new_image).await {
            error!(error = %e, "failed to spawn self-update helper");
        } else {
            metrics::SELF_UPDATES_TRIGGERED.inc();
        }
        // Cleanup is skipped this cycle: the helper still needs the
        // running container's backup/image to remain in place (§4.8).
        publish_summary(config, &report).await;
        return Ok(());
    }

    let removed_backups = cleanup::prune_backups(driver, &config.prune).await.unwrap_or_else(|e| {
        warn!(error = %e, "backup cleanup failed");
        0
    });
    metrics::BACKUPS_PRUNED_TOTAL.inc_by(removed_backups as u64);

    match cleanup::prune_images(driver, &config.prune).await {
        Ok(summary) => metrics::IMAGES_PRUNED_TOTAL.inc_by(summary.images_deleted as u64),
        Err(e) => warn!(error = %e, "image cleanup failed"),
    }

    publish_summary(config, &report).await;
    Ok(())
}

/// The single-shot path a `ROLE=SELFUPDATEHELPER` process takes: run the
/// orchestration pipeline against only the one container named by
/// `TARGET_CONTAINER`, then exit. Cleanup is the producer's job, not the
/// helper's.
async fn run_self_update_helper(ctx: &OrchestratorContext, driver: &dyn Driver, target: &str) -> Result<()> {
    let snapshot = driver.inspect(target).await.with_context(|| format!("inspecting target container {target}"))?;
    let report = ReportCollector::new();
    let cancel = CancellationToken::new();
    orchestrator::run_cycle(ctx, driver, vec![snapshot], &report, &cancel).await?;
    Ok(())
}

async fn list_filtered_containers(driver: &dyn Driver, filters: &[&Filter]) -> Result<Vec<ContainerSnapshot>> {
    let name_glob = filters.iter().find_map(|f| match f {
        Filter::Name(pattern) => Some(pattern.clone()),
        _ => None,
    });
    let status = filters.iter().find_map(|f| match f {
        Filter::Status(s) => Some(s.clone()),
        _ => None,
    });

    let all = driver.list(None).await?;
    let matched: Vec<ContainerSnapshot> = all
        .into_iter()
        .filter(|c| name_glob.as_deref().map(|p| glob::Pattern::new(p).map(|g| g.matches(&c.name)).unwrap_or(true)).unwrap_or(true))
        .filter(|c| status.as_deref().map(|s| c.status == s).unwrap_or(true))
        .collect();
    Ok(matched)
}

async fn publish_summary(config: &CaptnConfig, report: &ReportCollector) {
    let summary = report.serialize();
    metrics::CYCLES_TOTAL.inc();
    metrics::CONTAINERS_PROCESSED.inc_by(summary.containers_processed);
    metrics::UPDATES_APPLIED.inc_by(summary.containers_updated);
    metrics::UPDATES_FAILED.inc_by(summary.containers_failed);

    let Some(url) = config.notification_webhook_url.clone() else { return };
    if !config.notification_webhook_enabled {
        return;
    }
    let http = match reqwest::Client::builder().build() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "failed to build notifier HTTP client");
            return;
        }
    };
    let notifier = WebhookNotifier::new("webhook", url, true, http);
    let payload = NotificationPayload::from_summary(summary);
    if let Err(e) = notifier.send(&payload).await {
        warn!(error = %e, "notification delivery failed");
    }
}
