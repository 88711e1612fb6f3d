//! metric-bridge - Entry Point
//!
//! Initializes configuration, logging, source and push adapters, the job
//! scheduler and the HTTP surface. Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config.toml + validate (`METRIC_BRIDGE_CONFIG` overrides the path)
//! 2. Init tracing (JSON structured logging)
//! 3. Create source adapters (PostgreSQL, AppDynamics, ExtraHop)
//! 4. Create per-job registries (+ optional multi-process shards)
//! 5. Create push destinations and the execution supervisor
//! 6. Create the scheduler paused, attach instrumentation, add local jobs
//! 7. Spawn the trigger loop, HTTP server and reconciliation loop
//! 8. Resume the scheduler
//! 9. Wait for SIGINT → graceful shutdown

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

mod adapters;
mod config;
mod domain;
mod ports;
mod usecases;

use adapters::api::appdynamics::AppDynamicsClient;
use adapters::api::client::{ApiClient, ApiClientConfig, ServiceAuth, ServiceEndpoint};
use adapters::api::extrahop::ExtraHopClient;
use adapters::database::postgres::PgConnector;
use adapters::job_sources::build_job_source;
use adapters::metrics::{HttpServer, ProcessMetrics, RegistryManager, ShardStore};
use adapters::push::build_destination;
use adapters::sources::database::DatabaseCollector;
use adapters::sources::metric_tree::MetricTreeCollector;
use adapters::sources::stats::StatsCollector;
use config::jobs::JobBuilder;
use config::{AppConfig, ServicesConfig, SourceKind};
use ports::collector::AdapterTable;
use ports::registry::MetricStore;
use usecases::control::ControlApi;
use usecases::dispatcher::PushDispatcher;
use usecases::reconciler::Reconciler;
use usecases::scheduler::{JobScheduler, SchedulerConfig};
use usecases::supervisor::{DeadlinePolicy, ExecutionSupervisor};

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration from config.toml ──────────────
    let config_path =
        std::env::var("METRIC_BRIDGE_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = config::loader::load_config(&config_path)
        .context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new(&config.exporter.log_level)
                }),
        )
        .json()
        .init();

    info!(
        name = %config.exporter.name,
        version = env!("CARGO_PKG_VERSION"),
        source_services = config.services.source.len(),
        push_services = config.services.push.len(),
        local_jobs = config.jobs.len(),
        "Starting metric-bridge"
    );

    // ── 3. Shutdown signal channel ──────────────────────────
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);

    // ── 4. Source adapters ──────────────────────────────────
    let adapters = build_adapters(&config.services)
        .context("Failed to create source adapters")?;

    // ── 5. Job registries + process instrumentation ─────────
    let process_metrics = Arc::new(
        ProcessMetrics::new().context("Failed to register process metrics")?,
    );
    let mut registries =
        RegistryManager::new().with_process_registry(process_metrics.registry());
    let shard_store = match &config.metrics.shard_dir {
        Some(dir) => {
            let shards = ShardStore::new(dir)
                .with_context(|| format!("Failed to open metric shard directory '{dir}'"))?;
            info!(dir = %dir, "Multi-process metric shards enabled");
            registries = registries.with_shards(shards.clone());
            Some(shards)
        }
        None => None,
    };
    let store: Arc<dyn MetricStore> = Arc::new(registries);

    // ── 6. Push destinations + execution supervisor ─────────
    let destinations = config
        .services
        .push
        .iter()
        .map(|(name, service)| {
            build_destination(name, service)
                .with_context(|| format!("Failed to create push destination '{name}'"))
        })
        .collect::<Result<Vec<_>>>()?;
    let dispatcher = PushDispatcher::new(destinations);

    let supervisor = ExecutionSupervisor::new(
        adapters,
        Arc::clone(&store),
        dispatcher,
        deadline_policy(&config),
    );

    // ── 7. Scheduler: paused → listeners → local jobs ───────
    let scheduler = JobScheduler::new(scheduler_config(&config), supervisor, Arc::clone(&store));
    scheduler.add_listener(process_metrics);

    let builder = JobBuilder::from_config(&config).context("Failed to resolve services")?;
    let local_jobs = builder
        .build_local(&config.jobs)
        .context("Invalid local job definition")?;
    for spec in local_jobs {
        scheduler
            .add(spec)
            .context("Failed to schedule local job")?;
    }

    // ── 8. Spawn trigger loop ───────────────────────────────
    let scheduler_shutdown = shutdown_tx.subscribe();
    let scheduler_ref = scheduler.clone();
    let scheduler_handle = tokio::spawn(async move {
        if let Err(e) = scheduler_ref.run(scheduler_shutdown).await {
            error!(error = %e, "Scheduler loop failed");
        }
    });

    // ── 9. Spawn HTTP server ────────────────────────────────
    let server = HttpServer::new(
        ControlApi::new(scheduler.clone(), Arc::clone(&store)),
        config.exporter.bind_address.clone(),
    );
    let server_shutdown = shutdown_tx.subscribe();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run(server_shutdown).await {
            error!(error = %e, "HTTP server failed");
        }
    });

    // ── 10. Spawn reconciliation loop ───────────────────────
    let reconciler_handle = match (config.reconciliation.enabled, &config.reconciliation.source) {
        (true, Some(source)) => {
            let job_source = build_job_source(source).context("Failed to create job source")?;
            let mut reconciler = Reconciler::new(
                job_source,
                builder,
                scheduler.clone(),
                Arc::clone(&store),
                Duration::from_secs(config.reconciliation.interval_minutes * 60),
            );
            let reconciler_shutdown = shutdown_tx.subscribe();
            Some(tokio::spawn(async move {
                if let Err(e) = reconciler.run(reconciler_shutdown).await {
                    error!(error = %e, "Reconciliation loop failed");
                }
            }))
        }
        (true, None) => {
            warn!("Reconciliation enabled without a job source, loop not started");
            None
        }
        (false, _) => None,
    };

    // ── 11. Start firing ────────────────────────────────────
    scheduler.resume_all();
    info!(jobs = scheduler.info().job_count, "All tasks spawned, scheduler running");

    // ── 12. Wait for SIGINT ─────────────────────────────────
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("SIGINT received, initiating graceful shutdown");
        }
    }

    // ── Graceful shutdown ──

    // 1. Stop firing and signal all tasks to stop
    scheduler.pause_all();
    let _ = shutdown_tx.send(());
    info!("Shutdown signal broadcast to all tasks");

    // 2. Wait for loops to finish (up to 10s each)
    let _ = tokio::time::timeout(Duration::from_secs(10), scheduler_handle).await;
    if let Some(handle) = reconciler_handle {
        let _ = tokio::time::timeout(Duration::from_secs(10), handle).await;
    }
    let _ = tokio::time::timeout(Duration::from_secs(10), server_handle).await;

    // 3. Drop this process's shards so peers stop serving them
    if let Some(shards) = &shard_store {
        match shards.clear() {
            Ok(removed) => info!(removed, "Metric shards cleared"),
            Err(e) => warn!(error = %e, "Failed to clear metric shards"),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Create one source adapter per category over the configured services.
///
/// Services are keyed by their full configured name (`Name` or
/// `Name[instance]`), which is what jobs reference.
fn build_adapters(services: &ServicesConfig) -> Result<AdapterTable> {
    let mut pg_urls = HashMap::new();
    let mut pg_timeout = Duration::from_secs(0);
    let mut appd_endpoints = HashMap::new();
    let mut extrahop_endpoints = HashMap::new();
    let mut api_timeout = Duration::from_secs(0);

    for (name, service) in &services.source {
        let timeout = Duration::from_secs(service.timeout_seconds);
        match service.kind {
            SourceKind::Postgres => {
                pg_urls.insert(name.clone(), service.url.clone());
                pg_timeout = pg_timeout.max(timeout);
            }
            SourceKind::AppDynamics => {
                let auth = match &service.username {
                    Some(username) => ServiceAuth::Basic {
                        username: username.clone(),
                        password: service.password.clone(),
                    },
                    None => ServiceAuth::None,
                };
                appd_endpoints.insert(
                    name.clone(),
                    ServiceEndpoint {
                        base_url: service.url.clone(),
                        auth,
                    },
                );
                api_timeout = api_timeout.max(timeout);
            }
            SourceKind::ExtraHop => {
                let auth = match &service.api_key {
                    Some(key) => ServiceAuth::ExtraHopKey(key.clone()),
                    None => ServiceAuth::None,
                };
                extrahop_endpoints.insert(
                    name.clone(),
                    ServiceEndpoint {
                        base_url: service.url.clone(),
                        auth,
                    },
                );
                api_timeout = api_timeout.max(timeout);
            }
        }
    }

    let defaults = ApiClientConfig::default();
    let api_config = ApiClientConfig {
        timeout: if api_timeout.is_zero() { defaults.timeout } else { api_timeout },
        ..defaults
    };
    let pg_timeout = if pg_timeout.is_zero() { api_config.timeout } else { pg_timeout };

    let appd = Arc::new(
        ApiClient::new(appd_endpoints, &api_config).context("Failed to create AppDynamics client")?,
    );
    let extrahop = Arc::new(
        ApiClient::new(extrahop_endpoints, &api_config).context("Failed to create ExtraHop client")?,
    );

    Ok(AdapterTable::new()
        .with(Arc::new(DatabaseCollector::new(Arc::new(PgConnector::new(pg_urls, pg_timeout)))))
        .with(Arc::new(MetricTreeCollector::new(Arc::new(AppDynamicsClient::new(appd)))))
        .with(Arc::new(StatsCollector::new(Arc::new(ExtraHopClient::new(extrahop))))))
}

fn scheduler_config(config: &AppConfig) -> SchedulerConfig {
    let defaults = SchedulerConfig::default();
    SchedulerConfig {
        stagger: Duration::from_secs(config.scheduler.stagger_seconds),
        misfire_grace: Duration::from_secs(config.scheduler.misfire_grace_seconds),
        default_workers: config.executors.default_workers,
        heavy_workers: config.executors.heavy_workers.unwrap_or(defaults.heavy_workers),
        suspend_on_failure: config.scheduler.suspend_on_failure,
    }
}

fn deadline_policy(config: &AppConfig) -> DeadlinePolicy {
    DeadlinePolicy {
        enabled: config.scheduler.deadlines_enabled,
        safety_margin: Duration::from_secs(config.scheduler.safety_margin_seconds),
        min_deadline: Duration::from_secs(config.scheduler.min_deadline_seconds),
        exempt: config
            .scheduler
            .exempt_categories
            .iter()
            .copied()
            .collect::<HashSet<_>>(),
    }
}
