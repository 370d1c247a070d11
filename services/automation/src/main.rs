//! cdp automation service
//!
//! Consumes platform events from the configured queues, correlates them with
//! the runs this service started, fires deployment and test triggers, and runs
//! scheduled tasks. Serves health probes over HTTP.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use cdp_automation::{
    api, config,
    correlation::{CorrelationConfig, Correlator},
    db::Database,
    handlers::{
        DeploymentLifecycleHandler, EventHandler, HandlerRegistry, MigrationBuildHandler,
        TestRunTaskHandler,
    },
    ops::{SelfServiceOps, SelfServiceOpsClient},
    queue::{ConsumerConfig, MessageQueue, QueueConsumer},
    scheduler::{SchedulerConfig, SchedulerWorker, TaskExecutor},
    state::AppState,
    store::{
        DeploymentSettingsStore, DeploymentStore, MigrationStore, TestRunStore, TriggerStore,
    },
    triggers::{AutoDeployEngine, TestRunTriggerConfig, TestRunTriggerEngine},
};
use cdp_id::WorkerId;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to CDP_LOG_LEVEL.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let worker_id = WorkerId::new();
    info!(%worker_id, "Starting cdp automation service");
    info!(listen_addr = %config.listen_addr, queues = ?config.queues, "Configuration loaded");

    let db = match Database::connect(&config.database).await {
        Ok(db) => {
            info!("Database connection established");
            db
        }
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };

    if config.dev_mode {
        info!("Running database migrations (dev mode)");
        if let Err(e) = db.run_migrations().await {
            error!(error = %e, "Failed to run migrations");
            return Err(e.into());
        }
    }

    let ops: Arc<dyn SelfServiceOps> =
        Arc::new(SelfServiceOpsClient::new(&config.ops_url, config.ops_timeout)?);
    let test_runs: Arc<dyn TestRunStore> = Arc::new(db.test_run_store());
    let migrations: Arc<dyn MigrationStore> = Arc::new(db.migration_store());
    let deployments: Arc<dyn DeploymentStore> = Arc::new(db.deployment_store());
    let settings: Arc<dyn DeploymentSettingsStore> = Arc::new(db.settings_store());
    let triggers: Arc<dyn TriggerStore> = Arc::new(db.trigger_store());

    let correlation = CorrelationConfig {
        window: chrono::Duration::from_std(config.correlation_window)?,
    };

    // Two handlers claiming one event type is a wiring bug; refuse to start.
    let handlers: Vec<Arc<dyn EventHandler>> = vec![
        Arc::new(DeploymentLifecycleHandler::new(deployments.clone())),
        Arc::new(TestRunTaskHandler::new(Correlator::new(
            test_runs.clone(),
            correlation,
        ))),
        Arc::new(MigrationBuildHandler::new(Correlator::new(
            migrations,
            correlation,
        ))),
        Arc::new(AutoDeployEngine::new(
            triggers.clone(),
            settings,
            ops.clone(),
        )),
        Arc::new(TestRunTriggerEngine::new(
            deployments,
            triggers,
            test_runs.clone(),
            ops.clone(),
            TestRunTriggerConfig::default(),
        )),
    ];
    let registry = Arc::new(HandlerRegistry::from_handlers(handlers)?);
    info!(event_types = ?registry.event_types(), "Handlers registered");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers: Vec<(String, JoinHandle<()>)> = Vec::new();

    let consumer_config = ConsumerConfig {
        wait_time: config.queue_wait,
        max_payload_bytes: config.max_payload_bytes,
        ..ConsumerConfig::default()
    };
    for name in &config.queues {
        let queue: Arc<dyn MessageQueue> = Arc::new(
            db.queue(name.clone())
                .with_visibility_timeout(config.queue_visibility),
        );
        let consumer = QueueConsumer::new(queue, registry.clone(), consumer_config.clone());
        let shutdown_rx = shutdown_rx.clone();
        workers.push((
            format!("consumer:{name}"),
            tokio::spawn(async move { consumer.run(shutdown_rx).await }),
        ));
    }

    let scheduler = SchedulerWorker::new(
        Arc::new(db.schedule_store()),
        Arc::new(db.lease_store(worker_id)),
        TaskExecutor::new(ops, test_runs),
        SchedulerConfig {
            interval: config.scheduler_interval,
            tolerance: chrono::Duration::from_std(config.schedule_tolerance)?,
            lease_ttl: config.schedule_lease,
        },
    );
    workers.push((
        "scheduler".to_string(),
        tokio::spawn({
            let shutdown_rx = shutdown_rx.clone();
            async move { scheduler.run(shutdown_rx).await }
        }),
    ));

    let app = api::create_router(AppState::new(db, worker_id));
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for health probes");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = Duration::from_secs(10);
    for (name, handle) in workers {
        match tokio::time::timeout(shutdown_timeout, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(worker = %name, error = %e, "Worker task panicked"),
            Err(_) => warn!(worker = %name, "Worker did not shut down in time"),
        }
    }

    info!("cdp automation service stopped");
    Ok(())
}
