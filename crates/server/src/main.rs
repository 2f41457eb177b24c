use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use provisioner_core::{
    config_path_from_env, create_audit_system, create_notification_channel, create_notifier,
    create_window_store, load_config, register_jobs, validate_config, AuditEvent, AuditStore,
    CommandProvisioner, Config, LifecycleOrchestrator, LogFormat, ProvisioningGateway,
    RateLimiter, SanitizedConfig, Scheduler, SqliteAuditStore, SqliteDeploymentRecorder,
    SqliteWorkshopStore,
};
use provisioner_server::{api::create_router, metrics::REGISTRY, state::AppState};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for audit event channel
const AUDIT_BUFFER_SIZE: usize = 1000;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// First 16 hex chars of the sha256 of the sanitized config.
fn config_hash(config: &Config) -> String {
    let config_json = serde_json::to_string(&SanitizedConfig::from(config)).unwrap_or_default();
    let digest = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    digest[..16].to_string()
}

async fn run() -> Result<()> {
    let config_path = config_path_from_env();
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            init_logging(LogFormat::Text);
            return Err(e).with_context(|| format!("Failed to load config from {:?}", config_path));
        }
    };

    init_logging(config.logging.format);
    info!("Loaded configuration from {:?}", config_path);

    validate_config(&config).context("Configuration validation failed")?;
    info!("Database path: {:?}", config.database.path);

    let db_path = &config.database.path;

    // Stores; each opens its own connection to the shared database.
    let audit_store: Arc<dyn AuditStore> =
        Arc::new(SqliteAuditStore::new(db_path).context("Failed to create audit store")?);
    let workshops = Arc::new(
        SqliteWorkshopStore::new(db_path).context("Failed to create workshop store")?,
    );
    let deployments = Arc::new(
        SqliteDeploymentRecorder::new(db_path).context("Failed to create deployment recorder")?,
    );
    info!("Stores initialized");

    // Audit
    let (audit_handle, audit_writer) =
        create_audit_system(Arc::clone(&audit_store), AUDIT_BUFFER_SIZE);
    let writer_handle = tokio::spawn(audit_writer.run());

    audit_handle
        .emit(AuditEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash(&config),
        })
        .await;

    // Rate-limited provisioning
    let window_store = create_window_store(&config.rate_limit, db_path)
        .context("Failed to create rate limit store")?;
    let limiter = Arc::new(RateLimiter::new(window_store, config.rate_limit.clone()));
    let command = Arc::new(CommandProvisioner::new(config.provisioner.clone()));
    let provisioner = Arc::new(
        ProvisioningGateway::new(command, limiter).with_key(config.rate_limit.key.clone()),
    );
    info!(
        command = ?config.provisioner.command,
        backend = ?config.rate_limit.backend,
        "Provisioner initialized"
    );

    // Notifications
    let notifier =
        create_notifier(&config.notifications).context("Failed to create notifier")?;
    let (notifications, dispatcher) =
        create_notification_channel(notifier, &config.notifications);
    let dispatcher_handle = dispatcher.map(|d| tokio::spawn(d.run()));

    // Orchestration
    let orchestrator = Arc::new(LifecycleOrchestrator::new(
        config.orchestrator.clone(),
        workshops.clone(),
        deployments,
        provisioner,
        Some(audit_handle.clone()),
        notifications,
    ));

    let scheduler = Arc::new(Scheduler::new(&config.scheduler, Some(audit_handle.clone())));
    register_jobs(&scheduler, Arc::clone(&orchestrator), &config.scheduler)
        .context("Failed to register jobs")?;
    scheduler.start();

    // Make sure the registry exists before the first scrape.
    Lazy::force(&REGISTRY);

    let state = Arc::new(AppState::new(
        config.clone(),
        workshops,
        Arc::clone(&orchestrator),
        Arc::clone(&scheduler),
        audit_store,
    ));
    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Stopping scheduler...");
    scheduler.stop().await;

    info!("Server shutting down...");
    audit_handle
        .emit(AuditEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // The writer and dispatcher stop once every handle is gone. The scheduler
    // and orchestrator hold clones, and in-flight runs may still hold theirs.
    drop(scheduler);
    drop(orchestrator);
    drop(audit_handle);

    let _ = writer_handle.await;
    info!("Audit writer stopped");
    if let Some(handle) = dispatcher_handle {
        let _ = handle.await;
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
