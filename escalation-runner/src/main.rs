use anyhow::Result;
use escalation_api::run as run_api;
use escalation_core::db::{create_pool, run_migrations};
use escalation_core::{Config, EscalationContext, PgStore};
use escalation_delivery::{ApnsSender, DevicePushChannel, FcmSender, HttpCallbackChannel};
use escalation_engine::{drive, EscalationTask};
use std::sync::Arc;
use tokio::sync::watch;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn wait_for(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    init_tracing();

    tracing::info!("Starting maintenance escalation service");

    let config = Config::from_env();

    if config.database.run_migrations {
        run_migrations(&config.database).await?;
    }
    let pool = create_pool(&config.database).await?;
    let store = Arc::new(PgStore::new(pool));

    let callback = HttpCallbackChannel::new(&config.callback)?;
    if config.callback.url.is_none() {
        tracing::warn!("CALLBACK_URL not set, overdue callbacks are disabled");
    }
    let push = DevicePushChannel::new(
        config.push.clone(),
        store.clone(),
        Arc::new(ApnsSender::new(&config.delivery)?),
        Arc::new(FcmSender::new(&config.delivery)?),
    );

    let schedule = config.schedule.clone();
    let ctx = EscalationContext::new(config, store, Arc::new(callback), Arc::new(push));
    let task = EscalationTask::new(ctx);

    tracing::info!("Escalation context initialized");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = if schedule.enabled {
        let task = Arc::new(task.clone());
        let shutdown = wait_for(shutdown_rx.clone());
        Some(tokio::spawn(async move {
            drive(task, schedule, shutdown).await;
        }))
    } else {
        tracing::info!("Scheduler disabled, runs only via the trigger routes");
        None
    };

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            // Keep the sender alive so the services are not stopped.
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    // API server runs in main task
    tracing::info!("Starting API server");
    let api = run_api(task, wait_for(shutdown_rx)).await;

    if let Some(scheduler) = scheduler {
        if let Err(e) = scheduler.await {
            tracing::error!("Scheduler task failed: {}", e);
        }
    }

    api
}
