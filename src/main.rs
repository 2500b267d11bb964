//! Patungan - Group-buy Commerce Backend

use std::sync::Arc;

use anyhow::Result;
use chrono::Duration;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use patungan::config::AppConfig;
use patungan::gateway::{MidtransGateway, PaymentGateway};
use patungan::http::{self, AppState};
use patungan::scheduler::{RetryPolicy, Scheduler, WorkerGroup};
use patungan::services::{EventPublisher, Services};
use patungan::store::{PgStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(client),
            Err(err) => {
                tracing::warn!(error = %err, "NATS unavailable, events disabled");
                None
            }
        },
        None => None,
    };

    let store: Arc<dyn Store> = Arc::new(PgStore::new(db));
    let scheduler = Scheduler::new();
    let gateway: Arc<dyn PaymentGateway> = Arc::new(MidtransGateway::new(
        &config.midtrans_base_url,
        &config.midtrans_server_key,
    ));
    let services = Services::new(
        store,
        scheduler.clone(),
        gateway,
        EventPublisher::new(nats),
        Duration::minutes(config.payment_ttl_minutes),
        Duration::minutes(config.group_ttl_minutes),
    );

    let armed = services.rearm_pending_tasks().await?;
    tracing::info!(armed, "expiry tasks re-armed");

    let workers = WorkerGroup::spawn(
        config.workers,
        scheduler,
        Arc::new(services.clone()),
        RetryPolicy::default(),
    );

    let app = http::router(AppState { services });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!("🚀 patungan listening on 0.0.0.0:{}", config.port);
    axum::serve(listener, app).await?;

    workers.shutdown_and_join().await;
    Ok(())
}
