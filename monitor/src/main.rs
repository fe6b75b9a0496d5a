mod batching;
mod config;
mod db;
mod errors;
mod export;
mod ingest;
mod metrics;
mod model;
mod mqtt;
mod rest;
mod stats;
mod status;
mod sweep;
#[cfg(test)]
mod testing;
mod thresholds;
mod validate;

use anyhow::Context;
use config::Config;
use rest::AppState;
use std::future::pending;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "monitor=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("invalid configuration")?;

    info!("Starting IoT monitor");
    info!("HTTP server: {}", config.http_addr);
    info!("Database: {}", config.redacted_database_url());
    if config.mqtt_enabled {
        info!("MQTT broker: {}:{}", config.mqtt_broker, config.mqtt_port);
    } else {
        info!("MQTT ingest disabled");
    }

    metrics::init_metrics();

    let pool = db::make_pool(&config.database_url, config.db_max_connections)
        .await
        .context("failed to connect to database")?;

    // MQTT readings flow through a bounded channel into the batch writer.
    let mqtt_handle: JoinHandle<()> = if config.mqtt_enabled {
        info!("Channel capacity: {}", config.channel_capacity);
        let (tx, rx) = mpsc::channel(config.channel_capacity);

        let batcher_pool = pool.clone();
        let (batch_size, batch_timeout_ms) = (config.batch_size, config.batch_timeout_ms);
        tokio::spawn(async move {
            batching::run_batcher(rx, batcher_pool, batch_size, batch_timeout_ms).await;
        });

        let client_id = format!("monitor-{}", uuid::Uuid::new_v4());
        let (broker, port) = (config.mqtt_broker.clone(), config.mqtt_port);
        tokio::spawn(async move {
            if let Err(e) = mqtt::run_mqtt(broker, port, client_id, tx).await {
                error!("MQTT task failed: {}", e);
            }
        })
    } else {
        tokio::spawn(pending::<()>())
    };

    let sweeper_handle = tokio::spawn(sweep::run_sweeper(
        pool.clone(),
        config.offline_check_interval,
        config.offline_threshold,
    ));

    let app = rest::create_router(AppState {
        pool,
        offline_threshold: config.offline_threshold,
    });

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.http_addr))?;

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = mqtt_handle => {
            error!("MQTT task terminated");
        }
        _ = sweeper_handle => {
            error!("Offline sweeper terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
    Ok(())
}
