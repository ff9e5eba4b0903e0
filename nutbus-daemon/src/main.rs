/**
 * NUTBUS DAEMON - Entry point of the UPS <-> MQTT service
 *
 * ROLE: Full bootstrap: config, storage, MQTT client, NUT bridge,
 * collector, HTTP health API, then graceful shutdown on SIGINT/SIGTERM.
 *
 * SHUTDOWN ORDER: HTTP -> collector (final flush) -> bridge -> MQTT.
 */

mod config;
mod health;
mod http;

use crate::health::HealthTracker;
use crate::http::AppState;

use anyhow::Context;
use nutbus_core::{BusClient, Collector, JsonFileSink, MetricsSink, RetryingSink, TelemetryBridge};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Load environment variables from .env (if present)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        error!("fatal: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cfg = config::load_config().await.context("loading configuration")?;
    info!(
        "nutbus {} starting (broker {}:{}, upsd {}:{}/{})",
        env!("CARGO_PKG_VERSION"),
        cfg.mqtt.host,
        cfg.mqtt.port,
        cfg.nut.host,
        cfg.nut.port,
        cfg.nut.ups_name
    );

    // storage
    let file = JsonFileSink::open(&cfg.collector.storage_path)
        .with_context(|| format!("opening storage file {}", cfg.collector.storage_path.display()))?
        .with_max_rows(cfg.collector.max_rows);
    let sink: Arc<dyn MetricsSink> = Arc::new(RetryingSink::new(
        file,
        cfg.collector.write_attempts,
        Duration::from_millis(cfg.collector.write_retry_pause_ms),
    ));

    // services
    let bus = BusClient::new(&cfg.mqtt.client_id);
    let registry = Arc::new(cfg.registry());
    for entry in registry.entries() {
        info!("collecting {} as {} ({})", entry.device_id, entry.storage_key, entry.label);
    }
    let bridge = TelemetryBridge::new(Arc::clone(&bus), cfg.bridge_settings());
    let collector = Collector::new(Arc::clone(&bus), registry, Arc::clone(&sink), cfg.collector_settings());

    // subscriptions are (re)issued on every connection; patterns already routed are skipped
    {
        let bridge = Arc::downgrade(&bridge);
        let collector = Arc::downgrade(&collector);
        bus.on_connect(move |epoch| {
            if let Some(collector) = collector.upgrade() {
                if let Err(e) = collector.setup_subscriptions() {
                    warn!("collector subscriptions incomplete (epoch {}): {}", epoch, e);
                }
            }
            if let Some(bridge) = bridge.upgrade() {
                if let Err(e) = bridge.setup_subscriptions() {
                    warn!("status subscription failed (epoch {}): {}", epoch, e);
                }
            }
        });
    }

    if let Err(e) = bus.connect(cfg.bus_settings()).await {
        warn!("MQTT broker not reachable yet ({}), retrying in background", e);
    }

    bridge.start(cfg.nut_source());
    collector.start();

    // HTTP
    let app_state = AppState {
        health: HealthTracker::new(
            Arc::clone(&bus),
            Arc::clone(&bridge),
            Arc::clone(&collector),
            Arc::clone(&sink),
        ),
        bridge: Arc::clone(&bridge),
    };
    let app = http::build_router(app_state);

    let addr: SocketAddr = format!("{}:{}", cfg.http.bind, cfg.http.port)
        .parse()
        .with_context(|| format!("invalid HTTP bind address {}:{}", cfg.http.bind, cfg.http.port))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("health check on http://{addr}/health");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = served {
        error!("HTTP server error: {}", e);
    }

    info!("shutting down");
    let report = collector.stop().await;
    if !report.failed.is_empty() {
        warn!("final flush could not store {:?}", report.failed);
    }
    bridge.stop().await;
    bus.disconnect().await;
    info!("nutbus stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("cannot listen for SIGTERM: {}", e);
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
    info!("shutdown signal received");
}
