/**
 * OPERATIONAL API - Health and maintenance endpoints
 *
 * ROUTES :
 * - GET  /health    : component status, 200 when healthy, 503 when degraded
 * - POST /republish : force Home Assistant discovery, 200 on success, 500 otherwise
 *
 * No authentication: meant for container health checks on a private network.
 */

use crate::health::{HealthTracker, ServiceHealth, SERVICE_NAME};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use nutbus_core::TelemetryBridge;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub health: HealthTracker,
    pub bridge: Arc<TelemetryBridge>,
}

#[derive(Debug, Serialize)]
pub struct RepublishResponse {
    pub service: &'static str,
    pub success: bool,
    pub message: String,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/republish", post(republish))
        .with_state(app_state)
}

// GET /health
pub(crate) async fn get_health(State(app): State<AppState>) -> (StatusCode, Json<ServiceHealth>) {
    let health = app.health.get_health();
    let code = if health.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(health))
}

// POST /republish
pub(crate) async fn republish(State(app): State<AppState>) -> (StatusCode, Json<RepublishResponse>) {
    if app.bridge.republish_discovery() {
        info!("discovery republished on request");
        (
            StatusCode::OK,
            Json(RepublishResponse {
                service: SERVICE_NAME,
                success: true,
                message: format!("discovery republished for {}", app.bridge.device_id()),
            }),
        )
    } else {
        warn!("requested discovery republish failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RepublishResponse {
                service: SERVICE_NAME,
                success: false,
                message: "discovery republish failed (MQTT not connected?)".to_string(),
            }),
        )
    }
}
