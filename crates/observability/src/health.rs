//! Health-Check-Endpunkt fuer Echtruf
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime, Online-Clients und laufenden Anrufen

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    ShuttingDown,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub online_clients: usize,
    pub active_calls: usize,
}

/// Kennzahlen die der Health-Check vom Relay abfragt
pub trait RelayKennzahlen: Send + Sync {
    fn uptime_sek(&self) -> u64;
    fn online_anzahl(&self) -> usize;
    fn aktive_anrufe(&self) -> usize;
    /// `true` sobald das Herunterfahren begonnen hat
    fn faehrt_herunter(&self) -> bool {
        false
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(quelle: Arc<dyn RelayKennzahlen>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(quelle)
}

/// `GET /health` – gibt den Relay-Status zurueck
async fn health_handler(State(quelle): State<Arc<dyn RelayKennzahlen>>) -> impl IntoResponse {
    let (status, http_status) = if quelle.faehrt_herunter() {
        (HealthStatus::ShuttingDown, StatusCode::SERVICE_UNAVAILABLE)
    } else {
        (HealthStatus::Healthy, StatusCode::OK)
    };

    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: quelle.uptime_sek(),
        online_clients: quelle.online_anzahl(),
        active_calls: quelle.aktive_anrufe(),
    };

    (http_status, Json(response))
}
