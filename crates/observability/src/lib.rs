//! # echtruf-observability
//!
//! Observability-Crate fuer Echtruf:
//! - Prometheus-kompatible Metriken des Relays (`/metrics`)
//! - Health-Check-Endpunkt (`/health`)
//! - Structured Logging via tracing-subscriber (Text oder JSON)

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{health_router, HealthResponse, HealthStatus, RelayKennzahlen};
pub use logging::logging_initialisieren;
pub use metrics::{metrics_router, RelayMetriken};
