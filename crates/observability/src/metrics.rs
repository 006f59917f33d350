//! Prometheus-kompatible Metriken fuer das Echtruf-Relay
//!
//! Registrierte Metriken:
//! - `echtruf_connected_clients` – Gauge: Aktuell registrierte Verbindungen
//! - `echtruf_active_calls` – Gauge: Laufende Anruf-Sitzungen
//! - `echtruf_signals_forwarded_total` – Counter: Weitergeleitete Umschlaege (type)
//! - `echtruf_signals_dropped_total` – Counter: Verworfene Umschlaege (reason)
//! - `echtruf_audio_frames_total` – Counter: Eingereihte Audio-Frames
//! - `echtruf_audio_frames_dropped_total` – Counter: Verworfene Audio-Frames
//! - `echtruf_detection_results_total` – Counter: Erkennungsergebnisse (outcome)

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Gruende fuer verworfene Umschlaege (Label `reason`)
pub mod grund {
    pub const UNGUELTIG: &str = "malformed";
    pub const UNERREICHBAR: &str = "unreachable";
    pub const DOPPELT: &str = "duplicate_session";
    pub const SELBSTANRUF: &str = "self_call";
    pub const KEINE_SITZUNG: &str = "no_session";
    pub const INTERN: &str = "internal";
}

/// Ausgang einer Ergebnis-Zustellung (Label `outcome`)
pub mod ausgang {
    pub const ZUGESTELLT: &str = "delivered";
    pub const OHNE_SITZUNG: &str = "no_session";
    pub const UNERREICHBAR: &str = "unreachable";
}

/// Alle Relay-Metriken
///
/// Clone teilt die Registry und alle Collector-Handles.
#[derive(Clone)]
pub struct RelayMetriken {
    pub registry: Arc<Registry>,

    pub connected_clients: IntGauge,
    pub active_calls: IntGauge,
    pub signals_forwarded_total: IntCounterVec,
    pub signals_dropped_total: IntCounterVec,
    pub audio_frames_total: IntCounter,
    pub audio_frames_dropped_total: IntCounter,
    pub detection_results_total: IntCounterVec,
}

impl RelayMetriken {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // --- Verbindungen und Sitzungen ---
        let connected_clients = IntGauge::with_opts(Opts::new(
            "echtruf_connected_clients",
            "Anzahl aktuell registrierter Verbindungen",
        ))?;
        registry.register(Box::new(connected_clients.clone()))?;

        let active_calls = IntGauge::with_opts(Opts::new(
            "echtruf_active_calls",
            "Anzahl laufender Anruf-Sitzungen",
        ))?;
        registry.register(Box::new(active_calls.clone()))?;

        // --- Signaling ---
        let signals_forwarded_total = IntCounterVec::new(
            Opts::new(
                "echtruf_signals_forwarded_total",
                "Weitergeleitete Signaling-Umschlaege",
            ),
            &["type"],
        )?;
        registry.register(Box::new(signals_forwarded_total.clone()))?;

        let signals_dropped_total = IntCounterVec::new(
            Opts::new(
                "echtruf_signals_dropped_total",
                "Verworfene Signaling-Umschlaege",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(signals_dropped_total.clone()))?;

        // --- Audio ---
        let audio_frames_total = IntCounter::with_opts(Opts::new(
            "echtruf_audio_frames_total",
            "Eingereihte Audio-Frames",
        ))?;
        registry.register(Box::new(audio_frames_total.clone()))?;

        let audio_frames_dropped_total = IntCounter::with_opts(Opts::new(
            "echtruf_audio_frames_dropped_total",
            "Verworfene Audio-Frames (keine Aufnahme oder Queue voll)",
        ))?;
        registry.register(Box::new(audio_frames_dropped_total.clone()))?;

        // --- Erkennung ---
        let detection_results_total = IntCounterVec::new(
            Opts::new(
                "echtruf_detection_results_total",
                "Erkennungsergebnisse nach Zustellungs-Ausgang",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(detection_results_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connected_clients,
            active_calls,
            signals_forwarded_total,
            signals_dropped_total,
            audio_frames_total,
            audio_frames_dropped_total,
            detection_results_total,
        })
    }

    /// Zaehlt einen weitergeleiteten Umschlag
    pub fn signal_weitergeleitet(&self, typ: &str) {
        self.signals_forwarded_total.with_label_values(&[typ]).inc();
    }

    /// Zaehlt einen verworfenen Umschlag
    pub fn signal_verworfen(&self, grund: &str) {
        self.signals_dropped_total.with_label_values(&[grund]).inc();
    }

    /// Zaehlt ein Erkennungsergebnis
    pub fn erkennung(&self, ausgang: &str) {
        self.detection_results_total
            .with_label_values(&[ausgang])
            .inc();
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: RelayMetriken) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<RelayMetriken>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
