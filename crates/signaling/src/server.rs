//! HTTP-Listener – Bindet Socket, fuehrt WebSocket- und Betriebs-Endpunkte zusammen
//!
//! Endpunkte:
//! - `GET /ws` – WebSocket-Upgrade, Nachweis per `?token=` oder Bearer-Header
//! - `GET /health` – Status, Uptime, Online-Zahl, laufende Anrufe
//! - `GET /metrics` – Prometheus-Textformat

use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use echtruf_observability::{health_router, metrics_router, RelayKennzahlen};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::connection::ws_handler;
use crate::server_state::RelayZustand;

/// Baut den vollstaendigen Axum-Router des Relays
pub fn router(zustand: Arc<RelayZustand>) -> Router {
    let kennzahlen: Arc<dyn RelayKennzahlen> = zustand.clone();
    let metriken = zustand.metriken.clone();

    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(zustand)
        .merge(health_router(kennzahlen))
        .merge(metrics_router(metriken))
}

/// WebSocket-Relay-Server
pub struct RelayServer {
    zustand: Arc<RelayZustand>,
    bind_addr: SocketAddr,
    /// Erlaubte CORS-Origins. Leer = alle Origins erlaubt.
    cors_origins: Vec<String>,
}

impl RelayServer {
    /// Erstellt einen neuen RelayServer
    pub fn neu(zustand: Arc<RelayZustand>, bind_addr: SocketAddr) -> Self {
        Self {
            zustand,
            bind_addr,
            cors_origins: Vec::new(),
        }
    }

    /// Beschraenkt CORS auf die angegebenen Origins
    pub fn mit_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }

    /// Gibt die Bind-Adresse zurueck
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Bindet den Listener und bedient Verbindungen bis `shutdown` endet
    ///
    /// Beim Herunterfahren werden zuerst alle WebSocket-Verbindungen mit
    /// 1001 geschlossen, danach alle Audio-Ketten abgebaut.
    pub async fn starten(self, shutdown: impl Future<Output = ()> + Send + 'static) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        let lokale_addr = listener.local_addr()?;
        self.bedienen(listener, shutdown, lokale_addr).await
    }

    /// Wie `starten`, aber auf einem bereits gebundenen Listener
    pub async fn auf_listener(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let lokale_addr = listener.local_addr()?;
        self.bedienen(listener, shutdown, lokale_addr).await
    }

    async fn bedienen(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
        lokale_addr: SocketAddr,
    ) -> std::io::Result<()> {
        let app = router(Arc::clone(&self.zustand))
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&self.cors_origins));

        tracing::info!(adresse = %lokale_addr, "Echtruf-Relay gestartet");

        let zustand = Arc::clone(&self.zustand);
        let signal = async move {
            shutdown.await;
            tracing::info!("Relay: Shutdown-Signal empfangen");
            zustand.herunterfahren();
        };

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await?;

        // Laufende Aufnahmen und Detektor-Streams ordentlich abschliessen
        self.zustand.audio.alle_beenden().await;
        tracing::info!("Echtruf-Relay gestoppt");
        Ok(())
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET])
        .allow_headers(tower_http::cors::Any)
}
