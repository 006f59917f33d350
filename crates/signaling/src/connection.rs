//! Client-Verbindung – Verwaltet eine einzelne WebSocket-Verbindung
//!
//! Jede Verbindung laeuft in einem eigenen tokio-Task.
//!
//! ## Ablauf
//! ```text
//! Upgrade -> Nachweis pruefen --fehlt/ungueltig--> Close 4001/4002
//!                 |
//!                 v
//!           Registrieren -> Schleife (Text: Router, Binaer: Audio)
//!                 |
//!                 v
//!           Entfernen (nur eigene Generation)
//! ```
//!
//! ## Keepalive
//! - Server sendet alle `keepalive_sek` einen Ping
//! - Bleibt der Client `verbindungs_timeout_sek` stumm, wird getrennt

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use bytes::Bytes;
use echtruf_auth::AuthError;
use echtruf_core::Identitaet;
use echtruf_protocol::SchliessGrund;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::registry::Ausgehend;
use crate::router::SignalRouter;
use crate::server_state::RelayZustand;

/// Close-Code fuer "Server faehrt herunter"
const CLOSE_GOING_AWAY: u16 = 1001;

/// Query-Parameter des Upgrade-Requests
#[derive(Debug, Default, Deserialize)]
pub struct VerbindungsParameter {
    pub token: Option<String>,
}

/// Extrahiert den Bearer-Token aus dem Authorization-Header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
}

/// Nachweis aus Query-Parameter oder Header (Query hat Vorrang)
fn nachweis_waehlen(parameter: VerbindungsParameter, headers: &HeaderMap) -> Option<String> {
    parameter
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(headers).map(str::to_string))
}

/// `GET /ws` – WebSocket-Upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(parameter): Query<VerbindungsParameter>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(zustand): State<Arc<RelayZustand>>,
) -> Response {
    let nachweis = nachweis_waehlen(parameter, &headers);
    ws.on_upgrade(move |socket| ClientConnection::neu(zustand, peer_addr).verarbeiten(socket, nachweis))
}

// ---------------------------------------------------------------------------
// ClientConnection
// ---------------------------------------------------------------------------

type Sender = SplitSink<WebSocket, Message>;

/// Verarbeitet eine einzelne WebSocket-Verbindung
pub struct ClientConnection {
    zustand: Arc<RelayZustand>,
    peer_addr: SocketAddr,
}

impl ClientConnection {
    pub fn neu(zustand: Arc<RelayZustand>, peer_addr: SocketAddr) -> Self {
        Self { zustand, peer_addr }
    }

    /// Authentifiziert und betreibt die Verbindung bis sie endet
    pub async fn verarbeiten(self, socket: WebSocket, nachweis: Option<String>) {
        let peer_addr = self.peer_addr;
        let (mut sender, mut empfaenger) = socket.split();

        let identitaet = match self.authentifizieren(nachweis.as_deref()).await {
            Ok(identitaet) => identitaet,
            Err(e) => {
                let grund = if e.ist_fehlend() {
                    SchliessGrund::KeinNachweis
                } else {
                    SchliessGrund::UngueltigerNachweis
                };
                tracing::info!(peer = %peer_addr, fehler = %e, code = grund.code(), "Authentifizierung fehlgeschlagen");
                schliessen(&mut sender, grund.code(), grund.text()).await;
                return;
            }
        };

        let user_id = identitaet.id.clone();
        let (verbindungs_id, mut ausgehend) = self.zustand.register.registrieren(identitaet.clone());
        tracing::info!(peer = %peer_addr, user_id = %user_id, verbindungs_id, "Verbindung authentifiziert");

        let router = SignalRouter::neu(Arc::clone(&self.zustand));
        let mut shutdown_rx = self.zustand.shutdown_abonnieren();
        let keepalive_intervall = Duration::from_secs(self.zustand.config.keepalive_sek.max(1));
        let timeout_dauer = Duration::from_secs(self.zustand.config.verbindungs_timeout_sek.max(1));

        let mut letzter_empfang = Instant::now();
        let mut ping_takt = tokio::time::interval(keepalive_intervall);
        ping_takt.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping_takt.tick().await;

        loop {
            tokio::select! {
                // Eingehende Nachricht vom Client
                frame = empfaenger.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            letzter_empfang = Instant::now();
                            router.verarbeiten(&identitaet, &text).await;
                        }
                        Some(Ok(Message::Binary(daten))) => {
                            letzter_empfang = Instant::now();
                            self.zustand.audio.einreichen(&user_id, Bytes::from(daten));
                        }
                        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                            letzter_empfang = Instant::now();
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!(peer = %peer_addr, user_id = %user_id, "Verbindung vom Client getrennt");
                            break;
                        }
                        Some(Err(e)) => {
                            tracing::warn!(peer = %peer_addr, user_id = %user_id, fehler = %e, "Frame-Lesefehler");
                            break;
                        }
                    }
                }

                // Ausgehende Nachricht aus dem Register
                eintrag = ausgehend.recv() => {
                    match eintrag {
                        Some(Ausgehend::Signal(umschlag)) => {
                            let text = match umschlag.to_json() {
                                Ok(t) => t,
                                Err(e) => {
                                    tracing::error!(user_id = %user_id, fehler = %e, "Umschlag nicht serialisierbar");
                                    continue;
                                }
                            };
                            if let Err(e) = sender.send(Message::Text(text)).await {
                                tracing::warn!(peer = %peer_addr, user_id = %user_id, fehler = %e, "Senden fehlgeschlagen");
                                break;
                            }
                        }
                        Some(Ausgehend::Verdraengt) | None => {
                            let grund = SchliessGrund::Verdraengt;
                            tracing::info!(peer = %peer_addr, user_id = %user_id, "Verbindung verdraengt");
                            schliessen(&mut sender, grund.code(), grund.text()).await;
                            break;
                        }
                    }
                }

                // Keepalive-Ping und Timeout-Pruefung
                _ = ping_takt.tick() => {
                    if letzter_empfang.elapsed() > timeout_dauer {
                        let grund = SchliessGrund::Zeitueberschreitung;
                        tracing::warn!(peer = %peer_addr, user_id = %user_id, "Verbindungs-Timeout");
                        schliessen(&mut sender, grund.code(), grund.text()).await;
                        break;
                    }
                    if let Err(e) = sender.send(Message::Ping(Vec::new())).await {
                        tracing::warn!(peer = %peer_addr, user_id = %user_id, fehler = %e, "Ping-Senden fehlgeschlagen");
                        break;
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(peer = %peer_addr, user_id = %user_id, "Shutdown-Signal – Verbindung wird getrennt");
                        schliessen(&mut sender, CLOSE_GOING_AWAY, "server shutting down").await;
                        break;
                    }
                }
            }
        }

        // Cleanup: Sitzungen bleiben bestehen bis der Gegenueber sie beendet
        self.zustand.register.entfernen_wenn(&user_id, verbindungs_id);
        tracing::info!(peer = %peer_addr, user_id = %user_id, "Verbindungs-Task beendet");
    }

    async fn authentifizieren(&self, nachweis: Option<&str>) -> Result<Identitaet, AuthError> {
        let nachweis = nachweis.ok_or(AuthError::KeinNachweis)?;
        self.zustand.aufloeser.identitaet_aufloesen(nachweis).await
    }
}

async fn schliessen(sender: &mut Sender, code: u16, grund: &'static str) {
    let frame = CloseFrame {
        code,
        reason: grund.into(),
    };
    if let Err(e) = sender.send(Message::Close(Some(frame))).await {
        tracing::debug!(fehler = %e, "Close-Frame nicht zustellbar");
    }
}
