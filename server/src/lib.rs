//! echtruf-server – Bibliotheks-Root
//!
//! Deklariert alle Server-Module und stellt den oeffentlichen Einstiegspunkt
//! fuer Integrationstests bereit.

pub mod config;

use anyhow::Result;
use config::{AuthEinstellungen, ServerConfig};
use echtruf_auth::{IdentitaetsAufloeser, JwtAufloeser, TokenVerzeichnis};
use echtruf_core::Identitaet;
use echtruf_media::{DateiAufnahme, Detektor, KeinDetektor, ProzessDetektor};
use echtruf_observability::RelayMetriken;
use echtruf_signaling::{RelayServer, RelayZustand};
use std::sync::Arc;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Verdrahtet alle Komponenten und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Identitaetsaufloeser (JWT oder statische Tokens)
    /// 2. Aufnahme auf Disk
    /// 3. Detektor-Prozess (optional) und Ergebnis-Zustellung
    /// 4. HTTP/WebSocket-Listener bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        let bind_addr = self.config.bind_adresse()?;
        let aufloeser = aufloeser_erstellen(&self.config.auth)?;
        let aufnahme = Arc::new(DateiAufnahme::neu(&self.config.aufnahme.verzeichnis));
        let metriken = RelayMetriken::neu()?;

        let mut ergebnisse = None;
        let detektor: Arc<dyn Detektor> = match &self.config.detektor.befehl {
            Some(befehl) => {
                let (programm, argumente) = befehl
                    .split_first()
                    .ok_or_else(|| anyhow::anyhow!("detektor.befehl ist leer"))?;
                let (detektor, rx) = ProzessDetektor::starten(programm, argumente)?;
                ergebnisse = Some(rx);
                Arc::new(detektor)
            }
            None => {
                tracing::info!("Kein Detektor konfiguriert – Erkennung deaktiviert");
                Arc::new(KeinDetektor)
            }
        };

        let zustand = RelayZustand::neu(
            self.config.relay_config(),
            aufloeser,
            aufnahme,
            detektor,
            metriken,
        );
        if let Some(ergebnisse) = ergebnisse {
            zustand.erkennung_anbinden(ergebnisse);
        }

        tracing::info!(
            adresse = %bind_addr,
            aufnahmen = %self.config.aufnahme.verzeichnis,
            "Server startet"
        );

        RelayServer::neu(zustand, bind_addr)
            .mit_cors_origins(self.config.netzwerk.cors_origins.clone())
            .starten(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(fehler = %e, "Ctrl-C-Handler nicht installierbar");
                }
            })
            .await?;

        tracing::info!("Server beendet");
        Ok(())
    }
}

/// Waehlt den Identitaetsaufloeser: JWT hat Vorrang vor statischen Tokens
fn aufloeser_erstellen(auth: &AuthEinstellungen) -> Result<Arc<dyn IdentitaetsAufloeser>> {
    if let Some(secret) = &auth.jwt_secret {
        tracing::info!("Identitaetsaufloesung per JWT (HS256)");
        let jwt: Arc<dyn IdentitaetsAufloeser> = Arc::new(JwtAufloeser::neu(secret)?);
        return Ok(jwt);
    }

    if auth.tokens.is_empty() {
        tracing::warn!("Weder auth.jwt_secret noch auth.tokens konfiguriert – keine Anmeldung moeglich");
    } else {
        tracing::info!(anzahl = auth.tokens.len(), "Identitaetsaufloesung per statischer Token-Tabelle");
    }
    let verzeichnis: Arc<dyn IdentitaetsAufloeser> =
        TokenVerzeichnis::mit_tokens(auth.tokens.iter().map(|(token, eintrag)| {
            (token.clone(), Identitaet::neu(eintrag.id.clone(), eintrag.name.clone()))
        }));
    Ok(verzeichnis)
}
