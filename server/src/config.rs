//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use echtruf_observability::logging::{log_format_gueltig, log_level_gueltig};
use echtruf_signaling::RelayConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;

/// Mindestlaenge des JWT-Geheimnisses
const MIN_SECRET_LAENGE: usize = 32;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Relay-Einstellungen (Queues, Keepalive)
    pub signaling: SignalingEinstellungen,
    /// Identitaetsaufloesung
    pub auth: AuthEinstellungen,
    /// Aufnahme-Einstellungen
    pub aufnahme: AufnahmeEinstellungen,
    /// Detektor-Einstellungen
    pub detektor: DetektorEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer HTTP und WebSocket
    pub bind_adresse: String,
    /// Port fuer `/ws`, `/health` und `/metrics`
    pub port: u16,
    /// CORS-Origins (leer = alle erlaubt)
    pub cors_origins: Vec<String>,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            port: 8080,
            cors_origins: vec![],
        }
    }
}

/// Relay-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingEinstellungen {
    /// Ausgehende Queue pro Verbindung
    pub send_queue_groesse: usize,
    /// Ping-Intervall in Sekunden
    pub keepalive_sek: u64,
    /// Trennung nach so vielen Sekunden ohne Empfang
    pub verbindungs_timeout_sek: u64,
    /// Frame-Queue pro Anruf
    pub audio_queue_groesse: usize,
}

impl Default for SignalingEinstellungen {
    fn default() -> Self {
        let relay = RelayConfig::default();
        Self {
            send_queue_groesse: relay.send_queue_groesse,
            keepalive_sek: relay.keepalive_sek,
            verbindungs_timeout_sek: relay.verbindungs_timeout_sek,
            audio_queue_groesse: relay.audio_queue_groesse,
        }
    }
}

/// Statischer Token-Eintrag (Entwicklung)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEintrag {
    pub id: String,
    pub name: String,
}

/// Identitaetsaufloesung: JWT hat Vorrang vor der statischen Tabelle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthEinstellungen {
    /// HS256-Geheimnis (mindestens 32 Zeichen)
    pub jwt_secret: Option<String>,
    /// Statische Tokens: token -> Identitaet
    pub tokens: HashMap<String, TokenEintrag>,
}

/// Aufnahme-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AufnahmeEinstellungen {
    /// Zielverzeichnis der Aufnahmen
    pub verzeichnis: String,
    /// Abtastrate wenn `recording-start` keine mitbringt
    pub abtastrate: u32,
}

impl Default for AufnahmeEinstellungen {
    fn default() -> Self {
        Self {
            verzeichnis: "aufnahmen".into(),
            abtastrate: RelayConfig::default().standard_abtastrate,
        }
    }
}

/// Detektor-Einstellungen
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetektorEinstellungen {
    /// Programm und Argumente des externen Detektors (fehlt = deaktiviert)
    pub befehl: Option<Vec<String>>,
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        let config = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => toml::from_str::<Self>(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
                ))
            }
        };
        config.validieren()?;
        Ok(config)
    }

    /// Prueft Werte, die serde allein nicht abfangen kann
    pub fn validieren(&self) -> anyhow::Result<()> {
        if let Some(secret) = &self.auth.jwt_secret {
            anyhow::ensure!(
                secret.len() >= MIN_SECRET_LAENGE,
                "auth.jwt_secret muss mindestens {MIN_SECRET_LAENGE} Zeichen lang sein"
            );
        }
        for (token, eintrag) in &self.auth.tokens {
            anyhow::ensure!(
                !token.is_empty() && !eintrag.id.is_empty(),
                "auth.tokens: leerer Token oder leere Benutzer-ID"
            );
        }
        anyhow::ensure!(
            self.signaling.send_queue_groesse > 0 && self.signaling.audio_queue_groesse > 0,
            "signaling: Queue-Groessen muessen groesser als 0 sein"
        );
        anyhow::ensure!(
            self.signaling.verbindungs_timeout_sek > self.signaling.keepalive_sek,
            "signaling.verbindungs_timeout_sek muss groesser als keepalive_sek sein"
        );
        anyhow::ensure!(self.aufnahme.abtastrate > 0, "aufnahme.abtastrate muss groesser als 0 sein");
        if let Some(befehl) = &self.detektor.befehl {
            anyhow::ensure!(
                befehl.first().is_some_and(|p| !p.is_empty()),
                "detektor.befehl braucht mindestens das Programm"
            );
        }
        anyhow::ensure!(
            log_level_gueltig(&self.logging.level),
            "logging.level '{}' ist ungueltig",
            self.logging.level
        );
        anyhow::ensure!(
            log_format_gueltig(&self.logging.format),
            "logging.format '{}' ist ungueltig",
            self.logging.format
        );
        Ok(())
    }

    /// Gibt die vollstaendige Bind-Adresse zurueck
    pub fn bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        let text = format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.port);
        text.parse()
            .map_err(|e| anyhow::anyhow!("Ungueltige Bind-Adresse '{text}': {e}"))
    }

    /// Laufzeit-Konfiguration fuer das Relay
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            send_queue_groesse: self.signaling.send_queue_groesse,
            keepalive_sek: self.signaling.keepalive_sek,
            verbindungs_timeout_sek: self.signaling.verbindungs_timeout_sek,
            audio_queue_groesse: self.signaling.audio_queue_groesse,
            standard_abtastrate: self.aufnahme.abtastrate,
        }
    }
}
