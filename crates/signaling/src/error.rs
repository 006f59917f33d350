//! Fehlertypen fuer das Signaling-Relay
//!
//! Kein Fehler dieses Crates beendet den Prozess. Authentifizierungsfehler
//! schliessen die Verbindung, alle anderen werden geloggt und verworfen
//! oder in eine Antwort an den Absender umgewandelt.

use echtruf_auth::AuthError;
use echtruf_core::{CallId, UserId};
use echtruf_media::MediaError;
use echtruf_protocol::ProtokollFehler;
use thiserror::Error;

/// Fehlertyp fuer das Signaling-Relay
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Nachweis fehlt oder ist ungueltig
    #[error("Authentifizierung fehlgeschlagen: {0}")]
    Authentifizierung(#[from] AuthError),

    /// Ziel nicht registriert oder Kanal nicht beschreibbar
    #[error("Peer nicht erreichbar: {0}")]
    UnerreichbarerPeer(UserId),

    /// Anruf-ID bereits vergeben
    #[error("Anruf-ID bereits vergeben: {0}")]
    DoppelteSitzung(CallId),

    /// Anrufer und Angerufener sind identisch
    #[error("Anruf an sich selbst: {0}")]
    SelbstAnruf(UserId),

    /// Nachricht bezieht sich auf eine nicht existierende Sitzung
    #[error("Unbekannte Sitzung: {0}")]
    UnbekannteSitzung(CallId),

    /// Nicht parsebar oder Pflichtfelder fehlen
    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    /// Aufnahme oder Detektor hat einen Fehler gemeldet
    #[error("Downstream-Fehler: {0}")]
    Downstream(#[from] MediaError),

    /// IO-Fehler (Socket, Listener)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

impl SignalingError {
    /// Erstellt einen Fehler fuer eine ungueltige Nachricht
    pub fn ungueltig(msg: impl Into<String>) -> Self {
        Self::UngueltigeNachricht(msg.into())
    }
}

impl From<ProtokollFehler> for SignalingError {
    fn from(e: ProtokollFehler) -> Self {
        Self::UngueltigeNachricht(e.to_string())
    }
}

/// Result-Typ fuer das Signaling-Relay
pub type SignalingResult<T> = Result<T, SignalingError>;
