//! Fehlertypen fuer die Identitaetsaufloesung

use thiserror::Error;

/// Alle moeglichen Fehler bei der Authentifizierung einer Verbindung
#[derive(Debug, Error)]
pub enum AuthError {
    /// Verbindung hat keinen Bearer-Nachweis mitgebracht
    #[error("Kein Nachweis uebergeben")]
    KeinNachweis,

    /// Token unbekannt, falsch signiert oder unlesbar
    #[error("Nachweis ungueltig")]
    UngueltigerNachweis,

    #[error("Nachweis abgelaufen")]
    NachweisAbgelaufen,

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),
}

impl AuthError {
    /// Fehlt der Nachweis ganz (statt ungueltig zu sein)?
    pub fn ist_fehlend(&self) -> bool {
        matches!(self, Self::KeinNachweis)
    }
}

/// Result-Alias fuer die Identitaetsaufloesung
pub type AuthResult<T> = Result<T, AuthError>;
