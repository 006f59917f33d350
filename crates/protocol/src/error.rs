//! Fehlertypen fuer das Signaling-Protokoll

use thiserror::Error;

use crate::control::SignalTyp;

/// Gruende warum ein eingehender Umschlag verworfen wird
#[derive(Debug, Error)]
pub enum ProtokollFehler {
    /// Kein gueltiges JSON oder unbekannter Nachrichtentyp
    #[error("Ungueltiges JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Nachrichtentyp erfordert ein `to`-Feld
    #[error("Ziel fehlt fuer Nachrichtentyp '{}'", .0.als_str())]
    ZielFehlt(SignalTyp),

    /// Nachrichtentyp darf nur vom Server gesendet werden
    #[error("Nachrichtentyp '{}' ist nur ausgehend erlaubt", .0.als_str())]
    NurAusgehend(SignalTyp),
}

/// Result-Typ fuer das Signaling-Protokoll
pub type ProtokollResult<T> = Result<T, ProtokollFehler>;
