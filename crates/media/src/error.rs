//! Fehlertypen fuer Aufnahme und Detektor

use thiserror::Error;

/// Fehler eines externen Mediendienstes
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialisierungsfehler: {0}")]
    Json(#[from] serde_json::Error),

    /// Schreibversuch auf ein unbekanntes oder bereits gestopptes Handle
    #[error("Unbekanntes Aufnahme-Handle: {0}")]
    UnbekanntesHandle(u64),

    /// Der externe Detektor-Prozess laeuft nicht mehr
    #[error("Detektor beendet")]
    DetektorBeendet,
}

/// Result-Typ fuer Mediendienste
pub type MediaResult<T> = Result<T, MediaError>;
