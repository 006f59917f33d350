//! Ergebnis der Echtheitspruefung
//!
//! Wird asynchron vom externen Detektor erzeugt und genau einmal an den
//! pruefenden Gespraechspartner zugestellt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CallId, UserId};

/// Ab dieser Konfidenz gilt ein Sprecher als echt
pub const ECHTHEITS_SCHWELLE: f64 = 0.5;

/// Ein einzelnes Erkennungsergebnis fuer (Anruf, analysierter Sprecher)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErkennungsErgebnis {
    pub call_id: CallId,
    /// Der analysierte (entfernte) Sprecher – nicht der Empfaenger
    pub speaker_id: UserId,
    pub timestamp: DateTime<Utc>,
    pub is_authentic: bool,
    /// Konfidenz im Bereich 0.0–1.0
    pub confidence: f64,
}

impl ErkennungsErgebnis {
    /// Erstellt ein Ergebnis und leitet `is_authentic` aus der Konfidenz ab
    pub fn aus_konfidenz(call_id: CallId, speaker_id: UserId, konfidenz: f64) -> Self {
        let confidence = konfidenz_begrenzen(konfidenz);
        Self {
            call_id,
            speaker_id,
            timestamp: Utc::now(),
            is_authentic: confidence >= ECHTHEITS_SCHWELLE,
            confidence,
        }
    }

    /// Begrenzt die Konfidenz auf 0.0–1.0 (NaN wird zu 0.0)
    pub fn normalisiert(mut self) -> Self {
        self.confidence = konfidenz_begrenzen(self.confidence);
        self
    }
}

fn konfidenz_begrenzen(wert: f64) -> f64 {
    if wert.is_nan() {
        0.0
    } else {
        wert.clamp(0.0, 1.0)
    }
}
