//! Zustellung von Erkennungsergebnissen
//!
//! Der Detektor liefert Ergebnisse asynchron ueber einen `mpsc`-Kanal. Jedes
//! Ergebnis betrifft den analysierten Sprecher; zugestellt wird es genau
//! einmal an den anderen Teilnehmer, also den der prueft. Existiert die
//! Sitzung nicht mehr, wird das Ergebnis verworfen. Kein Retry, kein Puffer.

use echtruf_core::ErkennungsErgebnis;
use echtruf_observability::metrics::ausgang;
use echtruf_observability::RelayMetriken;
use echtruf_protocol::Umschlag;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::registry::VerbindungsRegister;
use crate::sessions::SitzungsTabelle;

/// Stellt Erkennungsergebnisse dem pruefenden Teilnehmer zu
#[derive(Clone)]
pub struct ErkennungsVerteiler {
    sitzungen: SitzungsTabelle,
    register: VerbindungsRegister,
    metriken: RelayMetriken,
}

impl ErkennungsVerteiler {
    pub fn neu(
        sitzungen: SitzungsTabelle,
        register: VerbindungsRegister,
        metriken: RelayMetriken,
    ) -> Self {
        Self {
            sitzungen,
            register,
            metriken,
        }
    }

    /// Stellt ein einzelnes Ergebnis zu; `true` wenn eingereiht
    pub fn zustellen(&self, ergebnis: ErkennungsErgebnis) -> bool {
        let ergebnis = ergebnis.normalisiert();
        let Some(empfaenger) = self
            .sitzungen
            .gegenueber(&ergebnis.call_id, &ergebnis.speaker_id)
        else {
            tracing::debug!(
                call_id = %ergebnis.call_id,
                sprecher = %ergebnis.speaker_id,
                "Erkennungsergebnis ohne Sitzung verworfen"
            );
            self.metriken.erkennung(ausgang::OHNE_SITZUNG);
            return false;
        };

        let umschlag = Umschlag::erkennung(&ergebnis).an(empfaenger.clone());
        if self.register.senden(&empfaenger, umschlag) {
            tracing::debug!(
                call_id = %ergebnis.call_id,
                empfaenger = %empfaenger,
                echt = ergebnis.is_authentic,
                konfidenz = ergebnis.confidence,
                "Erkennungsergebnis zugestellt"
            );
            self.metriken.erkennung(ausgang::ZUGESTELLT);
            true
        } else {
            self.metriken.erkennung(ausgang::UNERREICHBAR);
            false
        }
    }

    /// Verarbeitet den Ergebnis-Stream des Detektors bis er endet
    pub fn starten(self, mut ergebnisse: mpsc::Receiver<ErkennungsErgebnis>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(ergebnis) = ergebnisse.recv().await {
                self.zustellen(ergebnis);
            }
            tracing::info!("Ergebnis-Stream des Detektors beendet");
        })
    }
}
