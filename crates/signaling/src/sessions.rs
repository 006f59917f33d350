//! Sitzungstabelle – Laufende Zwei-Parteien-Anrufe
//!
//! Pro Anruf-ID hoechstens eine Sitzung mit genau zwei verschiedenen
//! Teilnehmern. Die Aufnahme ist ein orthogonales Flag und nur gesetzt
//! solange die Sitzung existiert.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use echtruf_core::{CallId, UserId};
use std::sync::Arc;

use crate::error::{SignalingError, SignalingResult};

/// Lebenszyklus eines Anrufs
///
/// `Beendet` und `Abgelehnt` sind nicht modelliert: beide entfernen die Sitzung.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnrufZustand {
    Angefragt,
    Angenommen,
}

/// Eine laufende Anruf-Sitzung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnrufSitzung {
    pub call_id: CallId,
    pub anrufer: UserId,
    pub angerufener: UserId,
    pub zustand: AnrufZustand,
    pub aufnahme_aktiv: bool,
}

impl AnrufSitzung {
    /// Ist `user_id` Anrufer oder Angerufener?
    pub fn ist_teilnehmer(&self, user_id: &UserId) -> bool {
        &self.anrufer == user_id || &self.angerufener == user_id
    }

    /// Der jeweils andere Teilnehmer
    pub fn gegenueber(&self, user_id: &UserId) -> Option<&UserId> {
        if &self.anrufer == user_id {
            Some(&self.angerufener)
        } else if &self.angerufener == user_id {
            Some(&self.anrufer)
        } else {
            None
        }
    }

    /// Beide Teilnehmer (Anrufer zuerst)
    pub fn teilnehmer(&self) -> [&UserId; 2] {
        [&self.anrufer, &self.angerufener]
    }
}

/// Tabelle aller laufenden Sitzungen
///
/// Thread-safe via DashMap. Clone teilt den inneren Zustand.
#[derive(Clone, Default)]
pub struct SitzungsTabelle {
    sitzungen: Arc<DashMap<CallId, AnrufSitzung>>,
}

impl SitzungsTabelle {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Legt eine Sitzung im Zustand `Angefragt` an
    pub fn erstellen(
        &self,
        call_id: CallId,
        anrufer: UserId,
        angerufener: UserId,
    ) -> SignalingResult<AnrufSitzung> {
        if anrufer == angerufener {
            return Err(SignalingError::SelbstAnruf(anrufer));
        }

        match self.sitzungen.entry(call_id.clone()) {
            Entry::Occupied(_) => Err(SignalingError::DoppelteSitzung(call_id)),
            Entry::Vacant(frei) => {
                let sitzung = AnrufSitzung {
                    call_id,
                    anrufer,
                    angerufener,
                    zustand: AnrufZustand::Angefragt,
                    aufnahme_aktiv: false,
                };
                frei.insert(sitzung.clone());
                Ok(sitzung)
            }
        }
    }

    pub fn holen(&self, call_id: &CallId) -> Option<AnrufSitzung> {
        self.sitzungen.get(call_id).map(|s| s.value().clone())
    }

    /// Uebergang `Angefragt -> Angenommen`
    pub fn annehmen(&self, call_id: &CallId) -> Option<AnrufSitzung> {
        self.sitzungen.get_mut(call_id).map(|mut s| {
            s.zustand = AnrufZustand::Angenommen;
            s.clone()
        })
    }

    /// Setzt das Aufnahme-Flag; ohne Sitzung passiert nichts
    pub fn aufnahme_setzen(&self, call_id: &CallId, aktiv: bool) -> Option<AnrufSitzung> {
        self.sitzungen.get_mut(call_id).map(|mut s| {
            s.aufnahme_aktiv = aktiv;
            s.clone()
        })
    }

    /// Entfernt eine Sitzung (idempotent)
    pub fn entfernen(&self, call_id: &CallId) -> Option<AnrufSitzung> {
        self.sitzungen.remove(call_id).map(|(_, s)| s)
    }

    /// Der andere Teilnehmer von `user_id` im Anruf `call_id`
    pub fn gegenueber(&self, call_id: &CallId, user_id: &UserId) -> Option<UserId> {
        self.sitzungen
            .get(call_id)
            .and_then(|s| s.gegenueber(user_id).cloned())
    }

    /// Sucht die Sitzung mit aktiver Aufnahme an der `user_id` teilnimmt
    ///
    /// Lineare Suche ueber alle Sitzungen.
    pub fn aktive_aufnahme_fuer(&self, user_id: &UserId) -> Option<AnrufSitzung> {
        self.sitzungen
            .iter()
            .find(|s| s.aufnahme_aktiv && s.ist_teilnehmer(user_id))
            .map(|s| s.value().clone())
    }

    pub fn anzahl(&self) -> usize {
        self.sitzungen.len()
    }
}
