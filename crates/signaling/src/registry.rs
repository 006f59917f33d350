//! Verbindungsregister – Wer ist online und ueber welchen Kanal erreichbar
//!
//! Das Register ist die einzige Quelle fuer "wer ist online". Pro Identitaet
//! existiert hoechstens ein Eintrag; eine neuere Verbindung verdraengt die
//! aeltere. Jede Mutation verteilt unter der Schreibsperre eine neue
//! Online-Liste, sodass Praesenz-Snapshots nie eine halbe Aenderung sehen.
//!
//! ## Senden
//! Gesendet wird nie blockierend: `try_send` in eine begrenzte Queue pro
//! Verbindung. Ist die Queue voll oder geschlossen, wird die Nachricht
//! verworfen und geloggt.

use echtruf_core::{Identitaet, UserId};
use echtruf_observability::RelayMetriken;
use echtruf_protocol::Umschlag;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::presence;

// ---------------------------------------------------------------------------
// Ausgehende Queue
// ---------------------------------------------------------------------------

/// Eintraege der ausgehenden Queue einer Verbindung
#[derive(Debug, Clone)]
pub enum Ausgehend {
    /// Umschlag an den Client senden
    Signal(Umschlag),
    /// Eine neuere Verbindung derselben Identitaet hat uebernommen
    Verdraengt,
}

/// Handle auf die Send-Queue einer registrierten Verbindung
#[derive(Clone, Debug)]
pub struct Verbindung {
    pub identitaet: Identitaet,
    /// Generation der Verbindung, eindeutig pro Register
    pub verbindungs_id: u64,
    tx: mpsc::Sender<Ausgehend>,
}

impl Verbindung {
    /// Ist der Kanal noch beschreibbar?
    pub fn ist_offen(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Sendet einen Umschlag nicht-blockierend
    ///
    /// Gibt `false` zurueck wenn die Queue voll oder geschlossen ist.
    pub fn senden(&self, umschlag: Umschlag) -> bool {
        match self.tx.try_send(Ausgehend::Signal(umschlag)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(user_id = %self.identitaet.id, "Send-Queue voll – Nachricht verworfen");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(user_id = %self.identitaet.id, "Send-Queue geschlossen (Client getrennt)");
                false
            }
        }
    }

    fn verdraengen(&self) {
        if self.tx.try_send(Ausgehend::Verdraengt).is_err() {
            // Die Queue schliesst spaetestens wenn der letzte Sender faellt
            tracing::debug!(user_id = %self.identitaet.id, "Verdraengung nicht zustellbar");
        }
    }
}

// ---------------------------------------------------------------------------
// VerbindungsRegister
// ---------------------------------------------------------------------------

/// Register aller authentifizierten Verbindungen
///
/// Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct VerbindungsRegister {
    inner: Arc<RegisterInner>,
}

struct RegisterInner {
    verbindungen: RwLock<HashMap<UserId, Verbindung>>,
    naechste_id: AtomicU64,
    queue_groesse: usize,
    metriken: RelayMetriken,
}

impl VerbindungsRegister {
    /// Erstellt ein leeres Register
    pub fn neu(queue_groesse: usize, metriken: RelayMetriken) -> Self {
        Self {
            inner: Arc::new(RegisterInner {
                verbindungen: RwLock::new(HashMap::new()),
                naechste_id: AtomicU64::new(1),
                queue_groesse: queue_groesse.max(1),
                metriken,
            }),
        }
    }

    /// Registriert eine Identitaet und gibt Generation und Empfangs-Queue zurueck
    ///
    /// Eine bestehende Verbindung derselben Identitaet wird verdraengt.
    /// Die Queue endet (`None`) sobald der Eintrag das Register verlaesst.
    pub fn registrieren(&self, identitaet: Identitaet) -> (u64, mpsc::Receiver<Ausgehend>) {
        let (tx, rx) = mpsc::channel(self.inner.queue_groesse);
        let verbindungs_id = self.inner.naechste_id.fetch_add(1, Ordering::Relaxed);
        let user_id = identitaet.id.clone();
        let verbindung = Verbindung {
            identitaet,
            verbindungs_id,
            tx,
        };

        let mut verbindungen = self.inner.verbindungen.write();
        if let Some(alt) = verbindungen.insert(user_id.clone(), verbindung) {
            tracing::info!(
                user_id = %user_id,
                alt = alt.verbindungs_id,
                neu = verbindungs_id,
                "Bestehende Verbindung verdraengt"
            );
            alt.verdraengen();
        }
        self.mutation_abschliessen(&verbindungen);

        tracing::debug!(user_id = %user_id, verbindungs_id, "Verbindung registriert");
        (verbindungs_id, rx)
    }

    /// Entfernt den Eintrag einer Identitaet (idempotent)
    pub fn entfernen(&self, user_id: &UserId) -> bool {
        let mut verbindungen = self.inner.verbindungen.write();
        let entfernt = verbindungen.remove(user_id).is_some();
        if entfernt {
            self.mutation_abschliessen(&verbindungen);
            tracing::debug!(user_id = %user_id, "Verbindung entfernt");
        }
        entfernt
    }

    /// Entfernt den Eintrag nur wenn er noch zur Generation `verbindungs_id` gehoert
    pub fn entfernen_wenn(&self, user_id: &UserId, verbindungs_id: u64) -> bool {
        let mut verbindungen = self.inner.verbindungen.write();
        let passt = verbindungen
            .get(user_id)
            .is_some_and(|v| v.verbindungs_id == verbindungs_id);
        if passt {
            verbindungen.remove(user_id);
            self.mutation_abschliessen(&verbindungen);
            tracing::debug!(user_id = %user_id, verbindungs_id, "Verbindung entfernt");
        }
        passt
    }

    /// Entfernt einen Eintrag dessen Kanal nicht mehr offen ist
    pub fn veraltete_entfernen(&self, user_id: &UserId) -> bool {
        let mut verbindungen = self.inner.verbindungen.write();
        let veraltet = verbindungen.get(user_id).is_some_and(|v| !v.ist_offen());
        if veraltet {
            verbindungen.remove(user_id);
            self.mutation_abschliessen(&verbindungen);
            tracing::info!(user_id = %user_id, "Veraltete Verbindung bereinigt");
        }
        veraltet
    }

    /// Gibt die aktuelle Verbindung einer Identitaet zurueck
    pub fn nachschlagen(&self, user_id: &UserId) -> Option<Verbindung> {
        self.inner.verbindungen.read().get(user_id).cloned()
    }

    /// `true` wenn ein Eintrag existiert und sein Kanal beschreibbar ist
    pub fn ist_offen(&self, user_id: &UserId) -> bool {
        self.inner
            .verbindungen
            .read()
            .get(user_id)
            .is_some_and(Verbindung::ist_offen)
    }

    /// Sendet einen Umschlag an die aktuelle Verbindung einer Identitaet
    ///
    /// Prueft die Beschreibbarkeit unmittelbar vor dem Senden.
    pub fn senden(&self, user_id: &UserId, umschlag: Umschlag) -> bool {
        let Some(verbindung) = self.nachschlagen(user_id) else {
            tracing::debug!(user_id = %user_id, "Senden an unbekannten Client");
            return false;
        };
        if !verbindung.ist_offen() {
            tracing::debug!(user_id = %user_id, "Kanal nicht beschreibbar");
            return false;
        }
        verbindung.senden(umschlag)
    }

    /// Anzahl registrierter Verbindungen
    pub fn online_anzahl(&self) -> usize {
        self.inner.verbindungen.read().len()
    }

    /// Alle registrierten Identitaeten
    pub fn online_identitaeten(&self) -> Vec<Identitaet> {
        presence::online_menge(&self.inner.verbindungen.read())
    }

    fn mutation_abschliessen(&self, verbindungen: &HashMap<UserId, Verbindung>) {
        self.inner
            .metriken
            .connected_clients
            .set(verbindungen.len() as i64);
        presence::verteilen(verbindungen);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
