//! Gemeinsamer Relay-Zustand
//!
//! Haelt alle geteilten Komponenten, die sicher zwischen tokio-Tasks
//! geteilt werden koennen. Die Komponenten selbst sind Clone-Handles auf
//! einen gemeinsamen inneren Zustand.

use echtruf_auth::IdentitaetsAufloeser;
use echtruf_core::ErkennungsErgebnis;
use echtruf_media::{Aufnahme, Detektor};
use echtruf_observability::{RelayKennzahlen, RelayMetriken};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::dispatch::AudioVerteiler;
use crate::erkennung::ErkennungsVerteiler;
use crate::registry::VerbindungsRegister;
use crate::sessions::SitzungsTabelle;

/// Laufzeit-Konfiguration des Relays
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Groesse der ausgehenden Queue pro Verbindung
    pub send_queue_groesse: usize,
    /// Keepalive-Intervall in Sekunden
    pub keepalive_sek: u64,
    /// Timeout fuer inaktive Verbindungen in Sekunden
    pub verbindungs_timeout_sek: u64,
    /// Groesse der Frame-Queue pro Anruf
    pub audio_queue_groesse: usize,
    /// Abtastrate wenn `recording-start` keine `sampleRate` mitbringt
    pub standard_abtastrate: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            send_queue_groesse: 64,
            keepalive_sek: 30,
            verbindungs_timeout_sek: 90,
            audio_queue_groesse: 256,
            standard_abtastrate: 16_000,
        }
    }
}

/// Gemeinsamer Relay-Zustand (Arc-geteilt)
pub struct RelayZustand {
    pub config: RelayConfig,
    pub aufloeser: Arc<dyn IdentitaetsAufloeser>,
    pub register: VerbindungsRegister,
    pub sitzungen: SitzungsTabelle,
    pub audio: AudioVerteiler,
    pub metriken: RelayMetriken,
    start_time: Instant,
    shutdown_tx: watch::Sender<bool>,
}

impl RelayZustand {
    /// Erstellt den Zustand und verdrahtet alle Komponenten
    pub fn neu(
        config: RelayConfig,
        aufloeser: Arc<dyn IdentitaetsAufloeser>,
        aufnahme: Arc<dyn Aufnahme>,
        detektor: Arc<dyn Detektor>,
        metriken: RelayMetriken,
    ) -> Arc<Self> {
        let register = VerbindungsRegister::neu(config.send_queue_groesse, metriken.clone());
        let sitzungen = SitzungsTabelle::neu();
        let audio = AudioVerteiler::neu(
            sitzungen.clone(),
            aufnahme,
            detektor,
            metriken.clone(),
            config.audio_queue_groesse,
            config.standard_abtastrate,
        );
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            config,
            aufloeser,
            register,
            sitzungen,
            audio,
            metriken,
            start_time: Instant::now(),
            shutdown_tx,
        })
    }

    /// Startet die Zustellung des Detektor-Ergebnis-Streams
    pub fn erkennung_anbinden(
        &self,
        ergebnisse: mpsc::Receiver<ErkennungsErgebnis>,
    ) -> JoinHandle<()> {
        ErkennungsVerteiler::neu(
            self.sitzungen.clone(),
            self.register.clone(),
            self.metriken.clone(),
        )
        .starten(ergebnisse)
    }

    /// Aktualisiert die Anruf-Gauge nach einer Sitzungsmutation
    pub fn anrufe_zaehlen(&self) {
        self.metriken
            .active_calls
            .set(self.sitzungen.anzahl() as i64);
    }

    /// Signalisiert allen Verbindungen das Herunterfahren
    pub fn herunterfahren(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Empfaenger fuer das Shutdown-Signal
    pub fn shutdown_abonnieren(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}

impl RelayKennzahlen for RelayZustand {
    fn uptime_sek(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn online_anzahl(&self) -> usize {
        self.register.online_anzahl()
    }

    fn aktive_anrufe(&self) -> usize {
        self.sitzungen.anzahl()
    }

    fn faehrt_herunter(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}
