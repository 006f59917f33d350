//! Audio-Verteilung – Sequentielle Verarbeitung binaerer Frames pro Anruf
//!
//! Binaere Frames tragen keine Anruf-ID. Der Absender wird ueber die
//! Sitzungstabelle einer Sitzung mit aktiver Aufnahme zugeordnet; der
//! analysierte Sprecher ist der Gegenueber des Absenders.
//!
//! ## Ketten
//! ```text
//! einreichen(absender, frame) --(Limit)--> [Queue call X] --> Arbeiter X --> Aufnahme
//! starten / stoppen / beenden ----------->                               \-> Detektor
//! ```
//! Pro Anruf-ID gibt es genau eine Queue und einen Arbeiter-Task. Die Kette
//! entsteht mit `recording-start` und wird beim Ende der Sitzung abgebaut;
//! Frames ohne Kette werden verworfen. Innerhalb einer Kette wird strikt der
//! Reihe nach gearbeitet; verschiedene Anrufe laufen parallel.
//!
//! Steuerauftraege warten nie: die Queue selbst ist unbegrenzt, nur Frames
//! unterliegen dem Limit `queue_groesse`. Ein haengender Dienst haelt damit
//! nur seine eigene Kette auf, nie den Router.
//!
//! Ein Fehler von Aufnahme oder Detektor wird geloggt, die Kette laeuft
//! weiter. Aufnahme und Detektor werden unabhaengig voneinander gestartet.

use bytes::Bytes;
use dashmap::DashMap;
use echtruf_core::{CallId, UserId};
use echtruf_media::{Aufnahme, AufnahmeHandle, Detektor};
use echtruf_observability::RelayMetriken;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::sessions::SitzungsTabelle;

/// Wartezeit pro Kette beim Herunterfahren, danach wird der Arbeiter abgebrochen
const ABSCHLUSS_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Auftraege
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum AudioAuftrag {
    /// Aufnahme einschalten und fuer einen Sprecher sofort beginnen
    Start { sprecher: UserId, abtastrate: u32 },
    /// Ein Frame des Sprechers
    Frame { sprecher: UserId, daten: Bytes },
    /// Alle Aufnahmen der Kette schliessen, Analyse beenden
    Stop,
}

struct Kette {
    tx: mpsc::UnboundedSender<AudioAuftrag>,
    /// Eingereihte, noch nicht verarbeitete Frames
    ausstehend: Arc<AtomicUsize>,
    arbeiter: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// AudioVerteiler
// ---------------------------------------------------------------------------

/// Verteilt Audio-Frames an Aufnahme und Detektor
///
/// Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct AudioVerteiler {
    inner: Arc<VerteilerInner>,
}

struct VerteilerInner {
    ketten: DashMap<CallId, Kette>,
    sitzungen: SitzungsTabelle,
    aufnahme: Arc<dyn Aufnahme>,
    detektor: Arc<dyn Detektor>,
    metriken: RelayMetriken,
    queue_groesse: usize,
    standard_abtastrate: u32,
}

impl AudioVerteiler {
    pub fn neu(
        sitzungen: SitzungsTabelle,
        aufnahme: Arc<dyn Aufnahme>,
        detektor: Arc<dyn Detektor>,
        metriken: RelayMetriken,
        queue_groesse: usize,
        standard_abtastrate: u32,
    ) -> Self {
        Self {
            inner: Arc::new(VerteilerInner {
                ketten: DashMap::new(),
                sitzungen,
                aufnahme,
                detektor,
                metriken,
                queue_groesse: queue_groesse.max(1),
                standard_abtastrate,
            }),
        }
    }

    /// Reiht einen Frame des Absenders ein
    ///
    /// Ohne Sitzung mit aktiver Aufnahme wird der Frame verworfen; das ist
    /// der Normalfall bevor die Aufnahme eingeschaltet wurde. Eine Kette
    /// wird hier nie erzeugt.
    pub fn einreichen(&self, absender: &UserId, daten: Bytes) {
        let Some(sitzung) = self.inner.sitzungen.aktive_aufnahme_fuer(absender) else {
            tracing::trace!(user_id = %absender, "Audio-Frame ohne aktive Aufnahme verworfen");
            self.inner.metriken.audio_frames_dropped_total.inc();
            return;
        };
        let Some(sprecher) = sitzung.gegenueber(absender).cloned() else {
            return;
        };

        let Some((tx, ausstehend)) = self
            .inner
            .ketten
            .get(&sitzung.call_id)
            .map(|k| (k.tx.clone(), Arc::clone(&k.ausstehend)))
        else {
            tracing::debug!(call_id = %sitzung.call_id, "Keine Audio-Kette – Frame verworfen");
            self.inner.metriken.audio_frames_dropped_total.inc();
            return;
        };

        if ausstehend.fetch_add(1, Ordering::AcqRel) >= self.inner.queue_groesse {
            ausstehend.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!(call_id = %sitzung.call_id, "Audio-Queue voll – Frame verworfen");
            self.inner.metriken.audio_frames_dropped_total.inc();
            return;
        }

        if tx.send(AudioAuftrag::Frame { sprecher, daten }).is_err() {
            ausstehend.fetch_sub(1, Ordering::AcqRel);
            tracing::debug!(call_id = %sitzung.call_id, "Audio-Kette beendet – Frame verworfen");
            self.inner.metriken.audio_frames_dropped_total.inc();
            return;
        }
        self.inner.metriken.audio_frames_total.inc();
    }

    /// Schaltet die Aufnahme im Anruf `call_id` ein und startet `sprecher`
    ///
    /// Erzeugt die Kette falls noetig. Wartet nie auf die Kette.
    pub fn starten(&self, call_id: &CallId, sprecher: UserId, abtastrate: u32) {
        let tx = self.kette_sender(call_id);
        if tx
            .send(AudioAuftrag::Start {
                sprecher,
                abtastrate,
            })
            .is_err()
        {
            tracing::warn!(call_id = %call_id, "Audio-Kette nicht erreichbar (Start)");
        }
    }

    /// Stoppt Aufnahme und Analyse; die Kette bleibt fuer einen Neustart bestehen
    pub fn stoppen(&self, call_id: &CallId) {
        let Some(tx) = self.inner.ketten.get(call_id).map(|k| k.tx.clone()) else {
            return;
        };
        if tx.send(AudioAuftrag::Stop).is_err() {
            tracing::debug!(call_id = %call_id, "Audio-Kette bereits beendet (Stop)");
        }
    }

    /// Stoppt und baut die Kette ab (Ende der Sitzung, idempotent)
    ///
    /// Der Arbeiter schliesst offene Aufnahmen und endet danach; Frames
    /// hinter dem Stop werden verworfen.
    pub fn beenden(&self, call_id: &CallId) -> Option<JoinHandle<()>> {
        let (_, kette) = self.inner.ketten.remove(call_id)?;
        if kette.tx.send(AudioAuftrag::Stop).is_err() {
            tracing::debug!(call_id = %call_id, "Audio-Kette bereits beendet");
        }
        tracing::debug!(call_id = %call_id, "Audio-Kette abgebaut");
        Some(kette.arbeiter)
    }

    /// Baut alle Ketten ab und wartet bis ihre Aufnahmen geschlossen sind
    ///
    /// Ein Arbeiter, der nicht innerhalb von `ABSCHLUSS_TIMEOUT` endet,
    /// wird abgebrochen.
    pub async fn alle_beenden(&self) {
        let call_ids: Vec<CallId> = self.inner.ketten.iter().map(|k| k.key().clone()).collect();
        for call_id in call_ids {
            let Some(mut arbeiter) = self.beenden(&call_id) else {
                continue;
            };
            match tokio::time::timeout(ABSCHLUSS_TIMEOUT, &mut arbeiter).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(call_id = %call_id, fehler = %e, "Audio-Arbeiter abgebrochen");
                }
                Err(_) => {
                    tracing::warn!(call_id = %call_id, "Audio-Arbeiter haengt – wird abgebrochen");
                    arbeiter.abort();
                }
            }
        }
    }

    /// Anzahl bestehender Ketten
    pub fn ketten_anzahl(&self) -> usize {
        self.inner.ketten.len()
    }

    fn kette_sender(&self, call_id: &CallId) -> mpsc::UnboundedSender<AudioAuftrag> {
        self.inner
            .ketten
            .entry(call_id.clone())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                let ausstehend = Arc::new(AtomicUsize::new(0));
                let arbeiter = KettenArbeiter {
                    call_id: call_id.clone(),
                    aufnahme: Arc::clone(&self.inner.aufnahme),
                    detektor: Arc::clone(&self.inner.detektor),
                    abtastrate: self.inner.standard_abtastrate,
                    aktiv: false,
                    ausstehend: Arc::clone(&ausstehend),
                    sprecher: HashMap::new(),
                };
                tracing::debug!(call_id = %call_id, "Audio-Kette erzeugt");
                Kette {
                    tx,
                    ausstehend,
                    arbeiter: tokio::spawn(arbeiter.laufen(rx)),
                }
            })
            .tx
            .clone()
    }
}

// ---------------------------------------------------------------------------
// KettenArbeiter
// ---------------------------------------------------------------------------

/// Zustand eines analysierten Sprechers
///
/// Aufnahme und Analyse sind unabhaengig: scheitert die eine, laeuft die
/// andere weiter.
#[derive(Debug, Default)]
struct SprecherZustand {
    aufnahme: Option<AufnahmeHandle>,
    analyse: bool,
}

struct KettenArbeiter {
    call_id: CallId,
    aufnahme: Arc<dyn Aufnahme>,
    detektor: Arc<dyn Detektor>,
    abtastrate: u32,
    /// Zwischen Start und Stop
    aktiv: bool,
    ausstehend: Arc<AtomicUsize>,
    sprecher: HashMap<UserId, SprecherZustand>,
}

impl KettenArbeiter {
    async fn laufen(mut self, mut rx: mpsc::UnboundedReceiver<AudioAuftrag>) {
        while let Some(auftrag) = rx.recv().await {
            match auftrag {
                AudioAuftrag::Start {
                    sprecher,
                    abtastrate,
                } => {
                    self.aktiv = true;
                    self.abtastrate = abtastrate;
                    self.sprecher_starten(&sprecher).await;
                }
                AudioAuftrag::Frame { sprecher, daten } => {
                    self.ausstehend.fetch_sub(1, Ordering::AcqRel);
                    self.frame_verarbeiten(sprecher, &daten).await;
                }
                AudioAuftrag::Stop => {
                    self.aktiv = false;
                    self.alles_stoppen().await;
                }
            }
        }
        self.alles_stoppen().await;
        tracing::debug!(call_id = %self.call_id, "Audio-Arbeiter beendet");
    }

    /// Oeffnet Aufnahme und Analyse fuer einen Sprecher (idempotent)
    async fn sprecher_starten(&mut self, sprecher: &UserId) {
        if self.sprecher.contains_key(sprecher) {
            return;
        }
        let mut zustand = SprecherZustand::default();

        match self
            .aufnahme
            .aufnahme_starten(&self.call_id, sprecher, self.abtastrate)
            .await
        {
            Ok(handle) => zustand.aufnahme = Some(handle),
            Err(e) => {
                tracing::warn!(call_id = %self.call_id, sprecher = %sprecher, fehler = %e, "Aufnahme-Start fehlgeschlagen");
            }
        }

        match self
            .detektor
            .verarbeitung_starten(&self.call_id, sprecher)
            .await
        {
            Ok(()) => zustand.analyse = true,
            Err(e) => {
                tracing::warn!(call_id = %self.call_id, sprecher = %sprecher, fehler = %e, "Detektor-Start fehlgeschlagen");
            }
        }

        self.sprecher.insert(sprecher.clone(), zustand);
    }

    async fn frame_verarbeiten(&mut self, sprecher: UserId, daten: &[u8]) {
        if !self.aktiv {
            tracing::trace!(call_id = %self.call_id, "Frame nach Stop verworfen");
            return;
        }
        self.sprecher_starten(&sprecher).await;
        let Some(zustand) = self.sprecher.get(&sprecher) else {
            return;
        };

        if let Some(handle) = zustand.aufnahme {
            if let Err(e) = self.aufnahme.chunk_schreiben(handle, daten).await {
                tracing::warn!(call_id = %self.call_id, sprecher = %sprecher, fehler = %e, "Aufnahme-Chunk fehlgeschlagen");
            }
        }

        if zustand.analyse {
            if let Err(e) = self
                .detektor
                .chunk_verarbeiten(&self.call_id, &sprecher, daten)
                .await
            {
                tracing::warn!(call_id = %self.call_id, sprecher = %sprecher, fehler = %e, "Detektor-Chunk fehlgeschlagen");
            }
        }
    }

    async fn alles_stoppen(&mut self) {
        if self.sprecher.is_empty() {
            return;
        }
        let mut analyse_laeuft = false;
        for (sprecher, zustand) in self.sprecher.drain() {
            analyse_laeuft |= zustand.analyse;
            if let Some(handle) = zustand.aufnahme {
                if let Err(e) = self.aufnahme.aufnahme_stoppen(handle).await {
                    tracing::warn!(call_id = %self.call_id, sprecher = %sprecher, fehler = %e, "Aufnahme-Stopp fehlgeschlagen");
                }
            }
        }
        if analyse_laeuft {
            if let Err(e) = self.detektor.verarbeitung_stoppen(&self.call_id).await {
                tracing::warn!(call_id = %self.call_id, fehler = %e, "Detektor-Stopp fehlgeschlagen");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use echtruf_media::{MediaError, MediaResult};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU64};

    /// Protokolliert jeden Aufruf an Aufnahme und Detektor
    #[derive(Default)]
    pub(crate) struct Protokoll {
        pub eintraege: Mutex<Vec<String>>,
        naechstes: AtomicU64,
        pub chunk_fehler: AtomicBool,
        /// `chunk_schreiben` kehrt nie zurueck
        pub chunk_haengt: AtomicBool,
        pub start_fehler: AtomicBool,
    }

    impl Protokoll {
        pub fn alle(&self) -> Vec<String> {
            self.eintraege.lock().clone()
        }

        fn notieren(&self, eintrag: String) {
            self.eintraege.lock().push(eintrag);
        }
    }

    #[async_trait]
    impl Aufnahme for Protokoll {
        async fn aufnahme_starten(
            &self,
            call_id: &CallId,
            sprecher: &UserId,
            abtastrate: u32,
        ) -> MediaResult<AufnahmeHandle> {
            if self.start_fehler.load(Ordering::Relaxed) {
                self.notieren(format!("rec-start-fehler {call_id} {sprecher}"));
                return Err(MediaError::Io(std::io::Error::other("Platte voll")));
            }
            self.notieren(format!("rec-start {call_id} {sprecher} {abtastrate}"));
            Ok(AufnahmeHandle(self.naechstes.fetch_add(1, Ordering::Relaxed)))
        }

        async fn chunk_schreiben(&self, handle: AufnahmeHandle, daten: &[u8]) -> MediaResult<()> {
            self.notieren(format!("rec-chunk {} {}", handle.0, String::from_utf8_lossy(daten)));
            if self.chunk_haengt.load(Ordering::Relaxed) {
                std::future::pending::<()>().await;
            }
            if self.chunk_fehler.load(Ordering::Relaxed) {
                return Err(MediaError::UnbekanntesHandle(handle.0));
            }
            Ok(())
        }

        async fn aufnahme_stoppen(&self, handle: AufnahmeHandle) -> MediaResult<()> {
            self.notieren(format!("rec-stop {}", handle.0));
            Ok(())
        }
    }

    #[async_trait]
    impl Detektor for Protokoll {
        async fn verarbeitung_starten(&self, call_id: &CallId, sprecher: &UserId) -> MediaResult<()> {
            self.notieren(format!("det-start {call_id} {sprecher}"));
            Ok(())
        }

        async fn chunk_verarbeiten(
            &self,
            call_id: &CallId,
            sprecher: &UserId,
            daten: &[u8],
        ) -> MediaResult<()> {
            self.notieren(format!(
                "det-chunk {call_id} {sprecher} {}",
                String::from_utf8_lossy(daten)
            ));
            Ok(())
        }

        async fn verarbeitung_stoppen(&self, call_id: &CallId) -> MediaResult<()> {
            self.notieren(format!("det-stop {call_id}"));
            Ok(())
        }
    }

    fn aufbau_mit_queue(queue_groesse: usize) -> (AudioVerteiler, SitzungsTabelle, Arc<Protokoll>) {
        let sitzungen = SitzungsTabelle::neu();
        let protokoll = Arc::new(Protokoll::default());
        let verteiler = AudioVerteiler::neu(
            sitzungen.clone(),
            protokoll.clone(),
            protokoll.clone(),
            RelayMetriken::neu().unwrap(),
            queue_groesse,
            16_000,
        );
        (verteiler, sitzungen, protokoll)
    }

    fn aufbau() -> (AudioVerteiler, SitzungsTabelle, Arc<Protokoll>) {
        aufbau_mit_queue(64)
    }

    fn mit_aufnahme(sitzungen: &SitzungsTabelle) -> CallId {
        let x = CallId::from("x");
        sitzungen
            .erstellen(x.clone(), UserId::from("a"), UserId::from("b"))
            .unwrap();
        sitzungen.aufnahme_setzen(&x, true).unwrap();
        x
    }

    async fn warten_bis(protokoll: &Protokoll, eintrag: &str) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !protokoll.alle().iter().any(|e| e == eintrag) {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn ohne_aufnahme_wird_verworfen() {
        let (verteiler, sitzungen, protokoll) = aufbau();
        sitzungen
            .erstellen(CallId::from("x"), UserId::from("a"), UserId::from("b"))
            .unwrap();

        verteiler.einreichen(&UserId::from("a"), Bytes::from_static(b"f1"));
        assert_eq!(verteiler.ketten_anzahl(), 0);
        assert!(protokoll.alle().is_empty());
    }

    #[tokio::test]
    async fn frames_in_reihenfolge_an_gegenueber() {
        let (verteiler, sitzungen, protokoll) = aufbau();
        let x = mit_aufnahme(&sitzungen);

        verteiler.starten(&x, UserId::from("b"), 8_000);
        for i in 0..20 {
            verteiler.einreichen(&UserId::from("a"), Bytes::from(format!("f{i}")));
        }
        let arbeiter = verteiler.beenden(&x).unwrap();
        arbeiter.await.unwrap();

        let alle = protokoll.alle();
        assert_eq!(alle[0], "rec-start x b 8000");
        assert_eq!(alle[1], "det-start x b");

        let rec: Vec<_> = alle.iter().filter(|e| e.starts_with("rec-chunk")).collect();
        let det: Vec<_> = alle.iter().filter(|e| e.starts_with("det-chunk")).collect();
        assert_eq!(rec.len(), 20);
        for (i, (r, d)) in rec.iter().zip(&det).enumerate() {
            assert!(r.ends_with(&format!(" f{i}")), "Aufnahme-Reihenfolge: {r}");
            assert_eq!(**d, format!("det-chunk x b f{i}"));
        }
        assert_eq!(alle[alle.len() - 2], "rec-stop 0");
        assert_eq!(alle[alle.len() - 1], "det-stop x");
        assert_eq!(verteiler.ketten_anzahl(), 0);
    }

    #[tokio::test]
    async fn ohne_kette_erzeugt_frame_keine() {
        let (verteiler, sitzungen, protokoll) = aufbau();
        mit_aufnahme(&sitzungen);

        verteiler.einreichen(&UserId::from("a"), Bytes::from_static(b"f1"));
        tokio::task::yield_now().await;

        assert_eq!(verteiler.ketten_anzahl(), 0);
        assert!(protokoll.alle().is_empty());
    }

    #[tokio::test]
    async fn gegenrichtung_startet_lazy_nach_start() {
        let (verteiler, sitzungen, protokoll) = aufbau();
        let x = mit_aufnahme(&sitzungen);

        verteiler.starten(&x, UserId::from("b"), 16_000);
        verteiler.einreichen(&UserId::from("b"), Bytes::from_static(b"hallo"));
        verteiler.beenden(&x).unwrap().await.unwrap();

        let alle = protokoll.alle();
        assert!(alle.contains(&"rec-start x a 16000".to_string()));
        assert!(alle.contains(&"det-chunk x a hallo".to_string()));
    }

    #[tokio::test]
    async fn nach_stop_keine_neue_aufnahme() {
        let (verteiler, sitzungen, protokoll) = aufbau();
        let x = mit_aufnahme(&sitzungen);

        verteiler.starten(&x, UserId::from("b"), 16_000);
        verteiler.stoppen(&x);
        // Frame zwischen Stop und Ruecksetzen des Sitzungs-Flags
        verteiler.einreichen(&UserId::from("a"), Bytes::from_static(b"spaet"));
        verteiler.beenden(&x).unwrap().await.unwrap();

        let alle = protokoll.alle();
        assert_eq!(alle.iter().filter(|e| e.starts_with("rec-start")).count(), 1);
        assert!(!alle.iter().any(|e| e.contains("spaet")));
    }

    #[tokio::test]
    async fn fehler_blockiert_folgende_frames_nicht() {
        let (verteiler, sitzungen, protokoll) = aufbau();
        let x = mit_aufnahme(&sitzungen);
        protokoll.chunk_fehler.store(true, Ordering::Relaxed);

        verteiler.starten(&x, UserId::from("b"), 16_000);
        verteiler.einreichen(&UserId::from("a"), Bytes::from_static(b"f1"));
        verteiler.einreichen(&UserId::from("a"), Bytes::from_static(b"f2"));
        verteiler.beenden(&x).unwrap().await.unwrap();

        let det: Vec<_> = protokoll
            .alle()
            .into_iter()
            .filter(|e| e.starts_with("det-chunk"))
            .collect();
        assert_eq!(det, vec!["det-chunk x b f1", "det-chunk x b f2"]);
    }

    #[tokio::test]
    async fn detektor_laeuft_ohne_aufnahme() {
        let (verteiler, sitzungen, protokoll) = aufbau();
        let x = mit_aufnahme(&sitzungen);
        protokoll.start_fehler.store(true, Ordering::Relaxed);

        verteiler.starten(&x, UserId::from("b"), 16_000);
        verteiler.einreichen(&UserId::from("a"), Bytes::from_static(b"f1"));
        verteiler.beenden(&x).unwrap().await.unwrap();

        assert_eq!(
            protokoll.alle(),
            vec![
                "rec-start-fehler x b",
                "det-start x b",
                "det-chunk x b f1",
                "det-stop x",
            ]
        );
    }

    #[tokio::test]
    async fn steuerung_wartet_nicht_auf_haengende_aufnahme() {
        let (verteiler, sitzungen, protokoll) = aufbau_mit_queue(1);
        let x = mit_aufnahme(&sitzungen);
        protokoll.chunk_haengt.store(true, Ordering::Relaxed);

        verteiler.starten(&x, UserId::from("b"), 16_000);
        verteiler.einreichen(&UserId::from("a"), Bytes::from_static(b"f0"));
        warten_bis(&protokoll, "rec-chunk 0 f0").await;
        for i in 1..5 {
            verteiler.einreichen(&UserId::from("a"), Bytes::from(format!("f{i}")));
        }

        // Kehrt sofort zurueck, obwohl die Kette blockiert
        verteiler.stoppen(&x);
        verteiler.starten(&x, UserId::from("b"), 16_000);
        let arbeiter = verteiler.beenden(&x).unwrap();
        assert_eq!(verteiler.ketten_anzahl(), 0);
        assert!(!arbeiter.is_finished());
        arbeiter.abort();
    }

    #[tokio::test]
    async fn frame_limit_verwirft_ueberschuss() {
        let (verteiler, sitzungen, protokoll) = aufbau_mit_queue(2);
        let x = mit_aufnahme(&sitzungen);
        protokoll.chunk_haengt.store(true, Ordering::Relaxed);

        verteiler.starten(&x, UserId::from("b"), 16_000);
        verteiler.einreichen(&UserId::from("a"), Bytes::from_static(b"f0"));
        warten_bis(&protokoll, "rec-chunk 0 f0").await;
        for i in 1..6 {
            verteiler.einreichen(&UserId::from("a"), Bytes::from(format!("f{i}")));
        }

        assert_eq!(verteiler.inner.metriken.audio_frames_total.get(), 3);
        assert_eq!(verteiler.inner.metriken.audio_frames_dropped_total.get(), 3);
        verteiler.beenden(&x).unwrap().abort();
    }

    #[tokio::test]
    async fn stoppen_und_erneut_starten() {
        let (verteiler, sitzungen, protokoll) = aufbau();
        let x = mit_aufnahme(&sitzungen);

        verteiler.starten(&x, UserId::from("b"), 16_000);
        verteiler.stoppen(&x);
        verteiler.starten(&x, UserId::from("b"), 16_000);
        verteiler.beenden(&x).unwrap().await.unwrap();

        let starts = protokoll
            .alle()
            .iter()
            .filter(|e| e.starts_with("rec-start"))
            .count();
        assert_eq!(starts, 2);
        assert!(verteiler.beenden(&x).is_none(), "Beenden ist idempotent");
    }

    #[tokio::test]
    async fn alle_beenden_schliesst_aufnahmen() {
        let (verteiler, sitzungen, protokoll) = aufbau();
        let x = mit_aufnahme(&sitzungen);
        verteiler.starten(&x, UserId::from("b"), 16_000);

        verteiler.alle_beenden().await;
        assert_eq!(verteiler.ketten_anzahl(), 0);
        assert!(protokoll.alle().contains(&"rec-stop 0".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn alle_beenden_bricht_haengende_kette_ab() {
        let (verteiler, sitzungen, protokoll) = aufbau();
        let x = mit_aufnahme(&sitzungen);
        protokoll.chunk_haengt.store(true, Ordering::Relaxed);

        verteiler.starten(&x, UserId::from("b"), 16_000);
        verteiler.einreichen(&UserId::from("a"), Bytes::from_static(b"f0"));

        verteiler.alle_beenden().await;
        assert_eq!(verteiler.ketten_anzahl(), 0);
        assert!(!protokoll.alle().contains(&"rec-stop 0".to_string()));
    }
}
