//! Durchstich: Registrieren, Anruf, Aufnahme, Audio, Erkennung
//!
//! Die Clients werden durch die Empfaenger des Registers ersetzt; Aufnahme
//! und Detektor durch einen Mitschnitt aller Aufrufe.

use async_trait::async_trait;
use bytes::Bytes;
use echtruf_auth::TokenVerzeichnis;
use echtruf_core::{CallId, ErkennungsErgebnis, Identitaet, UserId};
use echtruf_media::{Aufnahme, AufnahmeHandle, Detektor, MediaResult};
use echtruf_observability::RelayMetriken;
use echtruf_protocol::{SignalTyp, Umschlag};
use echtruf_signaling::{Ausgehend, RelayConfig, RelayZustand, SignalRouter};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct Mitschnitt {
    eintraege: Mutex<Vec<String>>,
}

impl Mitschnitt {
    fn notieren(&self, eintrag: String) {
        self.eintraege.lock().push(eintrag);
    }

    fn alle(&self) -> Vec<String> {
        self.eintraege.lock().clone()
    }
}

#[async_trait]
impl Aufnahme for Mitschnitt {
    async fn aufnahme_starten(
        &self,
        call_id: &CallId,
        sprecher: &UserId,
        abtastrate: u32,
    ) -> MediaResult<AufnahmeHandle> {
        self.notieren(format!("rec-start {call_id} {sprecher} {abtastrate}"));
        Ok(AufnahmeHandle(7))
    }

    async fn chunk_schreiben(&self, handle: AufnahmeHandle, daten: &[u8]) -> MediaResult<()> {
        self.notieren(format!("rec-chunk {} {}", handle.0, String::from_utf8_lossy(daten)));
        Ok(())
    }

    async fn aufnahme_stoppen(&self, handle: AufnahmeHandle) -> MediaResult<()> {
        self.notieren(format!("rec-stop {}", handle.0));
        Ok(())
    }
}

#[async_trait]
impl Detektor for Mitschnitt {
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

fn relay(mitschnitt: Arc<Mitschnitt>) -> Arc<RelayZustand> {
    RelayZustand::neu(
        RelayConfig::default(),
        TokenVerzeichnis::neu(),
        mitschnitt.clone(),
        mitschnitt,
        RelayMetriken::neu().unwrap(),
    )
}

/// Wartet auf den naechsten Umschlag des Typs, andere werden uebersprungen
async fn naechstes(rx: &mut mpsc::Receiver<Ausgehend>, typ: SignalTyp) -> Umschlag {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Some(Ausgehend::Signal(u)) if u.typ == typ => return u,
                Some(_) => continue,
                None => panic!("Empfaenger beendet bevor {} eintraf", typ.als_str()),
            }
        }
    })
    .await
    .unwrap()
}

/// Liefert alle bereits eingereihten Umschlaege des Typs
fn eingereiht(rx: &mut mpsc::Receiver<Ausgehend>, typ: SignalTyp) -> Vec<Umschlag> {
    let mut gefunden = Vec::new();
    while let Ok(eintrag) = rx.try_recv() {
        if let Ausgehend::Signal(u) = eintrag {
            if u.typ == typ {
                gefunden.push(u);
            }
        }
    }
    gefunden
}

#[tokio::test]
async fn anruf_mit_aufnahme_und_erkennung() {
    let mitschnitt = Arc::new(Mitschnitt::default());
    let zustand = relay(mitschnitt.clone());
    let router = SignalRouter::neu(Arc::clone(&zustand));

    let (ergebnis_tx, ergebnis_rx) = mpsc::channel(8);
    let _fanout = zustand.erkennung_anbinden(ergebnis_rx);

    let alice = Identitaet::neu("a", "Alice");
    let bob = Identitaet::neu("b", "Bob");
    let (_, mut rx_a) = zustand.register.registrieren(alice.clone());
    let (_, mut rx_b) = zustand.register.registrieren(bob.clone());

    // A ruft B an, das Relay vergibt die Anruf-ID
    router
        .verarbeiten(&alice, r#"{"type":"call-request","to":"b","payload":{"sdp":"v=0"}}"#)
        .await;
    let initiiert = naechstes(&mut rx_a, SignalTyp::CallInitiated).await;
    let call_id = initiiert.call_id_aufloesen().unwrap();

    let anfrage = naechstes(&mut rx_b, SignalTyp::CallRequest).await;
    assert_eq!(anfrage.from, Some(UserId::from("a")));
    assert_eq!(anfrage.call_id_aufloesen(), Some(call_id.clone()));
    assert_eq!(anfrage.payload["callerName"], "Alice");
    assert_eq!(anfrage.payload["sdp"], "v=0");

    // B nimmt an
    let annahme = format!(r#"{{"type":"call-accept","to":"a","callId":"{call_id}"}}"#);
    router.verarbeiten(&bob, &annahme).await;
    let angenommen = naechstes(&mut rx_a, SignalTyp::CallAccept).await;
    assert_eq!(angenommen.from, Some(UserId::from("b")));

    // A schaltet die Aufnahme ein, beide werden benachrichtigt
    let start = format!(r#"{{"type":"recording-start","callId":"{call_id}"}}"#);
    router.verarbeiten(&alice, &start).await;
    assert_eq!(
        naechstes(&mut rx_a, SignalTyp::RecordingStart).await.call_id,
        Some(call_id.clone())
    );
    assert_eq!(
        naechstes(&mut rx_b, SignalTyp::RecordingStart).await.call_id,
        Some(call_id.clone())
    );

    // Frame von A wird dem Gegenueber B zugeordnet
    zustand
        .audio
        .einreichen(&UserId::from("a"), Bytes::from_static(b"F"));

    // Ergebnis ueber B geht nur an A
    ergebnis_tx
        .send(ErkennungsErgebnis::aus_konfidenz(
            call_id.clone(),
            UserId::from("b"),
            0.93,
        ))
        .await
        .unwrap();
    let ergebnis = naechstes(&mut rx_a, SignalTyp::DetectionResult).await;
    assert_eq!(ergebnis.payload["speakerId"], "b");
    assert_eq!(ergebnis.payload["isAuthentic"], true);
    assert!(eingereiht(&mut rx_b, SignalTyp::DetectionResult).is_empty());

    // A beendet, die Audio-Kette wird abgebaut
    let ende = format!(r#"{{"type":"call-end","to":"b","callId":"{call_id}"}}"#);
    router.verarbeiten(&alice, &ende).await;
    naechstes(&mut rx_b, SignalTyp::CallEnd).await;
    assert!(zustand.sitzungen.holen(&call_id).is_none());
    assert_eq!(zustand.audio.ketten_anzahl(), 0);

    // Der Arbeiter laeuft noch bis sein Stop verarbeitet ist
    tokio::time::timeout(Duration::from_secs(2), async {
        while !mitschnitt.alle().iter().any(|e| e.starts_with("det-stop")) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(
        mitschnitt.alle(),
        vec![
            format!("rec-start {call_id} b 16000"),
            format!("det-start {call_id} b"),
            "rec-chunk 7 F".to_string(),
            format!("det-chunk {call_id} b F"),
            "rec-stop 7".to_string(),
            format!("det-stop {call_id}"),
        ]
    );
}

#[tokio::test]
async fn anruf_an_offline_ziel_wird_abgelehnt() {
    let zustand = relay(Arc::new(Mitschnitt::default()));
    let router = SignalRouter::neu(Arc::clone(&zustand));

    let alice = Identitaet::neu("a", "Alice");
    let (_, mut rx_a) = zustand.register.registrieren(alice.clone());

    router
        .verarbeiten(&alice, r#"{"type":"call-request","to":"b","callId":"x"}"#)
        .await;

    let abgelehnt = naechstes(&mut rx_a, SignalTyp::CallReject).await;
    assert_eq!(abgelehnt.payload["reason"], "User is offline");
    assert_eq!(abgelehnt.from, Some(UserId::from("b")));
    assert!(zustand.sitzungen.holen(&CallId::from("x")).is_none());
    assert_eq!(zustand.sitzungen.anzahl(), 0);
}

#[tokio::test]
async fn presence_schliesst_sich_selbst_aus() {
    let zustand = relay(Arc::new(Mitschnitt::default()));

    let (_, mut rx_a) = zustand.register.registrieren(Identitaet::neu("a", "Alice"));
    let (_, mut rx_b) = zustand.register.registrieren(Identitaet::neu("b", "Bob"));

    let bei_a = eingereiht(&mut rx_a, SignalTyp::OnlineUsers);
    let letzte = bei_a.last().unwrap();
    assert_eq!(letzte.payload, serde_json::json!([{ "id": "b", "name": "Bob" }]));

    let bei_b = eingereiht(&mut rx_b, SignalTyp::OnlineUsers);
    assert_eq!(
        bei_b.last().unwrap().payload,
        serde_json::json!([{ "id": "a", "name": "Alice" }])
    );

    zustand.register.entfernen(&UserId::from("b"));
    let nach_trennung = eingereiht(&mut rx_a, SignalTyp::OnlineUsers);
    assert_eq!(nach_trennung.last().unwrap().payload, serde_json::json!([]));
}
