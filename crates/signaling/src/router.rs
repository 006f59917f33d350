//! Signal-Router – Validiert und leitet strukturierte Umschlaege weiter
//!
//! Der Router treibt die Sitzungs-Zustandsmaschine:
//!
//! ```text
//! call-request --> Angefragt --call-accept--> Angenommen --call-end--> (entfernt)
//!                      \
//!                       +------call-reject-----> (entfernt)
//! ```
//!
//! Die Aufnahme ist ein orthogonales Flag, geschaltet ueber
//! `recording-start`/`recording-stop` und an beide Teilnehmer gemeldet.
//!
//! ## Fehler
//! Kein Fehler schliesst die Verbindung. Ungueltige Umschlaege werden
//! geloggt und verworfen. Ein nicht erreichbares Ziel fuehrt nur bei
//! `call-request` zu einer Antwort (`call-reject` mit Begruendung), alle
//! anderen Typen werden still verworfen. Nachrichten fuer getrennte Peers
//! werden nicht gepuffert.

use echtruf_core::{CallId, Identitaet, UserId};
use echtruf_observability::metrics::grund;
use echtruf_protocol::{SignalTyp, Umschlag, GRUND_OFFLINE};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::{SignalingError, SignalingResult};
use crate::server_state::RelayZustand;

/// Routet Umschlaege eines authentifizierten Absenders
#[derive(Clone)]
pub struct SignalRouter {
    zustand: Arc<RelayZustand>,
}

impl SignalRouter {
    pub fn neu(zustand: Arc<RelayZustand>) -> Self {
        Self { zustand }
    }

    /// Verarbeitet einen Textframe; Fehler werden geloggt und gezaehlt
    pub async fn verarbeiten(&self, absender: &Identitaet, text: &str) {
        let umschlag = match Umschlag::parsen(text) {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!(user_id = %absender.id, fehler = %e, "Ungueltiger Umschlag verworfen");
                self.zustand.metriken.signal_verworfen(grund::UNGUELTIG);
                return;
            }
        };

        let typ = umschlag.typ;
        tracing::trace!(user_id = %absender.id, typ = typ.als_str(), "Umschlag empfangen");
        if let Err(e) = self.routen(absender, umschlag).await {
            self.verwerfen(absender, typ, e);
        }
    }

    /// Routet einen bereits geparsten Umschlag
    pub async fn routen(&self, absender: &Identitaet, umschlag: Umschlag) -> SignalingResult<()> {
        match umschlag.typ {
            SignalTyp::CallRequest => self.anruf_anfragen(absender, umschlag),
            SignalTyp::CallAccept => self.anruf_annehmen(absender, umschlag),
            SignalTyp::CallReject | SignalTyp::CallEnd => {
                self.anruf_beenden(absender, umschlag).await
            }
            SignalTyp::Offer | SignalTyp::Answer | SignalTyp::IceCandidate => {
                self.aushandlung_weiterleiten(absender, umschlag)
            }
            SignalTyp::RecordingStart => self.aufnahme_umschalten(absender, umschlag, true).await,
            SignalTyp::RecordingStop => self.aufnahme_umschalten(absender, umschlag, false).await,
            SignalTyp::OnlineUsers | SignalTyp::CallInitiated | SignalTyp::DetectionResult => Err(
                SignalingError::ungueltig(format!("{} ist nur ausgehend", umschlag.typ.als_str())),
            ),
        }
    }

    fn verwerfen(&self, absender: &Identitaet, typ: SignalTyp, fehler: SignalingError) {
        let grund = match &fehler {
            SignalingError::UnerreichbarerPeer(_) => grund::UNERREICHBAR,
            SignalingError::DoppelteSitzung(_) => grund::DOPPELT,
            SignalingError::SelbstAnruf(_) => grund::SELBSTANRUF,
            SignalingError::UnbekannteSitzung(_) => grund::KEINE_SITZUNG,
            SignalingError::UngueltigeNachricht(_) => grund::UNGUELTIG,
            SignalingError::Authentifizierung(_)
            | SignalingError::Downstream(_)
            | SignalingError::Io(_) => grund::INTERN,
        };
        self.zustand.metriken.signal_verworfen(grund);

        match fehler {
            SignalingError::UnerreichbarerPeer(_) | SignalingError::UnbekannteSitzung(_) => {
                tracing::debug!(user_id = %absender.id, typ = typ.als_str(), fehler = %fehler, "Umschlag verworfen");
            }
            _ => {
                tracing::warn!(user_id = %absender.id, typ = typ.als_str(), fehler = %fehler, "Umschlag verworfen");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Anrufsteuerung
    // -----------------------------------------------------------------------

    fn anruf_anfragen(&self, absender: &Identitaet, umschlag: Umschlag) -> SignalingResult<()> {
        let ziel = umschlag
            .to
            .clone()
            .ok_or_else(|| SignalingError::ungueltig("call-request ohne Ziel"))?;
        if ziel == absender.id {
            return Err(SignalingError::SelbstAnruf(ziel));
        }

        let (call_id, vergeben) = match umschlag.call_id_aufloesen() {
            Some(id) => (id, false),
            None => (CallId::erzeugen(), true),
        };

        let register = &self.zustand.register;
        if !register.ist_offen(&ziel) {
            register.veraltete_entfernen(&ziel);
            self.offline_ablehnen(absender, ziel.clone(), call_id);
            return Err(SignalingError::UnerreichbarerPeer(ziel));
        }

        self.zustand
            .sitzungen
            .erstellen(call_id.clone(), absender.id.clone(), ziel.clone())?;
        self.zustand.anrufe_zaehlen();

        if vergeben {
            register.senden(
                &absender.id,
                Umschlag::anruf_initiiert(call_id.clone(), absender.id.clone()),
            );
        }

        let weiter = Umschlag {
            typ: SignalTyp::CallRequest,
            payload: anrufer_ergaenzen(umschlag.payload, absender, &call_id),
            from: Some(absender.id.clone()),
            to: Some(ziel.clone()),
            call_id: Some(call_id.clone()),
        };

        if let Err(e) = self.zustellen(&ziel, weiter) {
            // Kanal zwischen Pruefung und Senden geschlossen
            self.zustand.sitzungen.entfernen(&call_id);
            self.zustand.anrufe_zaehlen();
            register.veraltete_entfernen(&ziel);
            self.offline_ablehnen(absender, ziel, call_id);
            return Err(e);
        }

        tracing::info!(call_id = %call_id, anrufer = %absender.id, ziel = %ziel, "Anruf angefragt");
        Ok(())
    }

    fn offline_ablehnen(&self, absender: &Identitaet, ziel: UserId, call_id: CallId) {
        tracing::debug!(user_id = %absender.id, ziel = %ziel, "Ziel offline – Anruf abgelehnt");
        let ablehnung =
            Umschlag::anruf_abgelehnt(ziel, Some(call_id), GRUND_OFFLINE).an(absender.id.clone());
        self.zustand.register.senden(&absender.id, ablehnung);
    }

    fn anruf_annehmen(&self, absender: &Identitaet, umschlag: Umschlag) -> SignalingResult<()> {
        let call_id = umschlag
            .call_id_aufloesen()
            .ok_or_else(|| SignalingError::ungueltig("call-accept ohne callId"))?;
        let sitzung = self
            .zustand
            .sitzungen
            .holen(&call_id)
            .ok_or_else(|| SignalingError::UnbekannteSitzung(call_id.clone()))?;
        if sitzung.angerufener != absender.id {
            return Err(SignalingError::ungueltig(
                "call-accept nur durch den Angerufenen",
            ));
        }

        self.zustand.sitzungen.annehmen(&call_id);
        tracing::info!(call_id = %call_id, "Anruf angenommen");

        let ziel = sitzung.anrufer;
        let weiter = umadressieren(umschlag, &absender.id, ziel.clone(), Some(call_id));
        self.zustellen(&ziel, weiter)
    }

    /// `call-reject` und `call-end`: Sitzung entfernen, Aufnahme stoppen, weiterleiten
    async fn anruf_beenden(&self, absender: &Identitaet, umschlag: Umschlag) -> SignalingResult<()> {
        let call_id = umschlag.call_id_aufloesen();
        let sitzung = match call_id.as_ref().and_then(|id| self.zustand.sitzungen.holen(id)) {
            Some(s) if !s.ist_teilnehmer(&absender.id) => {
                return Err(SignalingError::ungueltig(format!(
                    "{} von Nicht-Teilnehmer",
                    umschlag.typ.als_str()
                )));
            }
            andere => andere,
        };

        let ziel = umschlag
            .to
            .clone()
            .or_else(|| {
                sitzung
                    .as_ref()
                    .and_then(|s| s.gegenueber(&absender.id).cloned())
            })
            .ok_or_else(|| {
                SignalingError::ungueltig(format!("{} ohne Ziel", umschlag.typ.als_str()))
            })?;

        if let Some(sitzung) = &sitzung {
            if self.zustand.sitzungen.entfernen(&sitzung.call_id).is_some() {
                self.zustand.anrufe_zaehlen();
                tracing::info!(
                    call_id = %sitzung.call_id,
                    typ = umschlag.typ.als_str(),
                    durch = %absender.id,
                    "Anruf beendet"
                );
            }
            self.zustand.audio.beenden(&sitzung.call_id);
        }

        let weiter = umadressieren(umschlag, &absender.id, ziel.clone(), call_id);
        self.zustellen(&ziel, weiter)
    }

    // -----------------------------------------------------------------------
    // Medien-Aushandlung
    // -----------------------------------------------------------------------

    /// `offer`, `answer`, `ice-candidate`: opak weiterleiten
    fn aushandlung_weiterleiten(
        &self,
        absender: &Identitaet,
        umschlag: Umschlag,
    ) -> SignalingResult<()> {
        let ziel = umschlag.to.clone().ok_or_else(|| {
            SignalingError::ungueltig(format!("{} ohne Ziel", umschlag.typ.als_str()))
        })?;
        let call_id = umschlag.call_id.clone();
        let weiter = umadressieren(umschlag, &absender.id, ziel.clone(), call_id);
        self.zustellen(&ziel, weiter)
    }

    // -----------------------------------------------------------------------
    // Aufnahme
    // -----------------------------------------------------------------------

    async fn aufnahme_umschalten(
        &self,
        absender: &Identitaet,
        umschlag: Umschlag,
        aktiv: bool,
    ) -> SignalingResult<()> {
        let call_id = umschlag.call_id_aufloesen().ok_or_else(|| {
            SignalingError::ungueltig(format!("{} ohne callId", umschlag.typ.als_str()))
        })?;
        let sitzung = self
            .zustand
            .sitzungen
            .holen(&call_id)
            .ok_or_else(|| SignalingError::UnbekannteSitzung(call_id.clone()))?;
        let sprecher = sitzung.gegenueber(&absender.id).cloned().ok_or_else(|| {
            SignalingError::ungueltig(format!(
                "{} von Nicht-Teilnehmer",
                umschlag.typ.als_str()
            ))
        })?;

        self.zustand
            .sitzungen
            .aufnahme_setzen(&call_id, aktiv)
            .ok_or_else(|| SignalingError::UnbekannteSitzung(call_id.clone()))?;

        if aktiv {
            let abtastrate = abtastrate_lesen(&umschlag.payload)
                .unwrap_or(self.zustand.config.standard_abtastrate);
            tracing::info!(call_id = %call_id, sprecher = %sprecher, abtastrate, "Aufnahme gestartet");
            self.zustand.audio.starten(&call_id, sprecher, abtastrate);

            // Sitzung kann zwischenzeitlich beendet worden sein
            if self.zustand.sitzungen.holen(&call_id).is_none() {
                self.zustand.audio.beenden(&call_id);
            }
        } else {
            tracing::info!(call_id = %call_id, "Aufnahme gestoppt");
            self.zustand.audio.stoppen(&call_id);
        }

        for teilnehmer in sitzung.teilnehmer() {
            let meldung = umadressieren(
                umschlag.clone(),
                &absender.id,
                teilnehmer.clone(),
                Some(call_id.clone()),
            );
            if let Err(e) = self.zustellen(teilnehmer, meldung) {
                tracing::debug!(call_id = %call_id, fehler = %e, "Aufnahme-Meldung nicht zustellbar");
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Hilfsfunktionen
    // -----------------------------------------------------------------------

    fn zustellen(&self, ziel: &UserId, umschlag: Umschlag) -> SignalingResult<()> {
        let typ = umschlag.typ;
        if self.zustand.register.senden(ziel, umschlag) {
            self.zustand.metriken.signal_weitergeleitet(typ.als_str());
            Ok(())
        } else {
            Err(SignalingError::UnerreichbarerPeer(ziel.clone()))
        }
    }
}

/// Setzt Absender, Ziel und Anruf-ID; der Payload bleibt unangetastet
fn umadressieren(
    mut umschlag: Umschlag,
    absender: &UserId,
    ziel: UserId,
    call_id: Option<CallId>,
) -> Umschlag {
    umschlag.from = Some(absender.clone());
    umschlag.to = Some(ziel);
    if call_id.is_some() {
        umschlag.call_id = call_id;
    }
    umschlag
}

/// Ergaenzt den Payload eines `call-request` um Anzeigename und Anruf-ID
///
/// Ein Payload der kein Objekt ist landet unter `data`.
fn anrufer_ergaenzen(payload: Value, anrufer: &Identitaet, call_id: &CallId) -> Value {
    let mut felder = match payload {
        Value::Object(felder) => felder,
        Value::Null => Map::new(),
        anderes => {
            let mut felder = Map::new();
            felder.insert("data".to_string(), anderes);
            felder
        }
    };
    felder.insert(
        "callerName".to_string(),
        Value::String(anrufer.anzeigename.clone()),
    );
    felder.insert(
        "callId".to_string(),
        Value::String(call_id.als_str().to_string()),
    );
    Value::Object(felder)
}

/// `payload.sampleRate` als positive Ganzzahl
fn abtastrate_lesen(payload: &Value) -> Option<u32> {
    payload
        .get("sampleRate")
        .and_then(Value::as_u64)
        .filter(|r| *r > 0)
        .and_then(|r| u32::try_from(r).ok())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
