//! Control-Protokoll (WebSocket-Textframes)
//!
//! Definiert den Umschlag aller strukturierten Signaling-Nachrichten die
//! ueber die Duplex-Verbindung zwischen Client und Relay fliessen.
//!
//! ## Format
//! ```text
//! { "type": "call-request", "payload": {...}, "from": "...", "to": "...", "callId": "..." }
//! ```
//! - `payload` ist fuer das Relay opak (Ausnahme: `call-request` bekommt den
//!   Anzeigenamen des Anrufers eingefuegt)
//! - JSON-Serialisierung via serde, Nachrichtentypen in kebab-case

use echtruf_core::{CallId, ErkennungsErgebnis, Identitaet, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ProtokollFehler, ProtokollResult};

/// Begruendung der Ablehnung wenn das Ziel nicht erreichbar ist
pub const GRUND_OFFLINE: &str = "User is offline";

// ---------------------------------------------------------------------------
// Nachrichtentypen
// ---------------------------------------------------------------------------

/// Alle Nachrichtentypen des Signaling-Protokolls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalTyp {
    // Anrufsteuerung
    CallRequest,
    CallAccept,
    CallReject,
    CallEnd,
    // Medien-Aushandlung (opak weitergeleitet)
    Offer,
    Answer,
    IceCandidate,
    // Aufnahme
    RecordingStart,
    RecordingStop,
    // Nur Server -> Client
    OnlineUsers,
    CallInitiated,
    DetectionResult,
}

impl SignalTyp {
    /// Name auf dem Draht (auch als Metrik-Label verwendet)
    pub fn als_str(&self) -> &'static str {
        match self {
            Self::CallRequest => "call-request",
            Self::CallAccept => "call-accept",
            Self::CallReject => "call-reject",
            Self::CallEnd => "call-end",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
            Self::RecordingStart => "recording-start",
            Self::RecordingStop => "recording-stop",
            Self::OnlineUsers => "online-users",
            Self::CallInitiated => "call-initiated",
            Self::DetectionResult => "detection-result",
        }
    }

    /// Darf ein Client diesen Typ senden?
    pub fn ist_eingehend(&self) -> bool {
        !matches!(
            self,
            Self::OnlineUsers | Self::CallInitiated | Self::DetectionResult
        )
    }

    /// Typen ohne Sitzungs-Fallback fuer das Ziel
    pub fn braucht_ziel(&self) -> bool {
        matches!(
            self,
            Self::CallRequest | Self::Offer | Self::Answer | Self::IceCandidate
        )
    }
}

// ---------------------------------------------------------------------------
// Umschlag
// ---------------------------------------------------------------------------

/// Ein strukturierter Signaling-Umschlag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Umschlag {
    #[serde(rename = "type")]
    pub typ: SignalTyp,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<UserId>,
    #[serde(rename = "callId", default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<CallId>,
}

impl Umschlag {
    /// Erstellt einen Umschlag ohne Absender, Ziel und Anruf-ID
    pub fn neu(typ: SignalTyp, payload: Value) -> Self {
        Self {
            typ,
            payload,
            from: None,
            to: None,
            call_id: None,
        }
    }

    /// Setzt den Absender
    pub fn von(mut self, absender: UserId) -> Self {
        self.from = Some(absender);
        self
    }

    /// Setzt das Ziel
    pub fn an(mut self, ziel: UserId) -> Self {
        self.to = Some(ziel);
        self
    }

    /// Setzt die Anruf-ID
    pub fn mit_call_id(mut self, call_id: CallId) -> Self {
        self.call_id = Some(call_id);
        self
    }

    /// Parst und validiert einen eingehenden Textframe
    ///
    /// Unbekannte Typen, nur-ausgehende Typen und fehlende Pflichtziele
    /// ergeben einen `ProtokollFehler`. Ein leeres `to` zaehlt als fehlend.
    pub fn parsen(text: &str) -> ProtokollResult<Self> {
        let mut umschlag: Self = serde_json::from_str(text)?;

        if !umschlag.typ.ist_eingehend() {
            return Err(ProtokollFehler::NurAusgehend(umschlag.typ));
        }

        if umschlag.to.as_ref().is_some_and(|z| z.als_str().is_empty()) {
            umschlag.to = None;
        }
        if umschlag.typ.braucht_ziel() && umschlag.to.is_none() {
            return Err(ProtokollFehler::ZielFehlt(umschlag.typ));
        }

        Ok(umschlag)
    }

    /// Anruf-ID aus dem Umschlag oder, falls dort nicht gesetzt, aus `payload.callId`
    pub fn call_id_aufloesen(&self) -> Option<CallId> {
        self.call_id.clone().or_else(|| {
            self.payload
                .get("callId")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(CallId::from)
        })
    }

    /// Serialisiert den Umschlag als JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    // -----------------------------------------------------------------------
    // Vom Server erzeugte Nachrichten
    // -----------------------------------------------------------------------

    /// Personalisierte Online-Liste fuer einen Empfaenger
    pub fn online_liste(online: &[Identitaet]) -> Self {
        Self::neu(SignalTyp::OnlineUsers, json!(online))
    }

    /// Ablehnung eines Anrufs im Namen des Relays
    pub fn anruf_abgelehnt(ziel: UserId, call_id: Option<CallId>, grund: &str) -> Self {
        let mut umschlag =
            Self::neu(SignalTyp::CallReject, json!({ "reason": grund })).von(ziel);
        umschlag.call_id = call_id;
        umschlag
    }

    /// Bestaetigung einer vom Relay vergebenen Anruf-ID an den Anrufer
    pub fn anruf_initiiert(call_id: CallId, ziel: UserId) -> Self {
        Self::neu(SignalTyp::CallInitiated, json!({ "callId": call_id.als_str() }))
            .an(ziel)
            .mit_call_id(call_id)
    }

    /// Zustellung eines Erkennungsergebnisses
    pub fn erkennung(ergebnis: &ErkennungsErgebnis) -> Self {
        Self::neu(SignalTyp::DetectionResult, json!(ergebnis))
            .mit_call_id(ergebnis.call_id.clone())
    }
}

// ---------------------------------------------------------------------------
// Close-Codes
// ---------------------------------------------------------------------------

/// Gruende fuer ein vom Relay ausgeloestes Schliessen der Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchliessGrund {
    /// Neuere Verbindung derselben Identitaet
    Verdraengt,
    /// Kein Bearer-Nachweis uebergeben
    KeinNachweis,
    /// Nachweis ungueltig oder abgelaufen
    UngueltigerNachweis,
    /// Keine Nachricht innerhalb des Timeouts
    Zeitueberschreitung,
}

impl SchliessGrund {
    /// WebSocket-Close-Code (Bereich 4000–4999 ist anwendungsdefiniert)
    pub fn code(&self) -> u16 {
        match self {
            Self::Verdraengt => 4000,
            Self::KeinNachweis => 4001,
            Self::UngueltigerNachweis => 4002,
            Self::Zeitueberschreitung => 4003,
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            Self::Verdraengt => "superseded by newer connection",
            Self::KeinNachweis => "missing credential",
            Self::UngueltigerNachweis => "invalid credential",
            Self::Zeitueberschreitung => "idle timeout",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_request_parsen() {
        let text = r#"{"type":"call-request","payload":{"sdp":"x"},"from":"a","to":"b"}"#;
        let u = Umschlag::parsen(text).unwrap();
        assert_eq!(u.typ, SignalTyp::CallRequest);
        assert_eq!(u.to, Some(UserId::from("b")));
        assert_eq!(u.payload["sdp"], "x");
        assert!(u.call_id.is_none());
    }

    #[test]
    fn unbekannter_typ_ist_fehler() {
        let text = r#"{"type":"call-hold","to":"b"}"#;
        assert!(matches!(
            Umschlag::parsen(text),
            Err(ProtokollFehler::Json(_))
        ));
    }

    #[test]
    fn kein_json_ist_fehler() {
        assert!(matches!(
            Umschlag::parsen("hallo"),
            Err(ProtokollFehler::Json(_))
        ));
    }

    #[test]
    fn offer_ohne_ziel_ist_fehler() {
        let text = r#"{"type":"offer","payload":{}}"#;
        assert!(matches!(
            Umschlag::parsen(text),
            Err(ProtokollFehler::ZielFehlt(SignalTyp::Offer))
        ));
    }

    #[test]
    fn leeres_ziel_zaehlt_als_fehlend() {
        let text = r#"{"type":"ice-candidate","to":""}"#;
        assert!(matches!(
            Umschlag::parsen(text),
            Err(ProtokollFehler::ZielFehlt(SignalTyp::IceCandidate))
        ));
    }

    #[test]
    fn recording_start_ohne_ziel_erlaubt() {
        let text = r#"{"type":"recording-start","callId":"X"}"#;
        let u = Umschlag::parsen(text).unwrap();
        assert_eq!(u.call_id, Some(CallId::from("X")));
        assert!(u.payload.is_null());
    }

    #[test]
    fn nur_ausgehende_typen_werden_abgewiesen() {
        let text = r#"{"type":"detection-result","to":"b"}"#;
        assert!(matches!(
            Umschlag::parsen(text),
            Err(ProtokollFehler::NurAusgehend(SignalTyp::DetectionResult))
        ));
    }

    #[test]
    fn call_id_aus_payload_als_fallback() {
        let text = r#"{"type":"call-request","to":"b","payload":{"callId":"P"}}"#;
        let u = Umschlag::parsen(text).unwrap();
        assert_eq!(u.call_id_aufloesen(), Some(CallId::from("P")));

        let text = r#"{"type":"call-request","to":"b","callId":"E","payload":{"callId":"P"}}"#;
        let u = Umschlag::parsen(text).unwrap();
        assert_eq!(u.call_id_aufloesen(), Some(CallId::from("E")));
    }

    #[test]
    fn serialisierung_nutzt_drahtnamen() {
        let u = Umschlag::neu(SignalTyp::IceCandidate, json!({"candidate": "c"}))
            .von(UserId::from("a"))
            .an(UserId::from("b"))
            .mit_call_id(CallId::from("X"));
        let wert: Value = serde_json::from_str(&u.to_json().unwrap()).unwrap();
        assert_eq!(wert["type"], "ice-candidate");
        assert_eq!(wert["from"], "a");
        assert_eq!(wert["to"], "b");
        assert_eq!(wert["callId"], "X");
    }

    #[test]
    fn ablehnung_enthaelt_grund() {
        let u = Umschlag::anruf_abgelehnt(UserId::from("b"), None, GRUND_OFFLINE);
        assert_eq!(u.typ, SignalTyp::CallReject);
        assert_eq!(u.payload["reason"], "User is offline");
        assert_eq!(u.from, Some(UserId::from("b")));
    }

    #[test]
    fn online_liste_enthaelt_namen() {
        let u = Umschlag::online_liste(&[Identitaet::neu("a", "Alice")]);
        assert_eq!(u.typ, SignalTyp::OnlineUsers);
        assert_eq!(u.payload[0]["name"], "Alice");
    }

    #[test]
    fn close_codes_sind_unterscheidbar() {
        assert_eq!(SchliessGrund::KeinNachweis.code(), 4001);
        assert_eq!(SchliessGrund::UngueltigerNachweis.code(), 4002);
        assert_ne!(
            SchliessGrund::KeinNachweis.text(),
            SchliessGrund::UngueltigerNachweis.text()
        );
    }
}
