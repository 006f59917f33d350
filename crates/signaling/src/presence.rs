//! Praesenz-Verteilung – Online-Listen fuer alle Verbindungen
//!
//! Nach jeder Mutation des Verbindungsregisters bekommt jede offene
//! Verbindung eine personalisierte `online-users`-Liste ohne sich selbst.
//! Das kostet O(n) Sendungen pro Mutation und ist fuer interaktive
//! Kleingruppen ausreichend; bei Massen-Praesenz ist hier die Grenze.

use echtruf_core::{Identitaet, UserId};
use echtruf_protocol::Umschlag;
use std::collections::HashMap;

use crate::registry::Verbindung;

/// Aktuelle Online-Menge, sortiert nach User-ID
pub(crate) fn online_menge(verbindungen: &HashMap<UserId, Verbindung>) -> Vec<Identitaet> {
    let mut online: Vec<Identitaet> = verbindungen
        .values()
        .filter(|v| v.ist_offen())
        .map(|v| v.identitaet.clone())
        .collect();
    online.sort_by(|a, b| a.id.cmp(&b.id));
    online
}

/// Ansicht eines Empfaengers: alle Online-Identitaeten ausser ihm selbst
pub fn personalisierte_ansicht(online: &[Identitaet], empfaenger: &UserId) -> Vec<Identitaet> {
    online
        .iter()
        .filter(|i| &i.id != empfaenger)
        .cloned()
        .collect()
}

/// Sendet jeder offenen Verbindung ihre Online-Liste
///
/// Wird vom Register unter der Schreibsperre aufgerufen.
pub(crate) fn verteilen(verbindungen: &HashMap<UserId, Verbindung>) {
    let online = online_menge(verbindungen);
    let mut gesendet = 0usize;

    for (user_id, verbindung) in verbindungen {
        if !verbindung.ist_offen() {
            continue;
        }
        let ansicht = personalisierte_ansicht(&online, user_id);
        if verbindung.senden(Umschlag::online_liste(&ansicht)) {
            gesendet += 1;
        }
    }

    tracing::trace!(online = online.len(), gesendet, "Online-Listen verteilt");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Ausgehend, VerbindungsRegister};
    use echtruf_observability::RelayMetriken;
    use echtruf_protocol::SignalTyp;
    use tokio::sync::mpsc;

    fn letzte_liste(rx: &mut mpsc::Receiver<Ausgehend>) -> Vec<String> {
        let mut letzte = None;
        while let Ok(Ausgehend::Signal(u)) = rx.try_recv() {
            assert_eq!(u.typ, SignalTyp::OnlineUsers);
            letzte = Some(u);
        }
        let umschlag = letzte.expect("Online-Liste erwartet");
        umschlag
            .payload
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["id"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn ansicht_schliesst_empfaenger_aus() {
        let online = vec![Identitaet::neu("a", "Alice"), Identitaet::neu("b", "Bob")];
        let ansicht = personalisierte_ansicht(&online, &UserId::from("a"));
        assert_eq!(ansicht, vec![Identitaet::neu("b", "Bob")]);
    }

    #[tokio::test]
    async fn jede_mutation_verteilt_personalisierte_listen() {
        let register = VerbindungsRegister::neu(16, RelayMetriken::neu().unwrap());
        let (_a, mut rx_a) = register.registrieren(Identitaet::neu("a", "Alice"));
        assert!(letzte_liste(&mut rx_a).is_empty());

        let (_b, mut rx_b) = register.registrieren(Identitaet::neu("b", "Bob"));
        assert_eq!(letzte_liste(&mut rx_a), vec!["b"]);
        assert_eq!(letzte_liste(&mut rx_b), vec!["a"]);

        let (_c, mut rx_c) = register.registrieren(Identitaet::neu("c", "Carol"));
        assert_eq!(letzte_liste(&mut rx_c), vec!["a", "b"]);

        register.entfernen(&UserId::from("b"));
        assert_eq!(letzte_liste(&mut rx_a), vec!["c"]);
        assert_eq!(letzte_liste(&mut rx_c), vec!["a"]);
    }

    #[tokio::test]
    async fn liste_enthaelt_anzeigenamen() {
        let register = VerbindungsRegister::neu(16, RelayMetriken::neu().unwrap());
        let (_a, mut rx_a) = register.registrieren(Identitaet::neu("a", "Alice"));
        let (_b, _rx_b) = register.registrieren(Identitaet::neu("b", "Bob"));

        let mut letzte = None;
        while let Ok(Ausgehend::Signal(u)) = rx_a.try_recv() {
            letzte = Some(u);
        }
        let payload = letzte.unwrap().payload;
        assert_eq!(payload[0]["name"], "Bob");
    }
}
