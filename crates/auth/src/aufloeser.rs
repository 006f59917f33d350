//! Aufloesung eines Bearer-Tokens zur Identitaet
//!
//! Das `IdentitaetsAufloeser`-Trait abstrahiert den externen
//! Identitaetsspeicher. `TokenVerzeichnis` ist eine In-Memory-Variante
//! mit optionaler Ablaufzeit pro Token.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use echtruf_core::Identitaet;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};

/// Grenze zum externen Identitaetsspeicher
#[async_trait]
pub trait IdentitaetsAufloeser: Send + Sync {
    /// Loest einen Bearer-Token zur Identitaet auf
    ///
    /// Schlaegt mit `AuthError::UngueltigerNachweis` fehl wenn der Token
    /// unbekannt oder ungueltig ist.
    async fn identitaet_aufloesen(&self, token: &str) -> AuthResult<Identitaet>;
}

/// Ein registrierter Token
#[derive(Debug, Clone)]
struct TokenEintrag {
    identitaet: Identitaet,
    laeuft_ab_am: Option<DateTime<Utc>>,
}

impl TokenEintrag {
    fn ist_gueltig(&self) -> bool {
        self.laeuft_ab_am.map_or(true, |ende| Utc::now() < ende)
    }
}

/// In-Memory Token-Verzeichnis
#[derive(Debug, Default)]
pub struct TokenVerzeichnis {
    /// token -> Eintrag
    tokens: RwLock<HashMap<String, TokenEintrag>>,
}

impl TokenVerzeichnis {
    /// Erstellt ein leeres Verzeichnis
    pub fn neu() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Erstellt ein Verzeichnis aus festen (token, Identitaet)-Paaren
    pub fn mit_tokens(eintraege: impl IntoIterator<Item = (String, Identitaet)>) -> Arc<Self> {
        let tokens = eintraege
            .into_iter()
            .map(|(token, identitaet)| {
                (
                    token,
                    TokenEintrag {
                        identitaet,
                        laeuft_ab_am: None,
                    },
                )
            })
            .collect();
        Arc::new(Self {
            tokens: RwLock::new(tokens),
        })
    }

    /// Registriert einen festen Token ohne Ablauf
    pub async fn eintragen(&self, token: impl Into<String>, identitaet: Identitaet) {
        self.tokens.write().await.insert(
            token.into(),
            TokenEintrag {
                identitaet,
                laeuft_ab_am: None,
            },
        );
    }

    /// Stellt einen neuen zufaelligen Token mit Lebensdauer aus
    pub async fn ausstellen(&self, identitaet: Identitaet, gueltig: chrono::Duration) -> String {
        let token = token_generieren();
        let user_id = identitaet.id.clone();
        self.tokens.write().await.insert(
            token.clone(),
            TokenEintrag {
                identitaet,
                laeuft_ab_am: Some(Utc::now() + gueltig),
            },
        );
        tracing::debug!(user_id = %user_id, "Token ausgestellt");
        token
    }

    /// Entfernt einen Token
    pub async fn entfernen(&self, token: &str) {
        self.tokens.write().await.remove(token);
    }
}

#[async_trait]
impl IdentitaetsAufloeser for TokenVerzeichnis {
    async fn identitaet_aufloesen(&self, token: &str) -> AuthResult<Identitaet> {
        if token.is_empty() {
            return Err(AuthError::KeinNachweis);
        }
        let tokens = self.tokens.read().await;
        match tokens.get(token) {
            None => Err(AuthError::UngueltigerNachweis),
            Some(eintrag) if !eintrag.ist_gueltig() => Err(AuthError::NachweisAbgelaufen),
            Some(eintrag) => Ok(eintrag.identitaet.clone()),
        }
    }
}

/// Generiert einen zufaelligen Token (URL-sicheres Base64 aus zwei UUIDs)
fn token_generieren() -> String {
    let mut bytes = [0u8; 32];
    bytes[..16].copy_from_slice(Uuid::new_v4().as_bytes());
    bytes[16..].copy_from_slice(Uuid::new_v4().as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fester_token_wird_aufgeloest() {
        let verzeichnis =
            TokenVerzeichnis::mit_tokens([("t-alice".to_string(), Identitaet::neu("a", "Alice"))]);

        let ident = verzeichnis.identitaet_aufloesen("t-alice").await.unwrap();
        assert_eq!(ident.anzeigename, "Alice");
    }

    #[tokio::test]
    async fn unbekannter_token_ist_ungueltig() {
        let verzeichnis = TokenVerzeichnis::neu();
        let ergebnis = verzeichnis.identitaet_aufloesen("gibt-es-nicht").await;
        assert!(matches!(ergebnis, Err(AuthError::UngueltigerNachweis)));
    }

    #[tokio::test]
    async fn leerer_token_fehlt() {
        let verzeichnis = TokenVerzeichnis::neu();
        let ergebnis = verzeichnis.identitaet_aufloesen("").await;
        assert!(ergebnis.unwrap_err().ist_fehlend());
    }

    #[tokio::test]
    async fn abgelaufener_token_wird_abgewiesen() {
        let verzeichnis = TokenVerzeichnis::neu();
        let token = verzeichnis
            .ausstellen(Identitaet::neu("b", "Bob"), chrono::Duration::seconds(-1))
            .await;

        let ergebnis = verzeichnis.identitaet_aufloesen(&token).await;
        assert!(matches!(ergebnis, Err(AuthError::NachweisAbgelaufen)));
    }

    #[tokio::test]
    async fn ausgestellte_tokens_sind_eindeutig() {
        let verzeichnis = TokenVerzeichnis::neu();
        let ident = Identitaet::neu("c", "Carol");
        let t1 = verzeichnis
            .ausstellen(ident.clone(), chrono::Duration::hours(1))
            .await;
        let t2 = verzeichnis.ausstellen(ident, chrono::Duration::hours(1)).await;
        assert_ne!(t1, t2, "Tokens muessen eindeutig sein");

        verzeichnis.entfernen(&t1).await;
        assert!(verzeichnis.identitaet_aufloesen(&t1).await.is_err());
        assert!(verzeichnis.identitaet_aufloesen(&t2).await.is_ok());
    }
}
