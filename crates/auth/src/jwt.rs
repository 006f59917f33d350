//! JWT-basierte Identitaetsaufloesung
//!
//! Der Identitaetsspeicher stellt HS256-signierte Tokens aus. Das Relay
//! prueft nur Signatur und Ablauf und liest `sub` (User-ID) sowie `name`
//! (Anzeigename) aus den Claims.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use echtruf_core::{Identitaet, UserId};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};

use crate::aufloeser::IdentitaetsAufloeser;
use crate::error::{AuthError, AuthResult};

/// Mindestlaenge des gemeinsamen Geheimnisses
const MIN_SECRET_LAENGE: usize = 32;

/// Claims eines Bearer-Tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// User-ID
    pub sub: String,
    /// Anzeigename (faellt auf `sub` zurueck)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Ausgestellt (Unix-Timestamp)
    pub iat: u64,
    /// Ablauf (Unix-Timestamp)
    pub exp: u64,
}

/// Prueft HS256-Tokens gegen ein gemeinsames Geheimnis
#[derive(Clone)]
pub struct JwtAufloeser {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    validation: Validation,
}

impl JwtAufloeser {
    /// Erstellt einen Aufloeser
    ///
    /// Gibt einen Fehler zurueck wenn das Geheimnis kuerzer als 32 Zeichen ist.
    pub fn neu(secret: &str) -> AuthResult<Self> {
        if secret.len() < MIN_SECRET_LAENGE {
            return Err(AuthError::Konfiguration(format!(
                "jwt_secret muss mindestens {MIN_SECRET_LAENGE} Zeichen lang sein"
            )));
        }

        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        })
    }

    /// Stellt einen Token fuer eine Identitaet aus (Werkzeuge und Tests)
    pub fn token_erstellen(&self, identitaet: &Identitaet, gueltig_sek: u64) -> AuthResult<String> {
        let jetzt = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AuthError::Konfiguration(format!("Systemzeit ungueltig: {e}")))?
            .as_secs();

        let claims = JwtClaims {
            sub: identitaet.id.als_str().to_string(),
            name: Some(identitaet.anzeigename.clone()),
            iat: jetzt,
            exp: jetzt + gueltig_sek,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Konfiguration(format!("Token nicht erstellbar: {e}")))
    }
}

#[async_trait]
impl IdentitaetsAufloeser for JwtAufloeser {
    async fn identitaet_aufloesen(&self, token: &str) -> AuthResult<Identitaet> {
        if token.is_empty() {
            return Err(AuthError::KeinNachweis);
        }

        let daten = decode::<JwtClaims>(token, &self.decoding_key, &self.validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::NachweisAbgelaufen,
                _ => {
                    tracing::debug!(fehler = %e, "JWT-Pruefung fehlgeschlagen");
                    AuthError::UngueltigerNachweis
                }
            },
        )?;

        let claims = daten.claims;
        if claims.sub.is_empty() {
            return Err(AuthError::UngueltigerNachweis);
        }
        let anzeigename = claims.name.unwrap_or_else(|| claims.sub.clone());

        Ok(Identitaet {
            id: UserId::neu(claims.sub),
            anzeigename,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-geheimnis-mit-mindestens-32-zeichen!";

    #[test]
    fn kurzes_geheimnis_wird_abgelehnt() {
        assert!(matches!(
            JwtAufloeser::neu("zu-kurz"),
            Err(AuthError::Konfiguration(_))
        ));
    }

    #[tokio::test]
    async fn token_roundtrip_liefert_identitaet() {
        let aufloeser = JwtAufloeser::neu(SECRET).unwrap();
        let ident = Identitaet::neu("u-42", "Alice");
        let token = aufloeser.token_erstellen(&ident, 3600).unwrap();

        let aufgeloest = aufloeser.identitaet_aufloesen(&token).await.unwrap();
        assert_eq!(aufgeloest, ident);
    }

    #[tokio::test]
    async fn fremde_signatur_ist_ungueltig() {
        let aussteller = JwtAufloeser::neu("ein-voellig-anderes-geheimnis-1234567890").unwrap();
        let token = aussteller
            .token_erstellen(&Identitaet::neu("u", "U"), 3600)
            .unwrap();

        let pruefer = JwtAufloeser::neu(SECRET).unwrap();
        assert!(matches!(
            pruefer.identitaet_aufloesen(&token).await,
            Err(AuthError::UngueltigerNachweis)
        ));
    }

    #[tokio::test]
    async fn abgelaufener_token_wird_erkannt() {
        let aufloeser = JwtAufloeser::neu(SECRET).unwrap();
        let claims = JwtClaims {
            sub: "u".into(),
            name: None,
            iat: 1_000,
            exp: 2_000,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            aufloeser.identitaet_aufloesen(&token).await,
            Err(AuthError::NachweisAbgelaufen)
        ));
    }

    #[tokio::test]
    async fn leerer_token_fehlt() {
        let aufloeser = JwtAufloeser::neu(SECRET).unwrap();
        assert!(aufloeser
            .identitaet_aufloesen("")
            .await
            .unwrap_err()
            .ist_fehlend());
    }
}
