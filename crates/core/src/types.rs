//! Gemeinsame Identifikationstypen fuer Echtruf
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! Benutzer- und Anruf-IDs zur Compilezeit auszuschliessen. Beide sind
//! opak: Benutzer-IDs stammen aus dem externen Identitaetsspeicher,
//! Anruf-IDs werden vom Anrufer vergeben (oder vom Relay nachgeliefert).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opake Benutzer-ID aus dem externen Identitaetsspeicher
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Erstellt eine UserId aus einem beliebigen String
    pub fn neu(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Gibt die ID als String-Slice zurueck
    pub fn als_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Global eindeutige Anruf-ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub String);

impl CallId {
    /// Erstellt eine CallId aus einem vom Client gelieferten Wert
    pub fn neu(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Vergibt eine neue zufaellige CallId (UUID v4)
    pub fn erzeugen() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Gibt die ID als String-Slice zurueck
    pub fn als_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Authentifizierte Identitaet (nur lesend, gehoert dem Identitaetsspeicher)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identitaet {
    pub id: UserId,
    #[serde(rename = "name")]
    pub anzeigename: String,
}

impl Identitaet {
    pub fn neu(id: impl Into<String>, anzeigename: impl Into<String>) -> Self {
        Self {
            id: UserId::neu(id),
            anzeigename: anzeigename.into(),
        }
    }
}
