//! echtruf-core – Gemeinsame Typen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Echtruf-Crates gemeinsam genutzt werden: Benutzer- und Anruf-IDs,
//! die authentifizierte Identitaet und das Ergebnis der Echtheitspruefung.

pub mod erkennung;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use erkennung::{ErkennungsErgebnis, ECHTHEITS_SCHWELLE};
pub use types::{CallId, Identitaet, UserId};
