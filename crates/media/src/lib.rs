//! echtruf-media – Aufnahme und Echtheits-Detektor
//!
//! Beide Dienste sind externe Kollaborateure des Relays. Dieses Crate
//! definiert ihre Schnittstellen und liefert Implementierungen:
//!
//! ```text
//! Aufnahme  (Trait)  -> DateiAufnahme  (rohes PCM + JSON-Metadaten auf Disk)
//! Detektor  (Trait)  -> ProzessDetektor (externer Prozess, JSON-Zeilen)
//!                    -> KeinDetektor    (Erkennung deaktiviert)
//! ```
//!
//! Erkennungsergebnisse fliessen ueber einen `mpsc`-Kanal zurueck, nicht
//! ueber Callbacks.

pub mod aufnahme;
pub mod detektor;
pub mod error;
pub mod prozess;

// Bequeme Re-Exporte
pub use aufnahme::{Aufnahme, AufnahmeHandle, DateiAufnahme};
pub use detektor::{Detektor, KeinDetektor};
pub use error::{MediaError, MediaResult};
pub use prozess::ProzessDetektor;
