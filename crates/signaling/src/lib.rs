//! echtruf-signaling – WebSocket Signaling-Relay
//!
//! Dieser Crate implementiert das Relay fuer Zwei-Parteien-Anrufe. Er
//! verwaltet WebSocket-Verbindungen, Anruf-Sitzungen, leitet Signaling-
//! Umschlaege zwischen den Teilnehmern weiter und verteilt Audio-Frames an
//! Aufnahme und Erkennung.
//!
//! ## Architektur
//!
//! ```text
//! HTTP Listener (RelayServer, axum)
//!     |
//!     +-- /ws      -> ClientConnection (pro Verbindung ein Task)
//!     |                 |  Text   -> SignalRouter
//!     |                 |  Binaer -> AudioVerteiler
//!     |                 v
//!     |              VerbindungsRegister (Identitaet -> Verbindung)
//!     +-- /health
//!     +-- /metrics
//!
//! SignalRouter         – Anruf-Lebenszyklus, Aushandlung, Aufnahme
//! SitzungsTabelle      – Laufende Anrufe (callId -> Sitzung)
//! AudioVerteiler       – Eine Frame-Queue pro Anruf, Aufnahme + Detektor
//! ErkennungsVerteiler  – Detektor-Ergebnisse an den pruefenden Teilnehmer
//! presence             – Online-Liste an alle nach jeder Registermutation
//! ```

pub mod connection;
pub mod dispatch;
pub mod erkennung;
pub mod error;
pub mod presence;
pub mod registry;
pub mod router;
pub mod server;
pub mod server_state;
pub mod sessions;

// Bequeme Re-Exporte
pub use connection::ClientConnection;
pub use dispatch::AudioVerteiler;
pub use erkennung::ErkennungsVerteiler;
pub use error::{SignalingError, SignalingResult};
pub use registry::{Ausgehend, VerbindungsRegister};
pub use router::SignalRouter;
pub use server::RelayServer;
pub use server_state::{RelayConfig, RelayZustand};
pub use sessions::{AnrufSitzung, AnrufZustand, SitzungsTabelle};
