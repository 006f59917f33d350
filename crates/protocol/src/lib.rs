//! echtruf-protocol – Signaling-Protokoll
//!
//! Dieses Crate definiert das Umschlag-Format der strukturierten
//! Signaling-Nachrichten und die Close-Codes der Verbindung. Binaere
//! Audio-Frames haben keinen Umschlag und tauchen hier nicht auf.

pub mod control;
pub mod error;

pub use control::{SchliessGrund, SignalTyp, Umschlag, GRUND_OFFLINE};
pub use error::{ProtokollFehler, ProtokollResult};
