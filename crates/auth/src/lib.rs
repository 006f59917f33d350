//! echtruf-auth – Identitaetsaufloesung
//!
//! Dieses Crate implementiert die einzige Schnittstelle zum externen
//! Identitaetsspeicher: `identitaet_aufloesen(token) -> Identitaet`.
//! - `JwtAufloeser`: HS256-signierte Bearer-Tokens
//! - `TokenVerzeichnis`: statische In-Memory-Tokens (Entwicklung, Tests)

pub mod aufloeser;
pub mod error;
pub mod jwt;

// Bequeme Re-Exporte
pub use aufloeser::{IdentitaetsAufloeser, TokenVerzeichnis};
pub use error::{AuthError, AuthResult};
pub use jwt::{JwtAufloeser, JwtClaims};
