//! Schnittstelle zum Echtheits-Detektor
//!
//! Der Detektor wird pro Anruf adressiert. Start und Stopp sind idempotent.
//! Ergebnisse kommen asynchron ueber einen `mpsc::Receiver<ErkennungsErgebnis>`
//! zurueck, den die Implementierung bei der Erstellung herausgibt.

use async_trait::async_trait;
use echtruf_core::{CallId, UserId};

use crate::error::MediaResult;

/// Grenze zum externen Detektor
#[async_trait]
pub trait Detektor: Send + Sync {
    /// Beginnt die Analyse des Sprechers `sprecher` im Anruf `call_id`
    async fn verarbeitung_starten(&self, call_id: &CallId, sprecher: &UserId) -> MediaResult<()>;

    /// Uebergibt einen Audio-Chunk des analysierten Sprechers
    async fn chunk_verarbeiten(
        &self,
        call_id: &CallId,
        sprecher: &UserId,
        daten: &[u8],
    ) -> MediaResult<()>;

    /// Beendet die Analyse fuer den Anruf
    async fn verarbeitung_stoppen(&self, call_id: &CallId) -> MediaResult<()>;
}

/// Deaktivierte Erkennung – verwirft alle Chunks
#[derive(Debug, Default, Clone, Copy)]
pub struct KeinDetektor;

#[async_trait]
impl Detektor for KeinDetektor {
    async fn verarbeitung_starten(&self, call_id: &CallId, sprecher: &UserId) -> MediaResult<()> {
        tracing::debug!(call_id = %call_id, sprecher = %sprecher, "Erkennung deaktiviert");
        Ok(())
    }

    async fn chunk_verarbeiten(
        &self,
        _call_id: &CallId,
        _sprecher: &UserId,
        _daten: &[u8],
    ) -> MediaResult<()> {
        Ok(())
    }

    async fn verarbeitung_stoppen(&self, _call_id: &CallId) -> MediaResult<()> {
        Ok(())
    }
}
