//! Aufnahme-Backend fuer Gespraechsaudio
//!
//! Das `Aufnahme`-Trait abstrahiert den Langzeit-Audiospeicher. Pro
//! (Anruf, Sprecher) wird ein Handle geoeffnet, in das Chunks in Reihenfolge
//! geschrieben werden. Start und Stopp duerfen mehrfach aufgerufen werden.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use echtruf_core::{CallId, UserId};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{MediaError, MediaResult};

/// Opakes Handle einer laufenden Aufnahme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AufnahmeHandle(pub u64);

/// Grenze zum externen Aufnahme-Dienst
#[async_trait]
pub trait Aufnahme: Send + Sync {
    /// Oeffnet eine Aufnahme fuer (Anruf, Sprecher)
    async fn aufnahme_starten(
        &self,
        call_id: &CallId,
        sprecher: &UserId,
        abtastrate: u32,
    ) -> MediaResult<AufnahmeHandle>;

    /// Haengt einen Chunk an die Aufnahme an
    async fn chunk_schreiben(&self, handle: AufnahmeHandle, daten: &[u8]) -> MediaResult<()>;

    /// Schliesst die Aufnahme. Unbekannte Handles sind kein Fehler.
    async fn aufnahme_stoppen(&self, handle: AufnahmeHandle) -> MediaResult<()>;
}

// ---------------------------------------------------------------------------
// DateiAufnahme
// ---------------------------------------------------------------------------

/// Metadaten die beim Stoppen neben die PCM-Datei geschrieben werden
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct AufnahmeMetadaten {
    call_id: CallId,
    speaker_id: UserId,
    sample_rate: u32,
    format: &'static str,
    bytes: u64,
    started_at: DateTime<Utc>,
    stopped_at: Option<DateTime<Utc>>,
}

struct OffeneAufnahme {
    pfad: PathBuf,
    datei: Mutex<tokio::fs::File>,
    meta: Mutex<AufnahmeMetadaten>,
}

/// Disk-basierte Aufnahme
///
/// Schreibt rohes PCM (s16le) nach `basis/<call_id>/<sprecher>-<zeit>.pcm`
/// und beim Stoppen eine gleichnamige `.json` mit den Metadaten.
pub struct DateiAufnahme {
    basis: PathBuf,
    naechstes_handle: AtomicU64,
    offen: DashMap<u64, Arc<OffeneAufnahme>>,
}

impl DateiAufnahme {
    /// Neue DateiAufnahme mit dem angegebenen Basisverzeichnis
    pub fn neu(basis: impl Into<PathBuf>) -> Self {
        Self {
            basis: basis.into(),
            naechstes_handle: AtomicU64::new(1),
            offen: DashMap::new(),
        }
    }

    /// Anzahl der offenen Aufnahmen
    pub fn offene_anzahl(&self) -> usize {
        self.offen.len()
    }

    /// Basisverzeichnis
    pub fn basis(&self) -> &Path {
        &self.basis
    }
}

/// Macht eine opake ID als Pfadkomponente unschaedlich
fn pfad_komponente(roh: &str) -> String {
    let bereinigt: String = roh
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if bereinigt.is_empty() {
        "_".to_string()
    } else {
        bereinigt
    }
}

#[async_trait]
impl Aufnahme for DateiAufnahme {
    async fn aufnahme_starten(
        &self,
        call_id: &CallId,
        sprecher: &UserId,
        abtastrate: u32,
    ) -> MediaResult<AufnahmeHandle> {
        let verzeichnis = self.basis.join(pfad_komponente(call_id.als_str()));
        tokio::fs::create_dir_all(&verzeichnis).await?;

        let jetzt = Utc::now();
        let pfad = verzeichnis.join(format!(
            "{}-{}.pcm",
            pfad_komponente(sprecher.als_str()),
            jetzt.format("%Y%m%dT%H%M%S%.3f")
        ));
        let datei = tokio::fs::File::create(&pfad).await?;

        let handle = self.naechstes_handle.fetch_add(1, Ordering::Relaxed);
        self.offen.insert(
            handle,
            Arc::new(OffeneAufnahme {
                pfad: pfad.clone(),
                datei: Mutex::new(datei),
                meta: Mutex::new(AufnahmeMetadaten {
                    call_id: call_id.clone(),
                    speaker_id: sprecher.clone(),
                    sample_rate: abtastrate,
                    format: "pcm_s16le",
                    bytes: 0,
                    started_at: jetzt,
                    stopped_at: None,
                }),
            }),
        );

        tracing::info!(
            call_id = %call_id,
            sprecher = %sprecher,
            abtastrate,
            pfad = %pfad.display(),
            "Aufnahme gestartet"
        );
        Ok(AufnahmeHandle(handle))
    }

    async fn chunk_schreiben(&self, handle: AufnahmeHandle, daten: &[u8]) -> MediaResult<()> {
        let aufnahme = self
            .offen
            .get(&handle.0)
            .map(|eintrag| Arc::clone(eintrag.value()))
            .ok_or(MediaError::UnbekanntesHandle(handle.0))?;

        aufnahme.datei.lock().await.write_all(daten).await?;
        aufnahme.meta.lock().await.bytes += daten.len() as u64;
        Ok(())
    }

    async fn aufnahme_stoppen(&self, handle: AufnahmeHandle) -> MediaResult<()> {
        let Some((_, aufnahme)) = self.offen.remove(&handle.0) else {
            tracing::debug!(handle = handle.0, "Aufnahme bereits gestoppt");
            return Ok(());
        };

        aufnahme.datei.lock().await.flush().await?;

        let mut meta = aufnahme.meta.lock().await.clone();
        meta.stopped_at = Some(Utc::now());
        let meta_pfad = aufnahme.pfad.with_extension("json");
        tokio::fs::write(&meta_pfad, serde_json::to_vec_pretty(&meta)?).await?;

        tracing::info!(
            call_id = %meta.call_id,
            sprecher = %meta.speaker_id,
            bytes = meta.bytes,
            "Aufnahme gestoppt"
        );
        Ok(())
    }
}
