//! Detektor als externer Prozess
//!
//! Das Erkennungsmodell laeuft ausserhalb des Relays. Die Kommunikation
//! laeuft ueber stdin/stdout als JSON-Zeilen:
//!
//! ```text
//! Relay -> Detektor:  {"op":"start","callId":"X","speakerId":"B"}
//!                     {"op":"chunk","callId":"X","speakerId":"B","data":"<base64>"}
//!                     {"op":"stop","callId":"X"}
//! Detektor -> Relay:  {"callId":"X","speakerId":"B","confidence":0.93,"isAuthentic":true}
//! ```
//!
//! `isAuthentic` und `timestamp` sind optional; fehlt `isAuthentic`, wird es
//! aus der Konfidenz abgeleitet.

use std::process::Stdio;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use echtruf_core::{CallId, ErkennungsErgebnis, UserId};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::detektor::Detektor;
use crate::error::{MediaError, MediaResult};

/// Groesse der Befehls-Queue zum Prozess
const BEFEHL_QUEUE_GROESSE: usize = 1024;

/// Groesse der Ergebnis-Queue zum Relay
const ERGEBNIS_QUEUE_GROESSE: usize = 256;

// ---------------------------------------------------------------------------
// Drahtformat
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum DetektorBefehl {
    Start {
        #[serde(rename = "callId")]
        call_id: CallId,
        #[serde(rename = "speakerId")]
        speaker_id: UserId,
    },
    Chunk {
        #[serde(rename = "callId")]
        call_id: CallId,
        #[serde(rename = "speakerId")]
        speaker_id: UserId,
        data: String,
    },
    Stop {
        #[serde(rename = "callId")]
        call_id: CallId,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetektorAntwort {
    call_id: CallId,
    speaker_id: UserId,
    confidence: f64,
    #[serde(default)]
    is_authentic: Option<bool>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

impl From<DetektorAntwort> for ErkennungsErgebnis {
    fn from(antwort: DetektorAntwort) -> Self {
        let basis =
            ErkennungsErgebnis::aus_konfidenz(antwort.call_id, antwort.speaker_id, antwort.confidence);
        Self {
            is_authentic: antwort.is_authentic.unwrap_or(basis.is_authentic),
            timestamp: antwort.timestamp.unwrap_or(basis.timestamp),
            ..basis
        }
    }
}

// ---------------------------------------------------------------------------
// ProzessDetektor
// ---------------------------------------------------------------------------

/// Detektor der Befehle an einen externen Prozess weiterreicht
pub struct ProzessDetektor {
    befehle: mpsc::Sender<DetektorBefehl>,
}

impl ProzessDetektor {
    /// Startet den Detektor-Prozess und gibt den Ergebnis-Stream zurueck
    pub fn starten(
        programm: &str,
        argumente: &[String],
    ) -> MediaResult<(Self, mpsc::Receiver<ErkennungsErgebnis>)> {
        let mut kind = Command::new(programm)
            .args(argumente)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = kind.stdin.take().ok_or(MediaError::DetektorBeendet)?;
        let stdout = kind.stdout.take().ok_or(MediaError::DetektorBeendet)?;

        let programm_name = programm.to_string();
        tokio::spawn(async move {
            match kind.wait().await {
                Ok(status) => {
                    tracing::warn!(programm = %programm_name, status = %status, "Detektor-Prozess beendet")
                }
                Err(e) => {
                    tracing::error!(programm = %programm_name, fehler = %e, "Detektor-Prozess nicht abwartbar")
                }
            }
        });

        tracing::info!(programm = %programm, "Detektor-Prozess gestartet");
        Ok(Self::aus_stroemen(stdin, stdout))
    }

    /// Verbindet den Detektor mit beliebigen Byte-Stroemen
    pub fn aus_stroemen<W, R>(schreiber: W, leser: R) -> (Self, mpsc::Receiver<ErkennungsErgebnis>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (befehl_tx, befehl_rx) = mpsc::channel(BEFEHL_QUEUE_GROESSE);
        let (ergebnis_tx, ergebnis_rx) = mpsc::channel(ERGEBNIS_QUEUE_GROESSE);

        tokio::spawn(befehle_schreiben(schreiber, befehl_rx));
        tokio::spawn(ergebnisse_lesen(leser, ergebnis_tx));

        (Self { befehle: befehl_tx }, ergebnis_rx)
    }

    async fn senden(&self, befehl: DetektorBefehl) -> MediaResult<()> {
        self.befehle
            .send(befehl)
            .await
            .map_err(|_| MediaError::DetektorBeendet)
    }
}

async fn befehle_schreiben<W>(mut schreiber: W, mut befehle: mpsc::Receiver<DetektorBefehl>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(befehl) = befehle.recv().await {
        let mut zeile = match serde_json::to_vec(&befehl) {
            Ok(z) => z,
            Err(e) => {
                tracing::error!(fehler = %e, "Detektor-Befehl nicht serialisierbar");
                continue;
            }
        };
        zeile.push(b'\n');

        if let Err(e) = schreiber.write_all(&zeile).await {
            tracing::warn!(fehler = %e, "Schreiben an Detektor fehlgeschlagen");
            break;
        }
        if let Err(e) = schreiber.flush().await {
            tracing::warn!(fehler = %e, "Flush an Detektor fehlgeschlagen");
            break;
        }
    }
    tracing::debug!("Detektor-Schreiber beendet");
}

async fn ergebnisse_lesen<R>(leser: R, ergebnisse: mpsc::Sender<ErkennungsErgebnis>)
where
    R: AsyncRead + Unpin,
{
    let mut zeilen = BufReader::new(leser).lines();
    loop {
        let zeile = match zeilen.next_line().await {
            Ok(Some(z)) => z,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(fehler = %e, "Lesen vom Detektor fehlgeschlagen");
                break;
            }
        };
        if zeile.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<DetektorAntwort>(&zeile) {
            Ok(antwort) => {
                if ergebnisse.send(antwort.into()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(fehler = %e, "Ungueltige Detektor-Antwort verworfen");
            }
        }
    }
    tracing::debug!("Detektor-Leser beendet");
}

#[async_trait]
impl Detektor for ProzessDetektor {
    async fn verarbeitung_starten(&self, call_id: &CallId, sprecher: &UserId) -> MediaResult<()> {
        self.senden(DetektorBefehl::Start {
            call_id: call_id.clone(),
            speaker_id: sprecher.clone(),
        })
        .await
    }

    async fn chunk_verarbeiten(
        &self,
        call_id: &CallId,
        sprecher: &UserId,
        daten: &[u8],
    ) -> MediaResult<()> {
        self.senden(DetektorBefehl::Chunk {
            call_id: call_id.clone(),
            speaker_id: sprecher.clone(),
            data: base64::engine::general_purpose::STANDARD.encode(daten),
        })
        .await
    }

    async fn verarbeitung_stoppen(&self, call_id: &CallId) -> MediaResult<()> {
        self.senden(DetektorBefehl::Stop {
            call_id: call_id.clone(),
        })
        .await
    }
}
