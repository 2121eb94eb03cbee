use std::path::{Path, PathBuf};

use ids_core::Alert;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::SinkError;

type WriteRequest = (Alert, tokio::sync::oneshot::Sender<Result<(), SinkError>>);

/// Handle to the single background writer task that owns the output
/// file. All deliveries funnel through a channel so the file only ever
/// has one writer. Each delivery carries a reply channel so a real I/O
/// failure surfaces back to the caller instead of being swallowed inside
/// the writer task, letting the manager's retry-once logic apply.
#[derive(Clone)]
pub struct FileSink {
    tx: mpsc::Sender<WriteRequest>,
}

impl FileSink {
    /// Spawns the writer task and returns a cheaply-cloneable handle to it.
    pub fn spawn(
        path: PathBuf,
        flush_every_n: u64,
        flush_interval_ms: u64,
        rotate_max_bytes: Option<u64>,
        shutdown: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(run_writer(rx, path, flush_every_n, flush_interval_ms, rotate_max_bytes, shutdown));
        FileSink { tx }
    }

    /// Hands the alert to the writer task and awaits its write result.
    /// A full/closed channel means the writer is gone or badly behind,
    /// which is surfaced the same as a write failure so the caller can
    /// retry and, on a second failure, count and drop.
    pub async fn deliver(&self, alert: &Alert) -> Result<(), SinkError> {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        self.tx.send((alert.clone(), reply_tx)).await.map_err(|_| SinkError::WriterGone)?;
        reply_rx.await.map_err(|_| SinkError::WriterGone)?
    }
}

async fn run_writer(
    mut rx: mpsc::Receiver<WriteRequest>,
    path: PathBuf,
    flush_every_n: u64,
    flush_interval_ms: u64,
    rotate_max_bytes: Option<u64>,
    shutdown: CancellationToken,
) {
    let mut file = match open_append(&path).await {
        Ok(f) => f,
        Err(err) => {
            error!(?path, error = %err, "file sink could not open output file, sink disabled");
            return;
        }
    };

    let mut ticker = interval(std::time::Duration::from_millis(flush_interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut unflushed = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            maybe_request = rx.recv() => {
                match maybe_request {
                    Some((alert, reply)) => {
                        let result = match write_line(&mut file, &alert).await {
                            Ok(()) => {
                                unflushed += 1;
                                if unflushed >= flush_every_n {
                                    flush(&mut file, &mut unflushed).await;
                                }
                                if let Some(max_bytes) = rotate_max_bytes {
                                    if let Err(err) = rotate_if_oversized(&mut file, &path, max_bytes).await {
                                        warn!(error = %err, "file sink rotation check failed");
                                    }
                                }
                                Ok(())
                            }
                            Err(err) => {
                                error!(error = %err, "file sink write failed");
                                Err(SinkError::Io(err))
                            }
                        };
                        let _ = reply.send(result);
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                if unflushed > 0 {
                    flush(&mut file, &mut unflushed).await;
                }
            }
        }
    }

    flush(&mut file, &mut unflushed).await;
    info!(?path, "file sink writer shut down");
}

async fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path).await
}

async fn write_line(file: &mut File, alert: &Alert) -> std::io::Result<()> {
    let mut line = ids_core::codec::encode_alert(alert);
    line.push('\n');
    file.write_all(line.as_bytes()).await
}

async fn flush(file: &mut File, unflushed: &mut u64) {
    if let Err(err) = file.sync_data().await {
        error!(error = %err, "file sink fsync failed");
    }
    *unflushed = 0;
}

/// Renames the current file to a timestamped name once it exceeds
/// `max_bytes`, then reopens `path` fresh so future writes start a new
/// file.
async fn rotate_if_oversized(file: &mut File, path: &Path, max_bytes: u64) -> std::io::Result<()> {
    let size = file.metadata().await?.len();
    if size < max_bytes {
        return Ok(());
    }

    flush(file, &mut 0).await;
    let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    let rotated = rotated_path(path, &stamp.to_string());
    fs::rename(path, &rotated).await?;
    *file = open_append(path).await?;
    info!(?rotated, "file sink rotated");
    Ok(())
}

fn rotated_path(path: &Path, stamp: &str) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("unified_alerts");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("jsonl");
    let name = format!("{stem}-{stamp}.{ext}");
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(name),
        _ => PathBuf::from(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ids_core::{AlertSource, Severity};
    use std::collections::HashMap;

    fn sample() -> Alert {
        Alert {
            alert_id: "a1".into(),
            timestamp: chrono::Utc::now(),
            source: AlertSource::NidsSignature,
            severity: Severity::High,
            title: "Port Scan".into(),
            description: String::new(),
            metadata: HashMap::new(),
            risk_score: 70,
            category: "network.scan".into(),
            dedup_count: 1,
            correlation_refs: None,
        }
    }

    #[tokio::test]
    async fn writes_one_line_per_alert() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unified_alerts.jsonl");
        let shutdown = CancellationToken::new();
        let sink = FileSink::spawn(path.clone(), 1, 1_000, None, shutdown.clone());

        sink.deliver(&sample()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        shutdown.cancel();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("\"alert_id\":\"a1\""));
    }

    #[tokio::test]
    async fn write_failure_is_reported_back_to_the_caller() {
        // Opening a directory for append fails at spawn time and the
        // writer task exits immediately, so the next delivery observes
        // the closed channel the same way a real write failure would.
        let dir = tempfile::tempdir().unwrap();
        let shutdown = CancellationToken::new();
        let sink = FileSink::spawn(dir.path().to_path_buf(), 1, 1_000, None, shutdown);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(sink.deliver(&sample()).await.is_err());
    }

    #[test]
    fn rotated_path_preserves_stem_and_extension() {
        let path = Path::new("/var/log/unified_alerts.jsonl");
        let rotated = rotated_path(path, "20260727-120000");
        assert_eq!(rotated, Path::new("/var/log/unified_alerts-20260727-120000.jsonl"));
    }
}
