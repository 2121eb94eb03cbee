use std::sync::Arc;

use bytes::Bytes;
use ids_core::Alert;
use ids_telemetry::PipelineStats;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use futures::SinkExt;
use tracing::{debug, info, warn};

use crate::errors::MessagingError;

/// In-process fan-out of canonical alerts to every connected downstream
/// subscriber, over length-prefixed TCP frames of compact JSON.
///
/// Slow subscribers lag and drop frames rather than stall the pipeline —
/// `capacity` bounds how far behind a subscriber can fall before that
/// happens. A send with nobody attached to receive it counts as a drop
/// on the shared `dropped_out` counter, matching the non-blocking,
/// drop-on-overflow delivery contract of the adapter.
pub struct Publisher {
    tx: broadcast::Sender<Bytes>,
    stats: Arc<PipelineStats>,
}

impl Publisher {
    pub fn new(capacity: usize, stats: Arc<PipelineStats>) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Publisher { tx, stats }
    }

    /// Encodes and fans `alert` out to every subscriber currently attached.
    /// Non-blocking: a failed send (no receivers, or a receiver too far
    /// behind to keep up) is dropped and counted rather than propagated.
    pub fn publish(&self, alert: &Alert) -> Result<(), MessagingError> {
        let line = ids_core::codec::encode_alert(alert);
        if self.tx.send(Bytes::from(line.into_bytes())).is_err() {
            self.stats.dropped_out.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        Ok(())
    }

    /// Binds `addr` and accepts subscriber connections until cancelled.
    pub async fn serve(self: Arc<Self>, addr: std::net::SocketAddr) -> Result<(), MessagingError> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "publisher listening for subscribers");
        loop {
            let (socket, peer) = listener.accept().await?;
            let rx = self.tx.subscribe();
            tokio::spawn(async move {
                if let Err(err) = serve_one(socket, rx).await {
                    warn!(%peer, error = %err, "subscriber connection ended");
                } else {
                    debug!(%peer, "subscriber disconnected cleanly");
                }
            });
        }
    }
}

pub(crate) async fn serve_one(
    socket: TcpStream,
    mut rx: broadcast::Receiver<Bytes>,
) -> Result<(), MessagingError> {
    let mut framed = Framed::new(socket, LengthDelimitedCodec::new());
    loop {
        match rx.recv().await {
            Ok(frame) => framed.send(frame).await?,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                return Err(MessagingError::Lagged(skipped))
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}
