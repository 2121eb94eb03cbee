use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::MessagingError;
use crate::publisher::serve_one;

/// Producer-side counterpart to [`Publisher`](crate::Publisher): fans out
/// raw, pre-normalization JSON frames rather than canonical alerts. Each
/// producer binds one of these on its assigned endpoint; the
/// aggregator's receiver tasks connect as subscribers and decode the
/// frames themselves.
pub struct RawPublisher {
    tx: broadcast::Sender<Bytes>,
}

impl RawPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        RawPublisher { tx }
    }

    /// Fans `bytes` out to every subscriber currently attached. Returns
    /// without error even if nobody is listening.
    pub fn publish_raw(&self, bytes: Bytes) -> Result<(), MessagingError> {
        let _ = self.tx.send(bytes);
        Ok(())
    }

    /// Binds `addr` and accepts subscriber connections until `shutdown`
    /// is cancelled.
    pub async fn serve(self: Arc<Self>, addr: std::net::SocketAddr, shutdown: CancellationToken) -> Result<(), MessagingError> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "raw publisher listening for the aggregator");
        loop {
            let (socket, peer) = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted?,
            };
            let rx = self.tx.subscribe();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {}
                    result = serve_one(socket, rx) => {
                        match result {
                            Ok(()) => debug!(%peer, "aggregator disconnected cleanly"),
                            Err(err) => warn!(%peer, error = %err, "aggregator connection ended"),
                        }
                    }
                }
            });
        }
    }
}
