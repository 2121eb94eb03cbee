use futures::StreamExt;
use ids_core::Alert;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::errors::MessagingError;

/// A connected feed of canonical alerts read off a [`Publisher`](crate::Publisher).
pub struct Subscriber {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
}

impl Subscriber {
    pub async fn connect(addr: std::net::SocketAddr) -> Result<Self, MessagingError> {
        let socket = TcpStream::connect(addr).await?;
        Ok(Subscriber { framed: Framed::new(socket, LengthDelimitedCodec::new()) })
    }

    /// Reads the next alert, or `None` once the publisher closes the
    /// connection.
    pub async fn next_alert(&mut self) -> Option<Result<Alert, MessagingError>> {
        let frame = self.framed.next().await?;
        Some(match frame {
            Ok(bytes) => ids_core::codec::decode_alert(&bytes).map_err(MessagingError::Decode),
            Err(io_err) => Err(MessagingError::Io(io_err)),
        })
    }
}
