use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("network I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode alert frame: {0}")]
    Decode(#[from] ids_core::MalformedAlert),

    #[error("publisher broadcast channel lagged, {0} alerts dropped for this subscriber")]
    Lagged(u64),

    #[error("connection closed by peer")]
    ConnectionClosed,
}
