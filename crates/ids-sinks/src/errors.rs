use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("file sink I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("file sink writer task is no longer running")]
    WriterGone,

    #[error("publisher sink failed: {0}")]
    Publisher(#[from] ids_messaging::MessagingError),
}
