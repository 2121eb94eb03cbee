//! Terminal outputs for unified alerts: console, append-only JSON-lines
//! file, and the downstream TCP publisher. Each sink is independently
//! enabled by configuration; workers fan an alert out to every enabled
//! sink in turn.

mod console;
mod errors;
mod file;
mod publisher;

pub use console::ConsoleSink;
pub use errors::SinkError;
pub use file::FileSink;
pub use publisher::PublisherSink;

use ids_core::Alert;

/// One configured output. Sinks vary in whether delivery can fail or
/// block, so this enum carries each concrete sink rather than forcing
/// them behind a shared `async` trait object.
#[derive(Clone)]
pub enum Sink {
    Console(ConsoleSink),
    File(FileSink),
    Publisher(PublisherSink),
}

impl Sink {
    /// Delivers one alert. On error the caller is expected to retry once
    /// then count and drop, per the sink delivery contract.
    pub async fn deliver(&self, alert: &Alert) -> Result<(), SinkError> {
        match self {
            Sink::Console(sink) => {
                sink.deliver(alert);
                Ok(())
            }
            Sink::File(sink) => sink.deliver(alert).await,
            Sink::Publisher(sink) => sink.deliver(alert).await,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Sink::Console(_) => "console",
            Sink::File(_) => "file",
            Sink::Publisher(_) => "publisher",
        }
    }
}
