use std::sync::Arc;

use ids_core::Alert;
use ids_messaging::Publisher;

use crate::errors::SinkError;

/// Re-emits the canonical alert over the downstream publisher endpoint
/// so external subscribers (dashboards, indexers) can follow the feed.
#[derive(Clone)]
pub struct PublisherSink {
    publisher: Arc<Publisher>,
}

impl PublisherSink {
    pub fn new(publisher: Arc<Publisher>) -> Self {
        PublisherSink { publisher }
    }

    pub async fn deliver(&self, alert: &Alert) -> Result<(), SinkError> {
        self.publisher.publish(alert).map_err(SinkError::Publisher)
    }
}
