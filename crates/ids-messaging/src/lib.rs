//! TCP transport for the aggregator's downstream alert feed: a
//! broadcast-backed [`Publisher`] and a framed [`Subscriber`] client.

pub mod errors;
pub mod publisher;
pub mod raw_publisher;
pub mod subscriber;

pub use errors::MessagingError;
pub use publisher::Publisher;
pub use raw_publisher::RawPublisher;
pub use subscriber::Subscriber;

#[cfg(test)]
mod tests {
    use super::*;
    use ids_core::{Alert, AlertSource, Severity};
    use ids_telemetry::PipelineStats;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn sample_alert() -> Alert {
        Alert {
            alert_id: "t1".into(),
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
    async fn publishes_to_a_connected_subscriber() {
        let publisher = Arc::new(Publisher::new(16, Arc::new(PipelineStats::default())));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let server = publisher.clone();
        tokio::spawn(async move {
            server.serve(addr).await.ok();
        });

        // give the listener a moment to bind
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut subscriber = Subscriber::connect(addr).await.unwrap();
        // give the server a moment to register the subscriber before publishing
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        publisher.publish(&sample_alert()).unwrap();

        let received = subscriber.next_alert().await.unwrap().unwrap();
        assert_eq!(received.alert_id, "t1");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_counts_as_dropped_out() {
        let stats = Arc::new(PipelineStats::default());
        let publisher = Publisher::new(16, stats.clone());

        publisher.publish(&sample_alert()).unwrap();

        assert_eq!(stats.dropped_out.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}
