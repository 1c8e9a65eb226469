//! Integration tests for the NATS source
//!
//! These tests require a running NATS server.
//! Run with: `cargo test --test integration_tests -- --ignored`
//! The server URL is taken from `NATS_URL` (default `nats://localhost:4222`).

#[cfg(test)]
mod integration {
    use bytes::Bytes;
    use nats_source::{NatsConfig, NatsError, NatsSource, ReadRequest, Source, SourceState};
    use std::collections::HashSet;
    use std::time::Duration;

    fn nats_url() -> String {
        std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string())
    }

    fn unique_subject() -> String {
        format!("test-subject-{}", uuid::Uuid::new_v4())
    }

    async fn publish(subject: &str, payloads: impl IntoIterator<Item = String>) {
        let client = async_nats::connect(nats_url()).await.expect("Failed to connect");
        for payload in payloads {
            client
                .publish(subject.to_string(), Bytes::from(payload))
                .await
                .expect("Failed to publish");
        }
        client.flush().await.expect("Failed to flush");
    }

    async fn wait_for_subscription() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    #[ignore = "requires NATS server"]
    async fn test_read_published_messages() {
        let subject = unique_subject();
        let source = NatsSource::new(NatsConfig::new(nats_url(), subject.clone(), "test-queue"))
            .await
            .expect("Failed to build source");
        assert_eq!(source.state(), SourceState::Subscribed);
        wait_for_subscription().await;

        publish(&subject, (0..3).map(|i| i.to_string())).await;

        let mut output = Vec::new();
        source
            .read(&ReadRequest::new(3, Duration::from_secs(1)), &mut output)
            .await;

        let payloads: Vec<_> = output.iter().map(|m| m.value.clone()).collect();
        assert_eq!(payloads, vec!["0", "1", "2"]);
        let offsets: HashSet<_> = output.iter().map(|m| m.offset.offset.clone()).collect();
        assert_eq!(offsets.len(), 3);

        source.ack(output.into_iter().map(|m| m.offset).collect()).await;
        assert_eq!(source.pending().await, -1);
        source.close().await.expect("Failed to close");
        assert_eq!(source.state(), SourceState::Closed);
    }

    #[tokio::test]
    #[ignore = "requires NATS server"]
    async fn test_read_times_out_without_messages() {
        let source = NatsSource::new(NatsConfig::new(nats_url(), unique_subject(), "test-queue"))
            .await
            .expect("Failed to build source");

        let start = std::time::Instant::now();
        let mut output = Vec::new();
        source
            .read(&ReadRequest::new(10, Duration::from_millis(300)), &mut output)
            .await;

        assert!(output.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(start.elapsed() < Duration::from_secs(2));
        source.close().await.expect("Failed to close");
    }

    #[tokio::test]
    #[ignore = "requires NATS server"]
    async fn test_queue_group_partitions_messages() {
        let subject = unique_subject();
        let first = NatsSource::new(NatsConfig::new(nats_url(), subject.clone(), "shared"))
            .await
            .expect("Failed to build first source");
        let second = NatsSource::new(NatsConfig::new(nats_url(), subject.clone(), "shared"))
            .await
            .expect("Failed to build second source");
        wait_for_subscription().await;

        let count = 100u64;
        publish(&subject, (0..count).map(|i| i.to_string())).await;

        let mut seen = HashSet::new();
        let mut sum = 0u64;
        for source in [&first, &second] {
            let mut output = Vec::new();
            source
                .read(&ReadRequest::new(count as usize, Duration::from_secs(1)), &mut output)
                .await;
            for message in output {
                let value: u64 = std::str::from_utf8(&message.value).unwrap().parse().unwrap();
                assert!(seen.insert(value), "message {} delivered twice", value);
                sum += value;
            }
        }
        assert_eq!(sum, (0..count).sum::<u64>());

        first.close().await.expect("Failed to close first source");
        second.close().await.expect("Failed to close second source");
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_server() {
        let result = NatsSource::new(NatsConfig::new("nats://127.0.0.1:1", "S", "Q")).await;
        assert!(matches!(result, Err(NatsError::Connection(_))));
    }
}
