//! Tests for the poll loop.

use super::*;
use crate::config::QueueManagerConfig;
use crate::providers::memory::InMemoryQueueService;
use crate::service::QueueService;
use std::collections::HashSet;
use std::sync::Mutex;
use tokio::time::Duration;

fn memory_client(visibility_timeout: u32) -> QueueClient {
    QueueClient::new(
        Arc::new(InMemoryQueueService::default()) as Arc<dyn QueueService>,
        QueueManagerConfig::new("orders").with_visibility_timeout(visibility_timeout),
    )
    .expect("Setup: config should be valid")
}

fn waiting_config() -> PollerConfig {
    PollerConfig::default().with_wait_time(1)
}

/// Handler that fails each listed body on its first delivery only
struct FailFirstDelivery {
    failing: Mutex<HashSet<String>>,
    processed: mpsc::UnboundedSender<(String, Option<u32>)>,
}

#[async_trait]
impl MessageHandler for FailFirstDelivery {
    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        let first_failure = self
            .failing
            .lock()
            .map(|mut failing| failing.remove(&message.body))
            .unwrap_or(false);
        if first_failure {
            anyhow::bail!("cannot process {}", message.body);
        }

        let _ = self
            .processed
            .send((message.body.clone(), message.receive_count()));
        Ok(())
    }
}

mod next_batch {
    use super::*;

    #[tokio::test]
    async fn test_empty_queue_yields_empty_batch() {
        let poller = memory_client(60).poller();

        let batch = poller.next_batch().await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_batch_size_follows_config() {
        let client = memory_client(60);
        for i in 0..5 {
            client.send(format!("m{}", i)).await.unwrap();
        }
        let poller = client
            .poller()
            .with_config(PollerConfig::default().with_max_messages(3));

        assert_eq!(poller.next_batch().await.unwrap().len(), 3);
        // Receiving does not delete
        assert_eq!(client.in_flight_size().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_invalid_config_fails() {
        let poller = memory_client(60)
            .poller()
            .with_config(PollerConfig::default().with_max_messages(11));

        assert!(matches!(
            poller.next_batch().await,
            Err(QueueError::Configuration(_))
        ));
    }
}

mod run {
    use super::*;

    #[tokio::test]
    async fn test_cancelled_token_stops_before_receiving() {
        let poller = memory_client(60).poller();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = poller
            .run(handler_fn(|_| async { anyhow::Ok(()) }), cancel)
            .await
            .unwrap();

        assert_eq!(summary, PollSummary::default());
    }

    #[tokio::test]
    async fn test_processed_messages_are_deleted() {
        let client = memory_client(60);
        client.send("a").await.unwrap();
        client.send("b").await.unwrap();
        let cancel = CancellationToken::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let handler = {
            let seen = Arc::clone(&seen);
            let cancel = cancel.clone();
            handler_fn(move |message: Message| {
                let seen = Arc::clone(&seen);
                let cancel = cancel.clone();
                async move {
                    let mut seen = seen.lock().unwrap();
                    seen.push(message.body);
                    if seen.len() == 2 {
                        cancel.cancel();
                    }
                    anyhow::Ok(())
                }
            })
        };
        let summary = client.poller().run(handler, cancel).await.unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.deleted, 2);
        assert_eq!(client.queue_size().await.unwrap(), 0);
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_skip_delete_leaves_messages_in_flight() {
        let client = memory_client(60);
        client.send("a").await.unwrap();
        let cancel = CancellationToken::new();

        let handler = {
            let cancel = cancel.clone();
            handler_fn(move |_| {
                let cancel = cancel.clone();
                async move {
                    cancel.cancel();
                    anyhow::Ok(())
                }
            })
        };
        let summary = client
            .poller()
            .with_config(PollerConfig::default().with_skip_delete(true))
            .run(handler, cancel)
            .await
            .unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.deleted, 0);
        assert_eq!(client.in_flight_size().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_message_is_redelivered_while_loop_continues() {
        let client = memory_client(60);
        let first = client.send("1").await.unwrap();
        let second = client.send("2").await.unwrap();
        let (processed_tx, mut processed) = mpsc::unbounded_channel();
        let handler = FailFirstDelivery {
            failing: Mutex::new(HashSet::from(["2".to_string()])),
            processed: processed_tx,
        };

        let mut handle = client.poller().with_config(waiting_config()).spawn(handler);

        // Message 1 succeeds; message 2 fails without stopping the loop
        assert_eq!(processed.recv().await, Some(("1".to_string(), Some(1))));
        let failure = handle.failures().recv().await.unwrap();
        assert_eq!(failure.message_id, second.message_id);
        assert!(failure.error.contains("cannot process 2"));

        // Message 1 is gone; message 2 is hidden until its visibility timeout lapses
        let counts = client.counts().await.unwrap();
        assert_eq!(counts.visible, 0);
        assert_eq!(counts.in_flight, 1);

        assert_eq!(processed.recv().await, Some(("2".to_string(), Some(2))));

        let summary = handle.shutdown().await.unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.deleted, 2);
        assert_eq!(client.queue_size().await.unwrap(), 0);
        assert_ne!(first.message_id, second.message_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_handler_is_isolated() {
        let client = memory_client(60);
        client.send("boom").await.unwrap();
        client.send("fine").await.unwrap();
        let (processed_tx, mut processed) = mpsc::unbounded_channel();

        let handler = handler_fn(move |message: Message| {
            let processed = processed_tx.clone();
            async move {
                if message.body == "boom" {
                    panic!("handler exploded");
                }
                let _ = processed.send(message.body);
                anyhow::Ok(())
            }
        });
        let mut handle = client.poller().with_config(waiting_config()).spawn(handler);

        let failure = handle.failures().recv().await.unwrap();
        assert!(failure.error.contains("handler exploded"));
        assert_eq!(processed.recv().await.as_deref(), Some("fine"));

        let summary = handle.shutdown().await.unwrap();
        assert!(summary.failed >= 1);
        assert_eq!(summary.processed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_receipt_does_not_stop_the_loop() {
        let client = memory_client(5);
        client.send("slow").await.unwrap();
        let cancel = CancellationToken::new();

        let handler = {
            let cancel = cancel.clone();
            handler_fn(move |_| {
                let cancel = cancel.clone();
                async move {
                    // Outlive the visibility timeout so the delete finds no receipt
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    cancel.cancel();
                    anyhow::Ok(())
                }
            })
        };
        let summary = client.poller().run(handler, cancel).await.unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.deleted, 0);
        assert_eq!(client.available_size().await.unwrap(), 1);
    }
}

mod run_batches {
    use super::*;

    struct Batches {
        fail: bool,
        cancel: CancellationToken,
        sizes: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl BatchHandler for Batches {
        async fn handle_batch(&self, messages: &[Message]) -> anyhow::Result<()> {
            self.sizes.lock().unwrap().push(messages.len());
            self.cancel.cancel();
            if self.fail {
                anyhow::bail!("batch rejected");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_successful_batch_is_deleted_together() {
        let client = memory_client(60);
        for i in 0..4 {
            client.send(format!("m{}", i)).await.unwrap();
        }
        let cancel = CancellationToken::new();
        let handler = Batches {
            fail: false,
            cancel: cancel.clone(),
            sizes: Mutex::new(Vec::new()),
        };

        let summary = client.poller().run_batches(handler, cancel).await.unwrap();

        assert_eq!(summary.received, 4);
        assert_eq!(summary.processed, 4);
        assert_eq!(summary.deleted, 4);
        assert_eq!(client.queue_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_batch_is_left_and_reported_per_message() {
        let client = memory_client(60);
        client.send("a").await.unwrap();
        client.send("b").await.unwrap();
        let cancel = CancellationToken::new();
        let (failures_tx, mut failures) = mpsc::unbounded_channel();
        let handler = Batches {
            fail: true,
            cancel: cancel.clone(),
            sizes: Mutex::new(Vec::new()),
        };

        let summary = client
            .poller()
            .report_failures_to(failures_tx)
            .run_batches(handler, cancel)
            .await
            .unwrap();

        assert_eq!(summary.failed, 2);
        assert_eq!(summary.deleted, 0);
        assert_eq!(client.in_flight_size().await.unwrap(), 2);
        for _ in 0..2 {
            let failure = failures.recv().await.unwrap();
            assert!(failure.error.contains("batch rejected"));
        }
    }
}

mod handle {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_idle_loop() {
        let handle = memory_client(60)
            .poller()
            .with_config(waiting_config())
            .spawn(handler_fn(|_| async { anyhow::Ok(()) }));

        tokio::time::sleep(Duration::from_secs(3)).await;
        let summary = handle.shutdown().await.unwrap();

        assert!(summary.receives >= 1);
        assert_eq!(summary.received, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_failure_surfaces_through_join() {
        let service = Arc::new(InMemoryQueueService::default());
        let client = QueueClient::new(
            Arc::clone(&service) as Arc<dyn QueueService>,
            QueueManagerConfig::new("orders"),
        )
        .unwrap();
        let endpoint = client.endpoint().await.unwrap();
        // Remove the queue behind the client's back
        service.delete_queue(&endpoint).await.unwrap();

        let handle = client
            .poller()
            .with_config(waiting_config())
            .spawn(handler_fn(|_| async { anyhow::Ok(()) }));

        assert!(matches!(
            handle.join().await,
            Err(QueueError::QueueNotFound { .. })
        ));
    }

    #[test]
    fn test_handler_error_descriptions() {
        assert_eq!(handler_error(Ok(Ok(()))), None);
        assert_eq!(
            handler_error(Ok(Err(anyhow::anyhow!("inner").context("outer")))),
            Some("outer: inner".to_string())
        );
    }
}
