//! Common test utilities for queue-manager integration tests
//!
//! This module provides:
//! - Clients over a shared in-memory queue service
//! - A recording message handler
//! - Shared test data builders

use async_trait::async_trait;
use queue_manager::{
    InMemoryQueueService, Message, MessageHandler, PollerConfig, QueueClient, QueueManagerConfig,
    QueueMode, QueueService,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

// ============================================================================
// Clients
// ============================================================================

/// A queue service and a client over it
pub struct TestQueue {
    pub service: Arc<InMemoryQueueService>,
    pub client: QueueClient,
}

impl TestQueue {
    /// Standard queue with a 60 second visibility timeout and 1 second long polls
    pub fn standard(name: &str) -> Self {
        Self::with_config(QueueManagerConfig::new(name).with_poller(waiting_poller()))
    }

    #[allow(dead_code)]
    pub fn fifo(name: &str) -> Self {
        Self::with_config(
            QueueManagerConfig::new(name)
                .with_queue_mode(QueueMode::Fifo)
                .with_poller(waiting_poller()),
        )
    }

    pub fn with_config(config: QueueManagerConfig) -> Self {
        let service = Arc::new(InMemoryQueueService::default());
        let client = QueueClient::new(Arc::clone(&service) as Arc<dyn QueueService>, config)
            .expect("Setup: config should be valid");
        Self { service, client }
    }

    /// A second client over the same service, as another process would have
    #[allow(dead_code)]
    pub fn second_client(&self, config: QueueManagerConfig) -> QueueClient {
        QueueClient::new(Arc::clone(&self.service) as Arc<dyn QueueService>, config)
            .expect("Setup: config should be valid")
    }
}

/// Poller settings whose receives wait, so paused time advances between polls
pub fn waiting_poller() -> PollerConfig {
    PollerConfig::default().with_wait_time(1)
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler that forwards each body and receive count to a channel
#[derive(Clone)]
#[allow(dead_code)]
pub struct RecordingHandler {
    seen: mpsc::UnboundedSender<(String, Option<u32>)>,
    fail_bodies: Arc<Vec<String>>,
}

#[allow(dead_code)]
impl RecordingHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, Option<u32>)>) {
        Self::failing_on(&[])
    }

    /// Fails every delivery whose body is in `bodies`
    pub fn failing_on(bodies: &[&str]) -> (Self, mpsc::UnboundedReceiver<(String, Option<u32>)>) {
        let (seen, receiver) = mpsc::unbounded_channel();
        let handler = Self {
            seen,
            fail_bodies: Arc::new(bodies.iter().map(|b| b.to_string()).collect()),
        };
        (handler, receiver)
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        let _ = self
            .seen
            .send((message.body.clone(), message.receive_count()));

        if self.fail_bodies.contains(&message.body) {
            anyhow::bail!("rejected {}", message.body);
        }
        Ok(())
    }
}

// ============================================================================
// Test Data
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(dead_code)]
pub struct OrderPlaced {
    pub order_id: u64,
    pub customer: String,
}

#[allow(dead_code)]
pub fn order(order_id: u64) -> OrderPlaced {
    OrderPlaced {
        order_id,
        customer: format!("customer-{}", order_id % 3),
    }
}
