//! The queue client façade.
//!
//! [`QueueClient`] binds a [`QueueService`] to one named queue. The queue
//! endpoint is resolved on first use (creating the queue when it is missing)
//! and cached until the queue is deleted through the client.

use crate::config::{QueueManagerConfig, QueueMode};
use crate::error::{QueueError, ValidationError};
use crate::message::{
    validate_batch_ids, BatchResult, DeleteBatchEntry, DeleteOutcome, Message, QueueCounts,
    QueueEndpoint, QueueName, ReceiptHandle, SendBatchEntry, SendRequest, SendResult,
    MAX_BATCH_SIZE,
};
use crate::poller::QueuePoller;
use crate::providers::SqsQueueService;
use crate::resolver::EndpointResolver;
use crate::service::{CreateQueueOptions, QueueAttribute, QueueService, ReceiveRequest};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Largest message body the service accepts, in bytes
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024;

/// Longest per-message delivery delay, in seconds
pub const MAX_DELAY_SECONDS: u32 = 900;

/// Client for a single named queue.
///
/// Cloning is cheap; clones share the service handle and the endpoint cache.
#[derive(Clone)]
pub struct QueueClient {
    service: Arc<dyn QueueService>,
    resolver: Arc<EndpointResolver>,
    config: Arc<QueueManagerConfig>,
}

impl QueueClient {
    /// Create a client over `service`, validating the configuration first
    pub fn new(
        service: Arc<dyn QueueService>,
        config: QueueManagerConfig,
    ) -> Result<Self, QueueError> {
        let name = config.validate()?;
        let fifo = config.queue_mode == QueueMode::Fifo;
        let options = CreateQueueOptions {
            visibility_timeout: config.visibility_timeout,
            fifo,
            content_based_deduplication: fifo,
        };

        let resolver = EndpointResolver::new(Arc::clone(&service), name, options);
        Ok(Self {
            service,
            resolver: Arc::new(resolver),
            config: Arc::new(config),
        })
    }

    /// Create a client backed by AWS SQS using the `sqs` section of `config`
    pub async fn sqs(config: QueueManagerConfig) -> Result<Self, QueueError> {
        // Fail on a bad queue name before loading AWS credentials
        config.validate()?;
        let service = SqsQueueService::from_config(&config.sqs).await;
        Self::new(Arc::new(service), config)
    }

    pub fn queue_name(&self) -> &QueueName {
        self.resolver.queue_name()
    }

    /// Visibility timeout applied to every receive, in seconds
    pub fn visibility_timeout(&self) -> u32 {
        self.config.visibility_timeout
    }

    pub fn config(&self) -> &QueueManagerConfig {
        &self.config
    }

    /// Resolve the queue endpoint, creating the queue if it does not exist
    pub async fn endpoint(&self) -> Result<QueueEndpoint, QueueError> {
        self.resolver.resolve().await
    }

    /// Drop the cached endpoint, e.g. after the queue was deleted elsewhere
    pub async fn invalidate_endpoint(&self) {
        self.resolver.invalidate().await
    }

    // ------------------------------------------------------------------------
    // Message operations
    // ------------------------------------------------------------------------

    /// Send a message with the given body
    pub async fn send(&self, body: impl Into<String>) -> Result<SendResult, QueueError> {
        self.send_request(SendRequest::new(body)).await
    }

    /// Send the JSON encoding of `value`
    pub async fn send_json<T: Serialize>(&self, value: &T) -> Result<SendResult, QueueError> {
        self.send_request(SendRequest::json(value)?).await
    }

    /// Send a fully specified message
    pub async fn send_request(&self, request: SendRequest) -> Result<SendResult, QueueError> {
        self.validate_send(&request)?;
        let endpoint = self.endpoint().await?;

        let result = self.service.send(&endpoint, &request).await?;
        debug!(
            queue = %self.queue_name(),
            message_id = %result.message_id,
            "Sent message"
        );
        Ok(result)
    }

    /// Receive at most one message. An empty vector means nothing was available.
    pub async fn receive(&self) -> Result<Vec<Message>, QueueError> {
        self.receive_with(self.receive_request(1, None)).await
    }

    /// Receive up to the configured receive batch size
    pub async fn receive_batch(&self) -> Result<Vec<Message>, QueueError> {
        self.receive_batch_of(self.config.receive_batch_size).await
    }

    /// Receive up to `max_messages` (1-10) messages
    pub async fn receive_batch_of(&self, max_messages: u32) -> Result<Vec<Message>, QueueError> {
        if max_messages == 0 || max_messages as usize > MAX_BATCH_SIZE {
            return Err(ValidationError::OutOfRange {
                field: "max_messages".to_string(),
                message: format!("must be between 1 and {}", MAX_BATCH_SIZE),
            }
            .into());
        }
        self.receive_with(self.receive_request(max_messages, None))
            .await
    }

    pub(crate) fn receive_request(&self, max_messages: u32, wait_time: Option<u32>) -> ReceiveRequest {
        ReceiveRequest {
            max_messages,
            visibility_timeout: self.config.visibility_timeout,
            wait_time,
        }
    }

    pub(crate) async fn receive_with(
        &self,
        request: ReceiveRequest,
    ) -> Result<Vec<Message>, QueueError> {
        let endpoint = self.endpoint().await?;
        let messages = self.service.receive(&endpoint, &request).await?;
        debug!(
            queue = %self.queue_name(),
            count = messages.len(),
            "Received messages"
        );
        Ok(messages)
    }

    /// Delete a received message.
    ///
    /// An expired or already used receipt handle yields
    /// [`DeleteOutcome::NotFound`] rather than an error.
    pub async fn delete(&self, receipt_handle: &ReceiptHandle) -> Result<DeleteOutcome, QueueError> {
        let endpoint = self.endpoint().await?;

        match self.service.delete(&endpoint, receipt_handle).await {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(QueueError::MessageNotFound { .. }) => {
                debug!(
                    queue = %self.queue_name(),
                    receipt = %receipt_handle,
                    "Receipt handle expired or message already deleted"
                );
                Ok(DeleteOutcome::NotFound)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove every message from the queue. The service completes this asynchronously.
    pub async fn purge(&self) -> Result<(), QueueError> {
        let endpoint = self.endpoint().await?;
        self.service.purge(&endpoint).await?;
        info!(queue = %self.queue_name(), "Purged queue");
        Ok(())
    }

    /// Delete the queue. The next operation resolves (and creates) it again.
    pub async fn delete_queue(&self) -> Result<(), QueueError> {
        self.resolver.delete_queue().await
    }

    // ------------------------------------------------------------------------
    // Batch operations
    // ------------------------------------------------------------------------

    /// Send up to ten messages in one request.
    ///
    /// Every entry gets the same checks as [`QueueClient::send_request`]
    /// before any request is made. Entries the service rejects are listed in
    /// [`BatchResult::failed`].
    pub async fn send_batch(
        &self,
        entries: &[SendBatchEntry],
    ) -> Result<BatchResult<SendResult>, QueueError> {
        validate_batch_ids(entries.iter().map(|e| e.id.as_str()))?;
        for entry in entries {
            self.validate_send(&entry.request)?;
        }
        let endpoint = self.endpoint().await?;

        let result = self.service.send_batch(&endpoint, entries).await?;
        debug!(
            queue = %self.queue_name(),
            successful = result.successful.len(),
            failed = result.failed.len(),
            "Sent message batch"
        );
        Ok(result)
    }

    /// Delete up to ten messages in one request
    pub async fn delete_batch(
        &self,
        entries: &[DeleteBatchEntry],
    ) -> Result<BatchResult<()>, QueueError> {
        validate_batch_ids(entries.iter().map(|e| e.id.as_str()))?;
        let endpoint = self.endpoint().await?;

        let result = self.service.delete_batch(&endpoint, entries).await?;
        debug!(
            queue = %self.queue_name(),
            successful = result.successful.len(),
            failed = result.failed.len(),
            "Deleted message batch"
        );
        Ok(result)
    }

    // ------------------------------------------------------------------------
    // Attribute queries
    // ------------------------------------------------------------------------

    /// Approximate visible, in-flight and delayed message counts
    pub async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let attributes = self.attributes(&QueueAttribute::COUNTS).await?;

        Ok(QueueCounts {
            visible: count_of(&attributes, QueueAttribute::ApproximateNumberOfMessages),
            in_flight: count_of(&attributes, QueueAttribute::ApproximateNumberOfMessagesNotVisible),
            delayed: count_of(&attributes, QueueAttribute::ApproximateNumberOfMessagesDelayed),
        })
    }

    /// Total of visible, in-flight and delayed messages
    pub async fn queue_size(&self) -> Result<u64, QueueError> {
        Ok(self.counts().await?.total())
    }

    pub async fn available_size(&self) -> Result<u64, QueueError> {
        self.single_count(QueueAttribute::ApproximateNumberOfMessages)
            .await
    }

    pub async fn in_flight_size(&self) -> Result<u64, QueueError> {
        self.single_count(QueueAttribute::ApproximateNumberOfMessagesNotVisible)
            .await
    }

    pub async fn delayed_size(&self) -> Result<u64, QueueError> {
        self.single_count(QueueAttribute::ApproximateNumberOfMessagesDelayed)
            .await
    }

    async fn single_count(&self, attribute: QueueAttribute) -> Result<u64, QueueError> {
        let attributes = self.attributes(&[attribute]).await?;
        Ok(count_of(&attributes, attribute))
    }

    async fn attributes(
        &self,
        names: &[QueueAttribute],
    ) -> Result<HashMap<QueueAttribute, String>, QueueError> {
        let endpoint = self.endpoint().await?;
        self.service.get_attributes(&endpoint, names).await
    }

    // ------------------------------------------------------------------------
    // Polling
    // ------------------------------------------------------------------------

    /// Long-poll loop over this queue using the configured poller settings
    pub fn poller(&self) -> QueuePoller {
        QueuePoller::new(self.clone(), self.config.poller.clone())
    }

    fn validate_send(&self, request: &SendRequest) -> Result<(), ValidationError> {
        if request.body.is_empty() {
            return Err(ValidationError::Required {
                field: "body".to_string(),
            });
        }
        if request.body.len() > MAX_MESSAGE_SIZE {
            return Err(ValidationError::OutOfRange {
                field: "body".to_string(),
                message: format!(
                    "{} bytes exceeds the {} byte limit",
                    request.body.len(),
                    MAX_MESSAGE_SIZE
                ),
            });
        }
        if matches!(request.delay_seconds, Some(delay) if delay > MAX_DELAY_SECONDS) {
            return Err(ValidationError::OutOfRange {
                field: "delay_seconds".to_string(),
                message: format!("must not exceed {}", MAX_DELAY_SECONDS),
            });
        }

        if self.config.queue_mode == QueueMode::Fifo {
            if request.message_group_id.is_none() {
                return Err(ValidationError::Required {
                    field: "message_group_id".to_string(),
                });
            }
            if request.delay_seconds.is_some() {
                return Err(ValidationError::InvalidFormat {
                    field: "delay_seconds".to_string(),
                    message: "FIFO queues do not support per-message delays".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Missing or unparsable counts read as zero
fn count_of(attributes: &HashMap<QueueAttribute, String>, attribute: QueueAttribute) -> u64 {
    attributes
        .get(&attribute)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

impl std::fmt::Debug for QueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueClient")
            .field("queue_name", self.queue_name())
            .field("visibility_timeout", &self.config.visibility_timeout)
            .field("queue_mode", &self.config.queue_mode)
            .finish()
    }
}
