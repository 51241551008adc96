//! The queue service boundary.
//!
//! Everything the client needs from a managed queue goes through
//! [`QueueService`]. Implementations live in [`crate::providers`]: an AWS SQS
//! backend and an in-memory backend used for tests and local development.

use crate::error::QueueError;
use crate::message::{
    BatchResult, DeleteBatchEntry, Message, QueueEndpoint, QueueName, ReceiptHandle,
    SendBatchEntry, SendRequest, SendResult,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

/// Result of looking a queue up by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(QueueEndpoint),
    NotFound,
}

/// Settings applied when a queue is created on demand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateQueueOptions {
    /// Queue-level default visibility timeout in seconds
    pub visibility_timeout: u32,
    pub fifo: bool,
    /// Deduplicate FIFO messages by body hash when no id is supplied
    pub content_based_deduplication: bool,
}

impl Default for CreateQueueOptions {
    fn default() -> Self {
        Self {
            visibility_timeout: crate::config::DEFAULT_VISIBILITY_TIMEOUT,
            fifo: false,
            content_based_deduplication: false,
        }
    }
}

/// Parameters of a single receive call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub max_messages: u32,
    pub visibility_timeout: u32,
    /// Long-poll wait; `None` defers to the queue's configured wait
    pub wait_time: Option<u32>,
}

/// Queue attributes the client reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueAttribute {
    ApproximateNumberOfMessages,
    ApproximateNumberOfMessagesNotVisible,
    ApproximateNumberOfMessagesDelayed,
}

impl QueueAttribute {
    pub const COUNTS: [QueueAttribute; 3] = [
        Self::ApproximateNumberOfMessages,
        Self::ApproximateNumberOfMessagesNotVisible,
        Self::ApproximateNumberOfMessagesDelayed,
    ];

    /// Attribute name as used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApproximateNumberOfMessages => "ApproximateNumberOfMessages",
            Self::ApproximateNumberOfMessagesNotVisible => "ApproximateNumberOfMessagesNotVisible",
            Self::ApproximateNumberOfMessagesDelayed => "ApproximateNumberOfMessagesDelayed",
        }
    }
}

impl fmt::Display for QueueAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations offered by a managed queue service.
///
/// Implementations report a missing queue on lookup through [`Lookup::NotFound`],
/// a create racing an existing queue through [`QueueError::Conflict`] and an
/// expired or unknown receipt through [`QueueError::MessageNotFound`]. Batch
/// operations return per-entry failures inside the [`BatchResult`].
#[async_trait]
pub trait QueueService: Send + Sync {
    async fn lookup_queue(&self, name: &QueueName) -> Result<Lookup, QueueError>;

    async fn create_queue(
        &self,
        name: &QueueName,
        options: &CreateQueueOptions,
    ) -> Result<QueueEndpoint, QueueError>;

    async fn send(
        &self,
        endpoint: &QueueEndpoint,
        request: &SendRequest,
    ) -> Result<SendResult, QueueError>;

    async fn send_batch(
        &self,
        endpoint: &QueueEndpoint,
        entries: &[SendBatchEntry],
    ) -> Result<BatchResult<SendResult>, QueueError>;

    async fn receive(
        &self,
        endpoint: &QueueEndpoint,
        request: &ReceiveRequest,
    ) -> Result<Vec<Message>, QueueError>;

    async fn delete(
        &self,
        endpoint: &QueueEndpoint,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), QueueError>;

    async fn delete_batch(
        &self,
        endpoint: &QueueEndpoint,
        entries: &[DeleteBatchEntry],
    ) -> Result<BatchResult<()>, QueueError>;

    async fn purge(&self, endpoint: &QueueEndpoint) -> Result<(), QueueError>;

    async fn delete_queue(&self, endpoint: &QueueEndpoint) -> Result<(), QueueError>;

    async fn get_attributes(
        &self,
        endpoint: &QueueEndpoint,
        names: &[QueueAttribute],
    ) -> Result<HashMap<QueueAttribute, String>, QueueError>;
}
