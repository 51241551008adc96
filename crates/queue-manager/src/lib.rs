//! # Queue Manager
//!
//! Durable queue client for managed message-queue services with AWS SQS
//! semantics.
//!
//! This library provides:
//! - Lazy queue endpoint resolution that creates the queue when it is missing
//! - Single and batch send, receive and delete with per-entry batch results
//! - Visibility-timeout based redelivery of unprocessed messages
//! - Approximate message counts
//! - A long-poll processing loop with cooperative cancellation
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Queue names, messages, batch entries and results
//! - [`config`] - Client configuration and loading
//! - [`service`] - The queue service boundary
//! - [`providers`] - AWS SQS and in-memory queue services
//! - [`resolver`] - Cached queue endpoint resolution
//! - [`client`] - The queue client
//! - [`poller`] - The long-poll loop
//!
//! ## Example
//!
//! ```
//! use queue_manager::{InMemoryQueueService, QueueClient, QueueManagerConfig};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let service = Arc::new(InMemoryQueueService::default());
//! let client = QueueClient::new(service, QueueManagerConfig::new("orders")).unwrap();
//!
//! client.send("hello").await.unwrap();
//! let messages = client.receive().await.unwrap();
//! assert_eq!(messages[0].body, "hello");
//! client.delete(&messages[0].receipt_handle).await.unwrap();
//! # });
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod poller;
pub mod providers;
pub mod resolver;
pub mod service;

pub use client::{QueueClient, MAX_DELAY_SECONDS, MAX_MESSAGE_SIZE};
pub use config::{PollerConfig, QueueManagerConfig, QueueMode, SqsConfig};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use message::{
    BatchFailure, BatchResult, BatchSuccess, DeleteBatchEntry, DeleteOutcome, Message,
    MessageAttributeValue, MessageId, QueueCounts, QueueEndpoint, QueueName, ReceiptHandle,
    SendBatchEntry, SendRequest, SendResult, MAX_BATCH_SIZE,
};
pub use poller::{
    handler_fn, BatchHandler, MessageHandler, PollSummary, PollerHandle, ProcessingFailure,
    QueuePoller,
};
pub use providers::{InMemoryConfig, InMemoryQueueService, ServiceCall, SqsQueueService};
pub use resolver::EndpointResolver;
pub use service::{CreateQueueOptions, Lookup, QueueAttribute, QueueService, ReceiveRequest};

// Cancellation for the poll loop
pub use tokio_util::sync::CancellationToken;
