//! Queue service implementations.
//!
//! - [`SqsQueueService`] talks to AWS SQS (or a compatible endpoint such as
//!   LocalStack) through the AWS SDK.
//! - [`InMemoryQueueService`] keeps queues in process memory. It follows the
//!   same visibility, receipt and batch rules and is meant for tests and local
//!   development.

pub mod memory;
pub mod sqs;

pub use memory::{InMemoryConfig, InMemoryQueueService, ServiceCall};
pub use sqs::SqsQueueService;
