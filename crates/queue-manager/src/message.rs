//! Message types for queue operations including core domain identifiers.

use crate::error::{QueueError, SerializationError, ValidationError};
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Maximum number of entries the queue service accepts in one batch request
pub const MAX_BATCH_SIZE: usize = 10;

const FIFO_SUFFIX: &str = ".fifo";

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name with length and character restrictions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.is_empty() || name.len() > 80 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 1-80 characters".to_string(),
            });
        }

        let base = name.strip_suffix(FIFO_SUFFIX).unwrap_or(&name);
        if base.is_empty()
            || !base
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, underscores and a trailing .fifo allowed"
                    .to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Whether the name carries the FIFO suffix
    pub fn is_fifo(&self) -> bool {
        self.0.ends_with(FIFO_SUFFIX)
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for QueueName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(name: QueueName) -> Self {
        name.0
    }
}

/// Opaque handle addressing a resolved queue (the queue URL for SQS)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueEndpoint(String);

impl QueueEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Service-assigned identifier of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// One-time token identifying a single delivery of a message.
///
/// Valid only until the visibility timeout of the receive that produced it
/// expires.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Get handle string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// Typed value of a user-defined message attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageAttributeValue {
    String(String),
    Number(String),
    Binary(Vec<u8>),
}

impl MessageAttributeValue {
    /// Data type label used by the queue service ("String", "Number", "Binary")
    pub fn data_type(&self) -> &'static str {
        match self {
            Self::String(_) => "String",
            Self::Number(_) => "Number",
            Self::Binary(_) => "Binary",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Number(s) => Some(s),
            Self::Binary(_) => None,
        }
    }
}

/// A message received from the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_id: MessageId,
    pub receipt_handle: ReceiptHandle,
    pub body: String,
    /// System attributes reported by the service (e.g. `ApproximateReceiveCount`)
    pub attributes: HashMap<String, String>,
    pub message_attributes: HashMap<String, MessageAttributeValue>,
}

impl Message {
    /// Deserialize the body as JSON
    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        serde_json::from_str(&self.body)
            .map_err(|e| QueueError::Serialization(SerializationError::JsonError(e)))
    }

    /// Number of times this message has been delivered, when reported
    pub fn receive_count(&self) -> Option<u32> {
        self.attributes
            .get("ApproximateReceiveCount")
            .and_then(|v| v.parse().ok())
    }

    /// Time the message was accepted by the service, when reported
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.attributes
            .get("SentTimestamp")
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
    }
}

/// A message to be sent to the queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendRequest {
    pub body: String,
    pub message_attributes: HashMap<String, MessageAttributeValue>,
    /// Delivery delay in seconds
    pub delay_seconds: Option<u32>,
    /// Ordering group, required for FIFO queues
    pub message_group_id: Option<String>,
    pub deduplication_id: Option<String>,
}

impl SendRequest {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    /// Build a request whose body is the JSON encoding of `value`
    pub fn json<T: Serialize>(value: &T) -> Result<Self, QueueError> {
        let body = serde_json::to_string(value)
            .map_err(|e| QueueError::Serialization(SerializationError::JsonError(e)))?;
        Ok(Self::new(body))
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: MessageAttributeValue) -> Self {
        self.message_attributes.insert(key.into(), value);
        self
    }

    pub fn with_delay_seconds(mut self, delay: u32) -> Self {
        self.delay_seconds = Some(delay);
        self
    }

    pub fn with_message_group_id(mut self, group: impl Into<String>) -> Self {
        self.message_group_id = Some(group.into());
        self
    }

    pub fn with_deduplication_id(mut self, id: impl Into<String>) -> Self {
        self.deduplication_id = Some(id.into());
        self
    }
}

impl From<&str> for SendRequest {
    fn from(body: &str) -> Self {
        Self::new(body)
    }
}

impl From<String> for SendRequest {
    fn from(body: String) -> Self {
        Self::new(body)
    }
}

/// Outcome of a successful send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    pub message_id: MessageId,
    /// Sequencing token assigned by FIFO queues
    pub sequence_number: Option<String>,
}

/// Outcome of a delete that did not fail at the request level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Handle expired or message already deleted
    NotFound,
}

// ============================================================================
// Batch Types
// ============================================================================

/// One message of a send batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendBatchEntry {
    /// Client-assigned id, unique within the batch
    pub id: String,
    pub request: SendRequest,
}

impl SendBatchEntry {
    pub fn new(id: impl Into<String>, request: impl Into<SendRequest>) -> Self {
        Self {
            id: id.into(),
            request: request.into(),
        }
    }
}

/// One receipt of a delete batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteBatchEntry {
    /// Client-assigned id, unique within the batch
    pub id: String,
    pub receipt_handle: ReceiptHandle,
}

impl DeleteBatchEntry {
    pub fn new(id: impl Into<String>, receipt_handle: ReceiptHandle) -> Self {
        Self {
            id: id.into(),
            receipt_handle,
        }
    }
}

impl From<&Message> for DeleteBatchEntry {
    fn from(message: &Message) -> Self {
        Self::new(
            message.message_id.as_str(),
            message.receipt_handle.clone(),
        )
    }
}

/// Successful entry of a batch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSuccess<T> {
    pub id: String,
    pub result: T,
}

/// Failed entry of a batch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub id: String,
    pub code: String,
    pub message: Option<String>,
    /// Whether the failure was caused by the request rather than the service
    pub sender_fault: bool,
}

/// Per-entry outcomes of a batch request. Partial failure is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult<T> {
    pub successful: Vec<BatchSuccess<T>>,
    pub failed: Vec<BatchFailure>,
}

impl<T> BatchResult<T> {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_ids(&self) -> impl Iterator<Item = &str> {
        self.failed.iter().map(|f| f.id.as_str())
    }
}

impl<T> Default for BatchResult<T> {
    fn default() -> Self {
        Self {
            successful: Vec::new(),
            failed: Vec::new(),
        }
    }
}

/// Reject empty, oversize or ambiguous batches before any network call
pub(crate) fn validate_batch_ids<'a>(
    ids: impl ExactSizeIterator<Item = &'a str>,
) -> Result<(), ValidationError> {
    let size = ids.len();
    if size == 0 {
        return Err(ValidationError::Required {
            field: "entries".to_string(),
        });
    }
    if size > MAX_BATCH_SIZE {
        return Err(ValidationError::BatchTooLarge {
            size,
            max_size: MAX_BATCH_SIZE,
        });
    }

    let mut seen = HashSet::with_capacity(size);
    for id in ids {
        if id.is_empty()
            || id.len() > 80
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidFormat {
                field: "entry_id".to_string(),
                message: format!("'{}' must be 1-80 alphanumeric, '-' or '_' characters", id),
            });
        }
        if !seen.insert(id) {
            return Err(ValidationError::DuplicateBatchId { id: id.to_string() });
        }
    }

    Ok(())
}

// ============================================================================
// Queue Attributes
// ============================================================================

/// Approximate message counts reported by the queue service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    /// Messages available for retrieval
    pub visible: u64,
    /// Messages received but not yet deleted or timed out
    pub in_flight: u64,
    /// Messages waiting for their delivery delay to elapse
    pub delayed: u64,
}

impl QueueCounts {
    /// Sum of all three counts, saturating at `u64::MAX`
    pub fn total(&self) -> u64 {
        self.visible
            .saturating_add(self.in_flight)
            .saturating_add(self.delayed)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
