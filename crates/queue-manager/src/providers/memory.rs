//! In-memory queue service for testing and development.
//!
//! This module provides a fully functional in-process queue service that:
//! - Creates, looks up, purges and deletes named queues
//! - Hides received messages for their visibility timeout and redelivers them
//!   when it lapses
//! - Issues a fresh receipt handle per delivery and rejects stale ones
//! - Honours per-message delivery delays and long-poll wait times
//! - Emulates FIFO queues (per-group ordering, deduplication, sequence numbers)
//!
//! Time is measured with `tokio::time`, so tests can pause and advance the
//! clock to observe visibility expiry.
//!
//! Every call is recorded and failures can be scripted with
//! [`InMemoryQueueService::fail_next`], which lets callers exercise error paths
//! without a real service.

use crate::error::QueueError;
use crate::message::{
    BatchFailure, BatchResult, BatchSuccess, DeleteBatchEntry, Message, MessageAttributeValue,
    MessageId, QueueEndpoint, QueueName, ReceiptHandle, SendBatchEntry, SendRequest, SendResult,
};
use crate::service::{CreateQueueOptions, Lookup, QueueAttribute, QueueService, ReceiveRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::time::{Duration, Instant};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// FIFO deduplication window
const DEDUPLICATION_WINDOW: Duration = Duration::from_secs(300);

/// Interval at which a long-polling receive re-checks the queue
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// In-memory service configuration
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// Largest accepted message body in bytes
    pub max_message_size: usize,
    /// Prefix of the endpoints handed out for queues
    pub endpoint_prefix: String,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_message_size: 256 * 1024,
            endpoint_prefix: "memory://queues".to_string(),
        }
    }
}

/// Service operations, as recorded in the call log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceCall {
    LookupQueue,
    CreateQueue,
    Send,
    SendBatch,
    Receive,
    Delete,
    DeleteBatch,
    Purge,
    DeleteQueue,
    GetAttributes,
}

// ============================================================================
// Internal Storage Structures
// ============================================================================

#[derive(Default)]
struct ServiceState {
    /// Queues keyed by endpoint
    queues: HashMap<QueueEndpoint, InMemoryQueue>,
    calls: Vec<ServiceCall>,
    scripted_failures: VecDeque<(ServiceCall, QueueError)>,
}

struct InMemoryQueue {
    options: CreateQueueOptions,
    messages: Vec<StoredMessage>,
    /// FIFO deduplication ids and the message they produced
    deduplication: HashMap<String, (MessageId, Instant)>,
    next_sequence: u64,
}

impl InMemoryQueue {
    fn new(options: CreateQueueOptions) -> Self {
        Self {
            options,
            messages: Vec::new(),
            deduplication: HashMap::new(),
            next_sequence: 1,
        }
    }

    fn accept(&mut self, request: &SendRequest, now: Instant) -> Result<SendResult, Rejection> {
        let mut sequence_number = None;
        let mut deduplication_id = None;

        if self.options.fifo {
            if request.message_group_id.is_none() {
                return Err(Rejection::new(
                    "MissingParameter",
                    "The request must contain the parameter MessageGroupId.",
                ));
            }
            let dedup = match (&request.deduplication_id, self.options.content_based_deduplication)
            {
                (Some(id), _) => id.clone(),
                (None, true) => hex::encode(Sha256::digest(request.body.as_bytes())),
                (None, false) => {
                    return Err(Rejection::new(
                        "InvalidParameterValue",
                        "The queue should either have ContentBasedDeduplication enabled or MessageDeduplicationId provided explicitly",
                    ))
                }
            };

            self.deduplication
                .retain(|_, (_, at)| now.duration_since(*at) < DEDUPLICATION_WINDOW);
            if let Some((message_id, _)) = self.deduplication.get(&dedup) {
                return Ok(SendResult {
                    message_id: message_id.clone(),
                    sequence_number: None,
                });
            }

            sequence_number = Some(format!("{:020}", self.next_sequence));
            self.next_sequence += 1;
            deduplication_id = Some(dedup);
        }

        let message_id = MessageId::new();
        let delay = Duration::from_secs(u64::from(request.delay_seconds.unwrap_or(0)));
        self.messages.push(StoredMessage {
            message_id: message_id.clone(),
            body: request.body.clone(),
            message_attributes: request.message_attributes.clone(),
            group_id: request.message_group_id.clone(),
            sequence_number: sequence_number.clone(),
            deduplication_id: deduplication_id.clone(),
            sent_at: Utc::now(),
            visible_at: now + delay,
            receive_count: 0,
            receipt: None,
        });

        if let Some(dedup) = deduplication_id {
            self.deduplication.insert(dedup, (message_id.clone(), now));
        }

        Ok(SendResult {
            message_id,
            sequence_number,
        })
    }

    fn take_visible(
        &mut self,
        max_messages: usize,
        visibility_timeout: Duration,
        now: Instant,
    ) -> Vec<Message> {
        // FIFO groups with a message in flight are blocked until it is settled
        let blocked_groups: HashSet<String> = if self.options.fifo {
            self.messages
                .iter()
                .filter(|m| m.is_in_flight(now))
                .filter_map(|m| m.group_id.clone())
                .collect()
        } else {
            HashSet::new()
        };

        let mut received = Vec::new();
        for stored in self.messages.iter_mut() {
            if received.len() >= max_messages {
                break;
            }
            if !stored.is_visible(now) {
                continue;
            }
            if matches!(&stored.group_id, Some(group) if blocked_groups.contains(group)) {
                continue;
            }

            stored.receive_count += 1;
            stored.receipt = Some(ReceiptHandle::new(uuid::Uuid::new_v4().to_string()));
            stored.visible_at = now + visibility_timeout;
            received.push(stored.to_message());
        }

        received
    }

    fn remove_by_receipt(&mut self, receipt: &ReceiptHandle, now: Instant) -> bool {
        let position = self
            .messages
            .iter()
            .position(|m| m.receipt.as_ref() == Some(receipt) && m.is_in_flight(now));

        match position {
            Some(index) => {
                self.messages.remove(index);
                true
            }
            None => false,
        }
    }

    fn count(&self, attribute: QueueAttribute, now: Instant) -> usize {
        self.messages
            .iter()
            .filter(|m| match attribute {
                QueueAttribute::ApproximateNumberOfMessages => m.is_visible(now),
                QueueAttribute::ApproximateNumberOfMessagesNotVisible => m.is_in_flight(now),
                QueueAttribute::ApproximateNumberOfMessagesDelayed => m.is_delayed(now),
            })
            .count()
    }
}

struct StoredMessage {
    message_id: MessageId,
    body: String,
    message_attributes: HashMap<String, MessageAttributeValue>,
    group_id: Option<String>,
    sequence_number: Option<String>,
    deduplication_id: Option<String>,
    sent_at: DateTime<Utc>,
    visible_at: Instant,
    receive_count: u32,
    /// Receipt of the latest delivery
    receipt: Option<ReceiptHandle>,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        now >= self.visible_at
    }

    fn is_in_flight(&self, now: Instant) -> bool {
        self.receipt.is_some() && now < self.visible_at
    }

    fn is_delayed(&self, now: Instant) -> bool {
        self.receipt.is_none() && now < self.visible_at
    }

    fn to_message(&self) -> Message {
        let mut attributes = HashMap::new();
        attributes.insert(
            "ApproximateReceiveCount".to_string(),
            self.receive_count.to_string(),
        );
        attributes.insert(
            "SentTimestamp".to_string(),
            self.sent_at.timestamp_millis().to_string(),
        );
        if let Some(group) = &self.group_id {
            attributes.insert("MessageGroupId".to_string(), group.clone());
        }
        if let Some(sequence) = &self.sequence_number {
            attributes.insert("SequenceNumber".to_string(), sequence.clone());
        }
        if let Some(dedup) = &self.deduplication_id {
            attributes.insert("MessageDeduplicationId".to_string(), dedup.clone());
        }

        Message {
            message_id: self.message_id.clone(),
            receipt_handle: self
                .receipt
                .clone()
                .unwrap_or_else(|| ReceiptHandle::new(String::new())),
            body: self.body.clone(),
            attributes,
            message_attributes: self.message_attributes.clone(),
        }
    }
}

/// Per-entry rejection reason
struct Rejection {
    code: &'static str,
    message: String,
}

impl Rejection {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn into_error(self) -> QueueError {
        QueueError::Service {
            code: self.code.to_string(),
            message: self.message,
        }
    }

    fn into_failure(self, id: &str) -> BatchFailure {
        BatchFailure {
            id: id.to_string(),
            code: self.code.to_string(),
            message: Some(self.message),
            sender_fault: true,
        }
    }
}

// ============================================================================
// InMemoryQueueService
// ============================================================================

/// In-memory queue service implementation
pub struct InMemoryQueueService {
    state: Mutex<ServiceState>,
    config: InMemoryConfig,
}

impl InMemoryQueueService {
    /// Create new in-memory service with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            state: Mutex::new(ServiceState::default()),
            config,
        }
    }

    /// Endpoint the service hands out for `name`
    pub fn endpoint_for(&self, name: &QueueName) -> QueueEndpoint {
        QueueEndpoint::new(format!("{}/{}", self.config.endpoint_prefix, name))
    }

    /// Every operation invoked so far, in call order
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    /// Number of times `call` was invoked
    pub fn call_count(&self, call: ServiceCall) -> usize {
        self.lock()
            .map(|s| s.calls.iter().filter(|c| **c == call).count())
            .unwrap_or_default()
    }

    /// Make the next invocation of `call` fail with `error`
    pub fn fail_next(&self, call: ServiceCall, error: QueueError) {
        if let Ok(mut state) = self.lock() {
            state.scripted_failures.push_back((call, error));
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ServiceState>, QueueError> {
        self.state.lock().map_err(|_| QueueError::Service {
            code: "InternalError".to_string(),
            message: "in-memory queue state is poisoned".to_string(),
        })
    }

    /// Lock the state, record the call and surface any scripted failure
    fn begin(&self, call: ServiceCall) -> Result<MutexGuard<'_, ServiceState>, QueueError> {
        let mut state = self.lock()?;
        state.calls.push(call);

        if let Some(index) = state.scripted_failures.iter().position(|(c, _)| *c == call) {
            if let Some((_, error)) = state.scripted_failures.remove(index) {
                return Err(error);
            }
        }

        Ok(state)
    }

    fn validate_body(&self, request: &SendRequest) -> Result<(), Rejection> {
        if request.body.is_empty() {
            return Err(Rejection::new(
                "MissingParameter",
                "The request must contain the parameter MessageBody.",
            ));
        }
        if request.body.len() > self.config.max_message_size {
            return Err(Rejection::new(
                "InvalidParameterValue",
                format!(
                    "Message must be shorter than {} bytes.",
                    self.config.max_message_size
                ),
            ));
        }
        Ok(())
    }
}

impl Default for InMemoryQueueService {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

fn queue_mut<'a>(
    state: &'a mut ServiceState,
    endpoint: &QueueEndpoint,
) -> Result<&'a mut InMemoryQueue, QueueError> {
    state
        .queues
        .get_mut(endpoint)
        .ok_or_else(|| QueueError::QueueNotFound {
            queue_name: endpoint.to_string(),
        })
}

#[async_trait]
impl QueueService for InMemoryQueueService {
    async fn lookup_queue(&self, name: &QueueName) -> Result<Lookup, QueueError> {
        let state = self.begin(ServiceCall::LookupQueue)?;
        let endpoint = self.endpoint_for(name);

        if state.queues.contains_key(&endpoint) {
            Ok(Lookup::Found(endpoint))
        } else {
            Ok(Lookup::NotFound)
        }
    }

    async fn create_queue(
        &self,
        name: &QueueName,
        options: &CreateQueueOptions,
    ) -> Result<QueueEndpoint, QueueError> {
        let mut state = self.begin(ServiceCall::CreateQueue)?;
        let endpoint = self.endpoint_for(name);

        if options.fifo != name.is_fifo() {
            return Err(QueueError::Service {
                code: "InvalidParameterValue".to_string(),
                message: "FIFO queues must have a name ending in .fifo".to_string(),
            });
        }

        match state.queues.get(&endpoint) {
            // Creating an identical queue is idempotent
            Some(existing) if existing.options == *options => Ok(endpoint),
            Some(_) => Err(QueueError::Conflict {
                queue_name: name.to_string(),
                message: "A queue already exists with the same name and a different value for attribute(s)".to_string(),
            }),
            None => {
                state
                    .queues
                    .insert(endpoint.clone(), InMemoryQueue::new(options.clone()));
                Ok(endpoint)
            }
        }
    }

    async fn send(
        &self,
        endpoint: &QueueEndpoint,
        request: &SendRequest,
    ) -> Result<SendResult, QueueError> {
        let mut state = self.begin(ServiceCall::Send)?;
        self.validate_body(request).map_err(Rejection::into_error)?;

        let queue = queue_mut(&mut state, endpoint)?;
        queue
            .accept(request, Instant::now())
            .map_err(Rejection::into_error)
    }

    async fn send_batch(
        &self,
        endpoint: &QueueEndpoint,
        entries: &[SendBatchEntry],
    ) -> Result<BatchResult<SendResult>, QueueError> {
        let mut state = self.begin(ServiceCall::SendBatch)?;
        let queue = queue_mut(&mut state, endpoint)?;
        let now = Instant::now();

        let mut result = BatchResult::default();
        for entry in entries {
            let outcome = self
                .validate_body(&entry.request)
                .and_then(|_| queue.accept(&entry.request, now));

            match outcome {
                Ok(sent) => result.successful.push(BatchSuccess {
                    id: entry.id.clone(),
                    result: sent,
                }),
                Err(rejection) => result.failed.push(rejection.into_failure(&entry.id)),
            }
        }

        Ok(result)
    }

    async fn receive(
        &self,
        endpoint: &QueueEndpoint,
        request: &ReceiveRequest,
    ) -> Result<Vec<Message>, QueueError> {
        let deadline =
            Instant::now() + Duration::from_secs(u64::from(request.wait_time.unwrap_or(0)));
        let visibility = Duration::from_secs(u64::from(request.visibility_timeout));
        let max_messages = request.max_messages.max(1) as usize;
        let mut first_attempt = true;

        loop {
            {
                let mut state = if first_attempt {
                    self.begin(ServiceCall::Receive)?
                } else {
                    self.lock()?
                };
                first_attempt = false;

                let queue = queue_mut(&mut state, endpoint)?;
                let now = Instant::now();
                let messages = queue.take_visible(max_messages, visibility, now);

                if !messages.is_empty() || now >= deadline {
                    return Ok(messages);
                }
            }

            tokio::time::sleep(WAIT_POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())))
                .await;
        }
    }

    async fn delete(
        &self,
        endpoint: &QueueEndpoint,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        let mut state = self.begin(ServiceCall::Delete)?;
        let queue = queue_mut(&mut state, endpoint)?;

        if queue.remove_by_receipt(receipt_handle, Instant::now()) {
            Ok(())
        } else {
            Err(QueueError::MessageNotFound {
                receipt: receipt_handle.to_string(),
            })
        }
    }

    async fn delete_batch(
        &self,
        endpoint: &QueueEndpoint,
        entries: &[DeleteBatchEntry],
    ) -> Result<BatchResult<()>, QueueError> {
        let mut state = self.begin(ServiceCall::DeleteBatch)?;
        let queue = queue_mut(&mut state, endpoint)?;
        let now = Instant::now();

        let mut result = BatchResult::default();
        for entry in entries {
            if queue.remove_by_receipt(&entry.receipt_handle, now) {
                result.successful.push(BatchSuccess {
                    id: entry.id.clone(),
                    result: (),
                });
            } else {
                result.failed.push(
                    Rejection::new(
                        "ReceiptHandleIsInvalid",
                        format!("The receipt handle '{}' is not valid.", entry.receipt_handle),
                    )
                    .into_failure(&entry.id),
                );
            }
        }

        Ok(result)
    }

    async fn purge(&self, endpoint: &QueueEndpoint) -> Result<(), QueueError> {
        let mut state = self.begin(ServiceCall::Purge)?;
        queue_mut(&mut state, endpoint)?.messages.clear();
        Ok(())
    }

    async fn delete_queue(&self, endpoint: &QueueEndpoint) -> Result<(), QueueError> {
        let mut state = self.begin(ServiceCall::DeleteQueue)?;
        state
            .queues
            .remove(endpoint)
            .map(|_| ())
            .ok_or_else(|| QueueError::QueueNotFound {
                queue_name: endpoint.to_string(),
            })
    }

    async fn get_attributes(
        &self,
        endpoint: &QueueEndpoint,
        names: &[QueueAttribute],
    ) -> Result<HashMap<QueueAttribute, String>, QueueError> {
        let mut state = self.begin(ServiceCall::GetAttributes)?;
        let queue = queue_mut(&mut state, endpoint)?;
        let now = Instant::now();

        Ok(names
            .iter()
            .map(|name| (*name, queue.count(*name, now).to_string()))
            .collect())
    }
}

impl std::fmt::Debug for InMemoryQueueService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryQueueService")
            .field("config", &self.config)
            .finish()
    }
}
