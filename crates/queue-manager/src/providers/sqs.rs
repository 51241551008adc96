//! AWS SQS queue service.
//!
//! Wraps the official `aws-sdk-sqs` client. Credentials and region come from
//! the standard AWS provider chain unless overridden by [`SqsConfig`]. SDK
//! errors are folded into [`QueueError`] by error code, so callers never see
//! SDK types.

use crate::config::SqsConfig;
use crate::error::QueueError;
use crate::message::{
    BatchFailure, BatchResult, BatchSuccess, DeleteBatchEntry, Message, MessageAttributeValue,
    MessageId, QueueEndpoint, QueueName, ReceiptHandle, SendBatchEntry, SendRequest, SendResult,
};
use crate::service::{CreateQueueOptions, Lookup, QueueAttribute, QueueService, ReceiveRequest};
use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sqs::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::primitives::Blob;
use aws_sdk_sqs::types::{
    BatchResultErrorEntry, DeleteMessageBatchRequestEntry, MessageSystemAttributeName,
    QueueAttributeName, SendMessageBatchRequestEntry,
};
use aws_sdk_sqs::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

#[cfg(test)]
#[path = "sqs_tests.rs"]
mod tests;

const QUEUE_DOES_NOT_EXIST_CODES: &[&str] =
    &["AWS.SimpleQueueService.NonExistentQueue", "QueueDoesNotExist"];

const RECEIPT_INVALID_CODES: &[&str] = &[
    "ReceiptHandleIsInvalid",
    "InvalidIdFormat",
    "AWS.SimpleQueueService.MessageNotInflight",
    "MessageNotInflight",
];

/// Expired receipts come back as a generic parameter error naming the receipt handle
const EXPIRED_RECEIPT_CODE: &str = "InvalidParameterValue";

const QUEUE_EXISTS_CODES: &[&str] = &["QueueAlreadyExists", "QueueNameExists"];

const AUTHENTICATION_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "ExpiredToken",
    "IncompleteSignature",
    "InvalidClientTokenId",
    "InvalidSecurity",
    "MissingAuthenticationToken",
    "SignatureDoesNotMatch",
    "UnrecognizedClientException",
];

/// Queue service backed by AWS SQS
#[derive(Debug, Clone)]
pub struct SqsQueueService {
    client: Client,
}

impl SqsQueueService {
    /// Wrap an already configured SDK client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the AWS environment with the overrides in `config`
    pub async fn from_config(config: &SqsConfig) -> Self {
        let timeouts = TimeoutConfig::builder()
            .connect_timeout(Duration::from_secs(config.open_timeout))
            .read_timeout(Duration::from_secs(config.read_timeout))
            .build();

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).timeout_config(timeouts);
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint_url) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        let shared = loader.load().await;
        debug!(
            region = ?shared.region(),
            endpoint_url = ?config.endpoint_url,
            "Loaded AWS configuration for SQS"
        );
        Self::new(Client::new(&shared))
    }
}

#[async_trait]
impl QueueService for SqsQueueService {
    async fn lookup_queue(&self, name: &QueueName) -> Result<Lookup, QueueError> {
        let result = self
            .client
            .get_queue_url()
            .queue_name(name.as_str())
            .send()
            .await;

        match result {
            Ok(output) => {
                let url = output.queue_url().ok_or_else(|| missing_field("QueueUrl"))?;
                Ok(Lookup::Found(QueueEndpoint::new(url)))
            }
            Err(err) => match map_sdk_error(err, name.as_str()) {
                QueueError::QueueNotFound { .. } => Ok(Lookup::NotFound),
                other => Err(other),
            },
        }
    }

    async fn create_queue(
        &self,
        name: &QueueName,
        options: &CreateQueueOptions,
    ) -> Result<QueueEndpoint, QueueError> {
        let mut request = self
            .client
            .create_queue()
            .queue_name(name.as_str())
            .attributes(
                QueueAttributeName::VisibilityTimeout,
                options.visibility_timeout.to_string(),
            );
        if options.fifo {
            request = request.attributes(QueueAttributeName::FifoQueue, "true");
            if options.content_based_deduplication {
                request = request.attributes(QueueAttributeName::ContentBasedDeduplication, "true");
            }
        }

        let output = request
            .send()
            .await
            .map_err(|e| map_sdk_error(e, name.as_str()))?;
        let url = output.queue_url().ok_or_else(|| missing_field("QueueUrl"))?;
        Ok(QueueEndpoint::new(url))
    }

    async fn send(
        &self,
        endpoint: &QueueEndpoint,
        request: &SendRequest,
    ) -> Result<SendResult, QueueError> {
        let output = self
            .client
            .send_message()
            .queue_url(endpoint.as_str())
            .message_body(&request.body)
            .set_delay_seconds(request.delay_seconds.map(to_i32))
            .set_message_group_id(request.message_group_id.clone())
            .set_message_deduplication_id(request.deduplication_id.clone())
            .set_message_attributes(to_sqs_attributes(request)?)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, endpoint.as_str()))?;

        let message_id = output.message_id().ok_or_else(|| missing_field("MessageId"))?;
        Ok(SendResult {
            message_id: parse_message_id(message_id)?,
            sequence_number: output.sequence_number().map(str::to_string),
        })
    }

    async fn send_batch(
        &self,
        endpoint: &QueueEndpoint,
        entries: &[SendBatchEntry],
    ) -> Result<BatchResult<SendResult>, QueueError> {
        let sqs_entries = entries
            .iter()
            .map(|entry| {
                let request = &entry.request;
                SendMessageBatchRequestEntry::builder()
                    .id(&entry.id)
                    .message_body(&request.body)
                    .set_delay_seconds(request.delay_seconds.map(to_i32))
                    .set_message_group_id(request.message_group_id.clone())
                    .set_message_deduplication_id(request.deduplication_id.clone())
                    .set_message_attributes(to_sqs_attributes(request)?)
                    .build()
                    .map_err(|e| invalid_request(e.to_string()))
            })
            .collect::<Result<Vec<_>, QueueError>>()?;

        let output = self
            .client
            .send_message_batch()
            .queue_url(endpoint.as_str())
            .set_entries(Some(sqs_entries))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, endpoint.as_str()))?;

        let successful = output
            .successful()
            .iter()
            .map(|entry| {
                Ok(BatchSuccess {
                    id: entry.id().to_string(),
                    result: SendResult {
                        message_id: parse_message_id(entry.message_id())?,
                        sequence_number: entry.sequence_number().map(str::to_string),
                    },
                })
            })
            .collect::<Result<Vec<_>, QueueError>>()?;

        Ok(BatchResult {
            successful,
            failed: output.failed().iter().map(to_batch_failure).collect(),
        })
    }

    async fn receive(
        &self,
        endpoint: &QueueEndpoint,
        request: &ReceiveRequest,
    ) -> Result<Vec<Message>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(endpoint.as_str())
            .max_number_of_messages(to_i32(request.max_messages))
            .visibility_timeout(to_i32(request.visibility_timeout))
            .set_wait_time_seconds(request.wait_time.map(to_i32))
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|e| map_sdk_error(e, endpoint.as_str()))?;

        output.messages().iter().map(from_sqs_message).collect()
    }

    async fn delete(
        &self,
        endpoint: &QueueEndpoint,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(endpoint.as_str())
            .receipt_handle(receipt_handle.as_str())
            .send()
            .await
            .map_err(|e| map_sdk_error(e, receipt_handle.as_str()))?;
        Ok(())
    }

    async fn delete_batch(
        &self,
        endpoint: &QueueEndpoint,
        entries: &[DeleteBatchEntry],
    ) -> Result<BatchResult<()>, QueueError> {
        let sqs_entries = entries
            .iter()
            .map(|entry| {
                DeleteMessageBatchRequestEntry::builder()
                    .id(&entry.id)
                    .receipt_handle(entry.receipt_handle.as_str())
                    .build()
                    .map_err(|e| invalid_request(e.to_string()))
            })
            .collect::<Result<Vec<_>, QueueError>>()?;

        let output = self
            .client
            .delete_message_batch()
            .queue_url(endpoint.as_str())
            .set_entries(Some(sqs_entries))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, endpoint.as_str()))?;

        Ok(BatchResult {
            successful: output
                .successful()
                .iter()
                .map(|entry| BatchSuccess {
                    id: entry.id().to_string(),
                    result: (),
                })
                .collect(),
            failed: output.failed().iter().map(to_batch_failure).collect(),
        })
    }

    async fn purge(&self, endpoint: &QueueEndpoint) -> Result<(), QueueError> {
        self.client
            .purge_queue()
            .queue_url(endpoint.as_str())
            .send()
            .await
            .map_err(|e| map_sdk_error(e, endpoint.as_str()))?;
        Ok(())
    }

    async fn delete_queue(&self, endpoint: &QueueEndpoint) -> Result<(), QueueError> {
        self.client
            .delete_queue()
            .queue_url(endpoint.as_str())
            .send()
            .await
            .map_err(|e| map_sdk_error(e, endpoint.as_str()))?;
        Ok(())
    }

    async fn get_attributes(
        &self,
        endpoint: &QueueEndpoint,
        names: &[QueueAttribute],
    ) -> Result<HashMap<QueueAttribute, String>, QueueError> {
        let output = self
            .client
            .get_queue_attributes()
            .queue_url(endpoint.as_str())
            .set_attribute_names(Some(
                names.iter().map(|n| QueueAttributeName::from(n.as_str())).collect(),
            ))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, endpoint.as_str()))?;

        let Some(attributes) = output.attributes() else {
            return Ok(HashMap::new());
        };

        Ok(names
            .iter()
            .filter_map(|name| {
                attributes
                    .get(&QueueAttributeName::from(name.as_str()))
                    .map(|value| (*name, value.clone()))
            })
            .collect())
    }
}

// ============================================================================
// Error Mapping
// ============================================================================

/// Fold an SDK error into the client's error taxonomy.
///
/// `target` names the queue or receipt the request was about.
fn map_sdk_error<E>(err: SdkError<E>, target: &str) -> QueueError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    if let Some(service_error) = err.as_service_error() {
        let code = service_error.code().unwrap_or("Unknown");
        let message = service_error.message().unwrap_or_default();
        return classify_error_code(code, message, target);
    }

    // Dispatch, timeout and unparsable responses all mean the request did not complete
    QueueError::Transport {
        message: error_chain(&err),
    }
}

fn classify_error_code(code: &str, message: &str, target: &str) -> QueueError {
    if QUEUE_DOES_NOT_EXIST_CODES.contains(&code) {
        QueueError::QueueNotFound {
            queue_name: target.to_string(),
        }
    } else if RECEIPT_INVALID_CODES.contains(&code) || is_expired_receipt(code, message) {
        QueueError::MessageNotFound {
            receipt: target.to_string(),
        }
    } else if QUEUE_EXISTS_CODES.contains(&code) {
        QueueError::Conflict {
            queue_name: target.to_string(),
            message: message.to_string(),
        }
    } else if AUTHENTICATION_CODES.contains(&code) {
        QueueError::AuthenticationFailed {
            message: format!("{}: {}", code, message),
        }
    } else {
        QueueError::Service {
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

fn is_expired_receipt(code: &str, message: &str) -> bool {
    code == EXPIRED_RECEIPT_CODE && message.to_ascii_lowercase().contains("receipt handle")
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

fn missing_field(field: &str) -> QueueError {
    QueueError::Service {
        code: "InvalidResponse".to_string(),
        message: format!("response is missing {}", field),
    }
}

fn invalid_request(message: String) -> QueueError {
    QueueError::Service {
        code: "InvalidRequest".to_string(),
        message,
    }
}

// ============================================================================
// Conversions
// ============================================================================

/// Values are range-checked by the client before they get here
fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn parse_message_id(id: &str) -> Result<MessageId, QueueError> {
    id.parse().map_err(|_| missing_field("MessageId"))
}

fn to_batch_failure(entry: &BatchResultErrorEntry) -> BatchFailure {
    BatchFailure {
        id: entry.id().to_string(),
        code: entry.code().to_string(),
        message: entry.message().map(str::to_string),
        sender_fault: entry.sender_fault(),
    }
}

fn to_sqs_attributes(
    request: &SendRequest,
) -> Result<Option<HashMap<String, aws_sdk_sqs::types::MessageAttributeValue>>, QueueError> {
    if request.message_attributes.is_empty() {
        return Ok(None);
    }

    request
        .message_attributes
        .iter()
        .map(|(key, value)| Ok((key.clone(), to_sqs_attribute(key, value)?)))
        .collect::<Result<HashMap<_, _>, QueueError>>()
        .map(Some)
}

fn to_sqs_attribute(
    key: &str,
    value: &MessageAttributeValue,
) -> Result<aws_sdk_sqs::types::MessageAttributeValue, QueueError> {
    let builder = aws_sdk_sqs::types::MessageAttributeValue::builder().data_type(value.data_type());
    let builder = match value {
        MessageAttributeValue::String(s) | MessageAttributeValue::Number(s) => {
            builder.string_value(s)
        }
        MessageAttributeValue::Binary(bytes) => builder.binary_value(Blob::new(bytes.clone())),
    };

    builder.build().map_err(|_| {
        crate::error::SerializationError::InvalidAttribute {
            key: key.to_string(),
        }
        .into()
    })
}

fn from_sqs_attribute(value: &aws_sdk_sqs::types::MessageAttributeValue) -> MessageAttributeValue {
    let text = value.string_value().unwrap_or_default().to_string();
    // Custom types carry a suffix, e.g. "Number.float"
    match value.data_type().split('.').next() {
        Some("Number") => MessageAttributeValue::Number(text),
        Some("Binary") => MessageAttributeValue::Binary(
            value
                .binary_value()
                .map(|blob| blob.as_ref().to_vec())
                .unwrap_or_default(),
        ),
        _ => MessageAttributeValue::String(text),
    }
}

fn from_sqs_message(message: &aws_sdk_sqs::types::Message) -> Result<Message, QueueError> {
    let message_id = message.message_id().ok_or_else(|| missing_field("MessageId"))?;
    let receipt_handle = message
        .receipt_handle()
        .ok_or_else(|| missing_field("ReceiptHandle"))?;

    let attributes = message
        .attributes()
        .map(|attributes| {
            attributes
                .iter()
                .map(|(name, value)| (name.as_str().to_string(), value.clone()))
                .collect()
        })
        .unwrap_or_default();

    let message_attributes = message
        .message_attributes()
        .map(|attributes| {
            attributes
                .iter()
                .map(|(key, value)| (key.clone(), from_sqs_attribute(value)))
                .collect()
        })
        .unwrap_or_default();

    Ok(Message {
        message_id: parse_message_id(message_id)?,
        receipt_handle: ReceiptHandle::new(receipt_handle),
        body: message.body().unwrap_or_default().to_string(),
        attributes,
        message_attributes,
    })
}
