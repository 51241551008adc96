//! Long-poll message loop.
//!
//! [`QueuePoller`] repeatedly receives from the client's queue and hands each
//! message (or each batch) to a user handler. Messages whose handler succeeds
//! are deleted; a failing or panicking handler leaves its message in the queue
//! so it is redelivered once the visibility timeout lapses. Handler failures
//! never stop the loop. Receive errors and delete errors other than an expired
//! receipt do.
//!
//! Cancellation is cooperative: the token is checked between receives, so an
//! in-flight long poll always completes and its messages are processed first.

use crate::client::QueueClient;
use crate::config::PollerConfig;
use crate::error::QueueError;
use crate::message::{DeleteBatchEntry, DeleteOutcome, Message, MessageId, ReceiptHandle};
use async_trait::async_trait;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "poller_tests.rs"]
mod tests;

/// Processes one received message
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: &Message) -> anyhow::Result<()>;
}

/// Processes a whole received batch; the batch is deleted only if this succeeds
#[async_trait]
pub trait BatchHandler: Send + Sync + 'static {
    async fn handle_batch(&self, messages: &[Message]) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a [`MessageHandler`]
pub struct FnHandler<F>(F);

/// Wrap an async closure taking an owned [`Message`] as a [`MessageHandler`]
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        (self.0)(message.clone()).await
    }
}

/// A message whose handler failed; it stays in the queue for redelivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingFailure {
    pub message_id: MessageId,
    pub receipt_handle: ReceiptHandle,
    pub error: String,
}

/// Counters accumulated over one run of the loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Receive calls made, including empty ones
    pub receives: u64,
    pub received: u64,
    pub processed: u64,
    pub failed: u64,
    pub deleted: u64,
}

/// Long-poll loop over a [`QueueClient`]
pub struct QueuePoller {
    client: QueueClient,
    config: PollerConfig,
    failures: Option<mpsc::UnboundedSender<ProcessingFailure>>,
}

impl QueuePoller {
    pub fn new(client: QueueClient, config: PollerConfig) -> Self {
        Self {
            client,
            config,
            failures: None,
        }
    }

    pub fn with_config(mut self, config: PollerConfig) -> Self {
        self.config = config;
        self
    }

    /// Send every [`ProcessingFailure`] to `sender` in addition to logging it
    pub fn report_failures_to(mut self, sender: mpsc::UnboundedSender<ProcessingFailure>) -> Self {
        self.failures = Some(sender);
        self
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Receive the next batch using the poller's batch size and wait time.
    ///
    /// Messages are not deleted; an empty vector means the wait elapsed with
    /// nothing available.
    pub async fn next_batch(&self) -> Result<Vec<Message>, QueueError> {
        self.config.validate()?;
        let request = self
            .client
            .receive_request(self.config.max_messages, self.config.wait_time);
        self.client.receive_with(request).await
    }

    /// Run `handler` on every received message until `cancel` fires
    pub async fn run<H: MessageHandler>(
        &self,
        handler: H,
        cancel: CancellationToken,
    ) -> Result<PollSummary, QueueError> {
        let handler = Arc::new(handler);
        let mut summary = PollSummary::default();
        info!(queue = %self.client.queue_name(), "Starting poll loop");

        while !cancel.is_cancelled() {
            let messages = self.next_batch().await?;
            summary.receives += 1;
            if messages.is_empty() {
                // The receive wait already paced this iteration
                tokio::task::yield_now().await;
                continue;
            }
            summary.received += messages.len() as u64;

            for message in &messages {
                let outcome = {
                    let handler = Arc::clone(&handler);
                    let message = message.clone();
                    tokio::spawn(async move { handler.handle(&message).await }).await
                };

                match handler_error(outcome) {
                    None => {
                        summary.processed += 1;
                        if !self.config.skip_delete {
                            self.settle(message, &mut summary).await?;
                        }
                    }
                    Some(error) => {
                        summary.failed += 1;
                        self.report(message, error);
                    }
                }
            }
        }

        info!(
            queue = %self.client.queue_name(),
            processed = summary.processed,
            failed = summary.failed,
            "Poll loop stopped"
        );
        Ok(summary)
    }

    /// Run `handler` on every received batch until `cancel` fires.
    ///
    /// A successful batch is deleted with one batch request; a failed batch is
    /// left in the queue and each of its messages is reported.
    pub async fn run_batches<H: BatchHandler>(
        &self,
        handler: H,
        cancel: CancellationToken,
    ) -> Result<PollSummary, QueueError> {
        let handler = Arc::new(handler);
        let mut summary = PollSummary::default();
        info!(queue = %self.client.queue_name(), "Starting batch poll loop");

        while !cancel.is_cancelled() {
            let messages = self.next_batch().await?;
            summary.receives += 1;
            if messages.is_empty() {
                tokio::task::yield_now().await;
                continue;
            }
            summary.received += messages.len() as u64;

            let outcome = {
                let handler = Arc::clone(&handler);
                let batch = messages.clone();
                tokio::spawn(async move { handler.handle_batch(&batch).await }).await
            };

            match handler_error(outcome) {
                None => {
                    summary.processed += messages.len() as u64;
                    if !self.config.skip_delete {
                        self.settle_batch(&messages, &mut summary).await?;
                    }
                }
                Some(error) => {
                    summary.failed += messages.len() as u64;
                    for message in &messages {
                        self.report(message, error.clone());
                    }
                }
            }
        }

        info!(
            queue = %self.client.queue_name(),
            processed = summary.processed,
            failed = summary.failed,
            "Batch poll loop stopped"
        );
        Ok(summary)
    }

    /// Run the per-message loop on its own task.
    ///
    /// Processing failures go to the returned handle's channel, replacing any
    /// sender set with [`QueuePoller::report_failures_to`].
    pub fn spawn<H: MessageHandler>(mut self, handler: H) -> PollerHandle {
        let (sender, failures) = mpsc::unbounded_channel();
        self.failures = Some(sender);

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { self.run(handler, token).await });

        PollerHandle {
            cancel,
            failures,
            task,
        }
    }

    async fn settle(&self, message: &Message, summary: &mut PollSummary) -> Result<(), QueueError> {
        match self.client.delete(&message.receipt_handle).await? {
            DeleteOutcome::Deleted => summary.deleted += 1,
            DeleteOutcome::NotFound => warn!(
                queue = %self.client.queue_name(),
                message_id = %message.message_id,
                "Visibility timeout lapsed before delete, message may be redelivered"
            ),
        }
        Ok(())
    }

    async fn settle_batch(
        &self,
        messages: &[Message],
        summary: &mut PollSummary,
    ) -> Result<(), QueueError> {
        let entries: Vec<DeleteBatchEntry> = messages
            .iter()
            .enumerate()
            .map(|(index, message)| {
                DeleteBatchEntry::new(format!("msg-{}", index), message.receipt_handle.clone())
            })
            .collect();

        let result = self.client.delete_batch(&entries).await?;
        summary.deleted += result.successful.len() as u64;
        for failure in &result.failed {
            warn!(
                queue = %self.client.queue_name(),
                entry = %failure.id,
                code = %failure.code,
                "Batch delete entry failed, message may be redelivered"
            );
        }
        Ok(())
    }

    fn report(&self, message: &Message, error: String) {
        error!(
            queue = %self.client.queue_name(),
            message_id = %message.message_id,
            error = %error,
            "Message handler failed, leaving message for redelivery"
        );

        if let Some(sender) = &self.failures {
            let failure = ProcessingFailure {
                message_id: message.message_id.clone(),
                receipt_handle: message.receipt_handle.clone(),
                error,
            };
            if sender.send(failure).is_err() {
                debug!("Failure receiver dropped");
            }
        }
    }
}

impl std::fmt::Debug for QueuePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuePoller")
            .field("client", &self.client)
            .field("config", &self.config)
            .finish()
    }
}

/// Handle to a poll loop running on its own task
#[derive(Debug)]
pub struct PollerHandle {
    cancel: CancellationToken,
    failures: mpsc::UnboundedReceiver<ProcessingFailure>,
    task: JoinHandle<Result<PollSummary, QueueError>>,
}

impl PollerHandle {
    /// Ask the loop to stop after the current iteration
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Processing failures reported by the loop
    pub fn failures(&mut self) -> &mut mpsc::UnboundedReceiver<ProcessingFailure> {
        &mut self.failures
    }

    /// Wait for the loop to finish
    pub async fn join(self) -> Result<PollSummary, QueueError> {
        self.task.await.map_err(|e| QueueError::PollerTerminated {
            message: e.to_string(),
        })?
    }

    /// Cancel the loop and wait for it to finish
    pub async fn shutdown(self) -> Result<PollSummary, QueueError> {
        self.cancel();
        self.join().await
    }
}

/// Collapse a handler task outcome into an error description, if any
fn handler_error(outcome: Result<anyhow::Result<()>, JoinError>) -> Option<String> {
    match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{:#}", e)),
        Err(e) if e.is_panic() => Some(format!("handler panicked: {}", panic_message(e.into_panic()))),
        Err(e) => Some(e.to_string()),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
