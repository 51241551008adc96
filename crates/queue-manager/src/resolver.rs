//! Lazy queue endpoint resolution with create-on-missing semantics.

use crate::error::QueueError;
use crate::message::{QueueEndpoint, QueueName};
use crate::service::{CreateQueueOptions, Lookup, QueueService};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;

/// Resolves and caches the endpoint of a single named queue.
///
/// The first successful resolution is cached for the lifetime of the resolver.
/// Resolution and invalidation both take the write lock, so concurrent first
/// callers wait for one lookup instead of racing their own, and a queue delete
/// clears the cache before any other caller can observe the stale endpoint.
pub struct EndpointResolver {
    service: Arc<dyn QueueService>,
    name: QueueName,
    options: CreateQueueOptions,
    cached: RwLock<Option<QueueEndpoint>>,
}

impl EndpointResolver {
    pub fn new(service: Arc<dyn QueueService>, name: QueueName, options: CreateQueueOptions) -> Self {
        Self {
            service,
            name,
            options,
            cached: RwLock::new(None),
        }
    }

    pub fn queue_name(&self) -> &QueueName {
        &self.name
    }

    /// Options used when the queue has to be created
    pub fn create_options(&self) -> &CreateQueueOptions {
        &self.options
    }

    /// Currently cached endpoint, without contacting the service
    pub async fn cached(&self) -> Option<QueueEndpoint> {
        self.cached.read().await.clone()
    }

    /// Return the queue endpoint, looking it up or creating the queue on first use
    pub async fn resolve(&self) -> Result<QueueEndpoint, QueueError> {
        if let Some(endpoint) = self.cached.read().await.as_ref() {
            return Ok(endpoint.clone());
        }

        let mut cached = self.cached.write().await;
        // Another caller may have resolved while we waited for the lock
        if let Some(endpoint) = cached.as_ref() {
            return Ok(endpoint.clone());
        }

        let endpoint = self.lookup_or_create().await?;
        *cached = Some(endpoint.clone());
        Ok(endpoint)
    }

    /// Forget the cached endpoint so the next operation resolves again
    pub async fn invalidate(&self) {
        let mut cached = self.cached.write().await;
        if cached.take().is_some() {
            debug!(queue = %self.name, "Invalidated cached queue endpoint");
        }
    }

    /// Delete the queue and clear the cache under the same lock.
    ///
    /// A queue that was never resolved is looked up but not created.
    pub(crate) async fn delete_queue(&self) -> Result<(), QueueError> {
        let mut cached = self.cached.write().await;

        let endpoint = match cached.as_ref() {
            Some(endpoint) => endpoint.clone(),
            None => match self.service.lookup_queue(&self.name).await? {
                Lookup::Found(endpoint) => endpoint,
                Lookup::NotFound => {
                    return Err(QueueError::QueueNotFound {
                        queue_name: self.name.to_string(),
                    })
                }
            },
        };

        let result = self.service.delete_queue(&endpoint).await;
        // A queue the service no longer knows is as good as deleted for the cache
        if result.is_ok() || matches!(result, Err(QueueError::QueueNotFound { .. })) {
            *cached = None;
        }

        result?;
        info!(queue = %self.name, endpoint = %endpoint, "Deleted queue");
        Ok(())
    }

    async fn lookup_or_create(&self) -> Result<QueueEndpoint, QueueError> {
        match self.service.lookup_queue(&self.name).await? {
            Lookup::Found(endpoint) => {
                debug!(queue = %self.name, endpoint = %endpoint, "Resolved queue endpoint");
                Ok(endpoint)
            }
            Lookup::NotFound => {
                info!(
                    queue = %self.name,
                    visibility_timeout = self.options.visibility_timeout,
                    fifo = self.options.fifo,
                    "Queue does not exist, creating it"
                );
                match self.service.create_queue(&self.name, &self.options).await {
                    Ok(endpoint) => Ok(endpoint),
                    Err(QueueError::Conflict { message, .. }) => {
                        warn!(
                            queue = %self.name,
                            reason = %message,
                            "Queue was created concurrently, using the existing queue"
                        );
                        match self.service.lookup_queue(&self.name).await? {
                            Lookup::Found(endpoint) => Ok(endpoint),
                            Lookup::NotFound => Err(QueueError::QueueNotFound {
                                queue_name: self.name.to_string(),
                            }),
                        }
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }
}

impl std::fmt::Debug for EndpointResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointResolver")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish()
    }
}
