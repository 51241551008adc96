//! Client configuration and loading.

use crate::error::{ConfigurationError, QueueError};
use crate::message::{QueueName, MAX_BATCH_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default visibility timeout applied to every receive, in seconds
pub const DEFAULT_VISIBILITY_TIMEOUT: u32 = 60;

/// Longest visibility timeout the queue service accepts (12 hours)
pub const MAX_VISIBILITY_TIMEOUT: u32 = 43_200;

/// Longest long-poll wait the queue service accepts, in seconds
pub const MAX_WAIT_TIME: u32 = 20;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "QUEUE_MANAGER";

/// Delivery ordering mode of the managed queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    /// Best-effort ordering, at-least-once delivery
    #[default]
    Standard,
    /// Per-group ordering with deduplication
    Fifo,
}

/// Configuration for a single queue client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueManagerConfig {
    pub queue_name: String,
    /// Seconds a received message stays hidden from other receivers
    pub visibility_timeout: u32,
    pub queue_mode: QueueMode,
    /// Default `max_messages` for `receive_batch`
    pub receive_batch_size: u32,
    pub poller: PollerConfig,
    pub sqs: SqsConfig,
}

impl Default for QueueManagerConfig {
    fn default() -> Self {
        Self {
            queue_name: String::new(),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            queue_mode: QueueMode::Standard,
            receive_batch_size: MAX_BATCH_SIZE as u32,
            poller: PollerConfig::default(),
            sqs: SqsConfig::default(),
        }
    }
}

impl QueueManagerConfig {
    /// Configuration for `queue_name` with all other settings defaulted
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            ..Default::default()
        }
    }

    pub fn with_visibility_timeout(mut self, seconds: u32) -> Self {
        self.visibility_timeout = seconds;
        self
    }

    pub fn with_queue_mode(mut self, mode: QueueMode) -> Self {
        self.queue_mode = mode;
        self
    }

    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    /// Load configuration from an optional file, overlaid with
    /// `QUEUE_MANAGER__*` environment variables, and validate it
    pub fn load(path: Option<&Path>) -> Result<Self, QueueError> {
        let config = Self::from_sources(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read the file and environment layers without validating, so callers
    /// can apply further overrides first
    pub fn from_sources(path: Option<&Path>) -> Result<Self, QueueError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(ConfigurationError::from)?;

        let config = settings
            .try_deserialize()
            .map_err(ConfigurationError::from)?;
        Ok(config)
    }

    /// Check ranges and name/mode consistency, returning the validated name
    pub fn validate(&self) -> Result<QueueName, QueueError> {
        if self.queue_name.is_empty() {
            return Err(ConfigurationError::Missing {
                key: "queue_name".to_string(),
            }
            .into());
        }

        let name = QueueName::new(self.queue_name.clone())?;

        match (self.queue_mode, name.is_fifo()) {
            (QueueMode::Fifo, false) => {
                return Err(invalid("fifo queues require a name ending in .fifo"))
            }
            (QueueMode::Standard, true) => {
                return Err(invalid("names ending in .fifo require queue_mode = fifo"))
            }
            _ => {}
        }

        if self.visibility_timeout > MAX_VISIBILITY_TIMEOUT {
            return Err(invalid(&format!(
                "visibility_timeout must be at most {} seconds",
                MAX_VISIBILITY_TIMEOUT
            )));
        }

        if self.receive_batch_size == 0 || self.receive_batch_size as usize > MAX_BATCH_SIZE {
            return Err(invalid(&format!(
                "receive_batch_size must be between 1 and {}",
                MAX_BATCH_SIZE
            )));
        }

        self.poller.validate()?;

        Ok(name)
    }
}

/// Settings for the long-poll loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Messages requested per receive (1-10)
    pub max_messages: u32,
    /// Long-poll wait in seconds; `None` uses the queue's own setting
    pub wait_time: Option<u32>,
    /// Leave processed messages in the queue instead of deleting them
    pub skip_delete: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_messages: MAX_BATCH_SIZE as u32,
            wait_time: None,
            skip_delete: false,
        }
    }
}

impl PollerConfig {
    pub fn with_max_messages(mut self, max_messages: u32) -> Self {
        self.max_messages = max_messages;
        self
    }

    pub fn with_wait_time(mut self, seconds: u32) -> Self {
        self.wait_time = Some(seconds);
        self
    }

    pub fn with_skip_delete(mut self, skip_delete: bool) -> Self {
        self.skip_delete = skip_delete;
        self
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.max_messages == 0 || self.max_messages as usize > MAX_BATCH_SIZE {
            return Err(invalid(&format!(
                "poller.max_messages must be between 1 and {}",
                MAX_BATCH_SIZE
            )));
        }

        if matches!(self.wait_time, Some(wait) if wait > MAX_WAIT_TIME) {
            return Err(invalid(&format!(
                "poller.wait_time must be at most {} seconds",
                MAX_WAIT_TIME
            )));
        }

        Ok(())
    }
}

/// AWS SQS connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqsConfig {
    /// Region override; the AWS default chain is used when absent
    pub region: Option<String>,
    /// Endpoint override, e.g. a LocalStack URL
    pub endpoint_url: Option<String>,
    /// Connection establishment timeout in seconds
    pub open_timeout: u64,
    /// Response read timeout in seconds
    pub read_timeout: u64,
}

impl Default for SqsConfig {
    fn default() -> Self {
        Self {
            region: None,
            endpoint_url: None,
            open_timeout: 3600,
            read_timeout: 3600,
        }
    }
}

fn invalid(message: &str) -> QueueError {
    ConfigurationError::Invalid {
        message: message.to_string(),
    }
    .into()
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
