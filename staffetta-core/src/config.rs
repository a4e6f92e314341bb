// Copyright 2025 Staffetta Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Connector configuration consumed by the core.
//!
//! Parsing and validation of external configuration formats happens
//! outside the core; what arrives here is an already-typed
//! [`ConnectorConfig`], constructed through the builder.
//!
//! # Example
//!
//! ```rust
//! use staffetta_core::config::{ConnectorConfig, StreamFrom};
//! use std::time::Duration;
//!
//! let config = ConnectorConfig::builder()
//!     .connector_name("orders-connector")
//!     .topic("orders")
//!     .partitions(vec![0, 1, 2, 3])
//!     .stream_from(StreamFrom::SavedOffsetOrBeginning)
//!     .batch_size_max(2000)
//!     .flow_control_buffer(128 * 1024 * 1024)
//!     .persistence_polling_interval(Duration::from_millis(100))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.offset_scope(), Some("orders-connector"));
//! ```

use crate::feed::StreamPosition;
use std::time::Duration;
use thiserror::Error;

/// Where in history the connector starts streaming when it has no other
/// instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamFrom {
    /// Resume from the saved checkpoint; start from the beginning of
    /// history when none exists. The default.
    #[default]
    SavedOffsetOrBeginning,

    /// Resume from the saved checkpoint; stream only new changes when
    /// none exists.
    SavedOffsetOrNow,

    /// Ignore saved checkpoints and stream from the beginning.
    Beginning,

    /// Ignore saved checkpoints and stream only new changes.
    Now,
}

impl StreamFrom {
    /// Whether saved checkpoints participate in choosing the start.
    #[must_use]
    pub const fn uses_saved_offset(self) -> bool {
        matches!(self, Self::SavedOffsetOrBeginning | Self::SavedOffsetOrNow)
    }

    /// Stream position when no saved checkpoint applies.
    #[must_use]
    pub const fn fallback_position(self) -> StreamPosition {
        match self {
            Self::SavedOffsetOrBeginning | Self::Beginning => StreamPosition::Beginning,
            Self::SavedOffsetOrNow | Self::Now => StreamPosition::Now,
        }
    }
}

/// Configuration errors from the builder.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was not set.
    #[error("{0} is required")]
    Missing(&'static str),

    /// A field value is out of range or inconsistent with another.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Typed configuration for one connector instance.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Name identifying this connector. Used to scope checkpoints when
    /// `connector_name_in_offsets` is set.
    pub connector_name: String,

    /// Destination topic records are published to.
    pub topic: String,

    /// Partitions assigned to this instance.
    pub partitions: Vec<u16>,

    /// Starting-position policy.
    pub stream_from: StreamFrom,

    /// Maximum records per published batch.
    pub batch_size_max: usize,

    /// Flow-control budget in bytes, shared by all partitions.
    pub flow_control_buffer: usize,

    /// How often to poll the cluster for durably-persisted sequence
    /// numbers. Zero disables the durability gate and publishes
    /// immediately on arrival.
    pub persistence_polling_interval: Duration,

    /// Scope checkpoints by connector name, allowing several independent
    /// connectors over the same source.
    pub connector_name_in_offsets: bool,

    /// Expose extended attributes to filters and source handlers.
    pub xattrs: bool,

    /// Registry name of the event filter.
    pub filter: String,

    /// Registry name of the source handler.
    pub source_handler: String,

    /// Interval of the coordinator-driven periodic flush.
    pub flush_interval: Duration,

    /// Retry attempts for publishes and translations before the
    /// partition is failed.
    pub max_retries: usize,

    /// Initial retry delay; doubles per attempt.
    pub retry_delay: Duration,

    /// Ceiling on the retry delay.
    pub max_retry_delay: Duration,

    /// Jitter factor applied to retry delays, in `[0.0, 1.0]`.
    pub retry_jitter: f64,

    /// How long shutdown waits for in-flight batches to drain before
    /// discarding them.
    pub shutdown_grace: Duration,
}

impl ConnectorConfig {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> ConnectorConfigBuilder {
        ConnectorConfigBuilder::default()
    }

    /// The scope under which this connector's checkpoints are stored.
    #[must_use]
    pub fn offset_scope(&self) -> Option<&str> {
        self.connector_name_in_offsets
            .then_some(self.connector_name.as_str())
    }

    /// Retry delay for the given 1-based attempt: exponential with
    /// jitter, capped at `max_retry_delay`.
    #[must_use]
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let base_ms = (self.retry_delay.as_millis() as u64)
            .saturating_mul(1_u64 << attempt.saturating_sub(1).min(32))
            .min(self.max_retry_delay.as_millis() as u64);

        if self.retry_jitter > 0.0 {
            let jitter_range = (base_ms as f64) * self.retry_jitter;
            let jitter = (rand::random::<f64>() * jitter_range) - (jitter_range / 2.0);
            Duration::from_millis(((base_ms as f64) + jitter).max(0.0) as u64)
        } else {
            Duration::from_millis(base_ms)
        }
    }
}

/// Builder for [`ConnectorConfig`].
#[derive(Debug, Default)]
pub struct ConnectorConfigBuilder {
    connector_name: Option<String>,
    topic: Option<String>,
    partitions: Vec<u16>,
    stream_from: StreamFrom,
    batch_size_max: usize,
    flow_control_buffer: usize,
    persistence_polling_interval: Option<Duration>,
    connector_name_in_offsets: Option<bool>,
    xattrs: bool,
    filter: Option<String>,
    source_handler: Option<String>,
    flush_interval: Duration,
    max_retries: Option<usize>,
    retry_delay: Duration,
    max_retry_delay: Duration,
    retry_jitter: Option<f64>,
    shutdown_grace: Duration,
}

impl ConnectorConfigBuilder {
    /// Sets the connector name.
    #[must_use]
    pub fn connector_name(mut self, name: impl Into<String>) -> Self {
        self.connector_name = Some(name.into());
        self
    }

    /// Sets the destination topic.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Sets the assigned partitions.
    #[must_use]
    pub fn partitions(mut self, partitions: Vec<u16>) -> Self {
        self.partitions = partitions;
        self
    }

    /// Sets the starting-position policy.
    #[must_use]
    pub fn stream_from(mut self, stream_from: StreamFrom) -> Self {
        self.stream_from = stream_from;
        self
    }

    /// Sets the maximum records per batch.
    #[must_use]
    pub fn batch_size_max(mut self, size: usize) -> Self {
        self.batch_size_max = size;
        self
    }

    /// Sets the flow-control budget in bytes.
    #[must_use]
    pub fn flow_control_buffer(mut self, bytes: usize) -> Self {
        self.flow_control_buffer = bytes;
        self
    }

    /// Sets the durability polling interval. Zero disables gating.
    #[must_use]
    pub fn persistence_polling_interval(mut self, interval: Duration) -> Self {
        self.persistence_polling_interval = Some(interval);
        self
    }

    /// Sets whether checkpoints are scoped by connector name.
    #[must_use]
    pub fn connector_name_in_offsets(mut self, enabled: bool) -> Self {
        self.connector_name_in_offsets = Some(enabled);
        self
    }

    /// Exposes extended attributes to filters and handlers.
    #[must_use]
    pub fn xattrs(mut self, enabled: bool) -> Self {
        self.xattrs = enabled;
        self
    }

    /// Sets the filter name.
    #[must_use]
    pub fn filter(mut self, name: impl Into<String>) -> Self {
        self.filter = Some(name.into());
        self
    }

    /// Sets the source-handler name.
    #[must_use]
    pub fn source_handler(mut self, name: impl Into<String>) -> Self {
        self.source_handler = Some(name.into());
        self
    }

    /// Sets the periodic flush interval.
    #[must_use]
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the retry attempt ceiling.
    #[must_use]
    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Sets the initial retry delay.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the retry delay ceiling.
    #[must_use]
    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    /// Sets the retry jitter factor (`0.0` to `1.0`).
    #[must_use]
    pub fn retry_jitter(mut self, jitter: f64) -> Self {
        self.retry_jitter = Some(jitter);
        self
    }

    /// Sets the shutdown grace period.
    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required field is missing or a
    /// value is out of range.
    pub fn build(self) -> Result<ConnectorConfig, ConfigError> {
        let connector_name = self.connector_name.ok_or(ConfigError::Missing("connector_name"))?;
        let topic = self.topic.ok_or(ConfigError::Missing("topic"))?;

        if self.partitions.is_empty() {
            return Err(ConfigError::Missing("partitions"));
        }

        let retry_jitter = self.retry_jitter.unwrap_or(0.1);
        if !(0.0..=1.0).contains(&retry_jitter) {
            return Err(ConfigError::Invalid(format!(
                "retry_jitter ({retry_jitter}) must be between 0.0 and 1.0"
            )));
        }

        let retry_delay = if self.retry_delay.is_zero() {
            Duration::from_millis(100)
        } else {
            self.retry_delay
        };
        let max_retry_delay = if self.max_retry_delay.is_zero() {
            Duration::from_secs(30)
        } else {
            self.max_retry_delay
        };
        if retry_delay > max_retry_delay {
            return Err(ConfigError::Invalid(format!(
                "retry_delay ({retry_delay:?}) must be <= max_retry_delay ({max_retry_delay:?})"
            )));
        }

        Ok(ConnectorConfig {
            connector_name,
            topic,
            partitions: self.partitions,
            stream_from: self.stream_from,
            batch_size_max: if self.batch_size_max > 0 {
                self.batch_size_max
            } else {
                2000
            },
            flow_control_buffer: if self.flow_control_buffer > 0 {
                self.flow_control_buffer
            } else {
                128 * 1024 * 1024
            },
            persistence_polling_interval: self
                .persistence_polling_interval
                .unwrap_or_else(|| Duration::from_millis(100)),
            connector_name_in_offsets: self.connector_name_in_offsets.unwrap_or(true),
            xattrs: self.xattrs,
            filter: self
                .filter
                .unwrap_or_else(|| crate::filter::AllPassFilter::NAME.to_string()),
            source_handler: self
                .source_handler
                .unwrap_or_else(|| crate::handler::DefaultSourceHandler::NAME.to_string()),
            flush_interval: if self.flush_interval.is_zero() {
                Duration::from_secs(1)
            } else {
                self.flush_interval
            },
            max_retries: self.max_retries.unwrap_or(3),
            retry_delay,
            max_retry_delay,
            retry_jitter,
            shutdown_grace: if self.shutdown_grace.is_zero() {
                Duration::from_secs(10)
            } else {
                self.shutdown_grace
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> ConnectorConfigBuilder {
        ConnectorConfig::builder()
            .connector_name("test")
            .topic("topic")
            .partitions(vec![0])
    }

    #[test]
    fn defaults_match_connector_conventions() {
        let config = minimal().build().unwrap();
        assert_eq!(config.batch_size_max, 2000);
        assert_eq!(config.flow_control_buffer, 128 * 1024 * 1024);
        assert_eq!(config.persistence_polling_interval, Duration::from_millis(100));
        assert!(config.connector_name_in_offsets);
        assert!(!config.xattrs);
        assert_eq!(config.stream_from, StreamFrom::SavedOffsetOrBeginning);
        assert_eq!(config.filter, "all-pass");
        assert_eq!(config.source_handler, "default");
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn required_fields_are_enforced() {
        let err = ConnectorConfig::builder().topic("t").partitions(vec![0]).build();
        assert!(matches!(err, Err(ConfigError::Missing("connector_name"))));

        let err = ConnectorConfig::builder()
            .connector_name("c")
            .partitions(vec![0])
            .build();
        assert!(matches!(err, Err(ConfigError::Missing("topic"))));

        let err = ConnectorConfig::builder().connector_name("c").topic("t").build();
        assert!(matches!(err, Err(ConfigError::Missing("partitions"))));
    }

    #[test]
    fn offset_scope_follows_flag() {
        let scoped = minimal().build().unwrap();
        assert_eq!(scoped.offset_scope(), Some("test"));

        let unscoped = minimal().connector_name_in_offsets(false).build().unwrap();
        assert_eq!(unscoped.offset_scope(), None);
    }

    #[test]
    fn invalid_jitter_rejected() {
        let err = minimal().retry_jitter(1.5).build();
        assert!(matches!(err, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn retry_delay_must_not_exceed_ceiling() {
        let err = minimal()
            .retry_delay(Duration::from_secs(60))
            .max_retry_delay(Duration::from_secs(30))
            .build();
        assert!(matches!(err, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = minimal()
            .retry_delay(Duration::from_millis(100))
            .max_retry_delay(Duration::from_millis(400))
            .retry_jitter(0.0)
            .build()
            .unwrap();

        assert_eq!(config.retry_backoff(1), Duration::from_millis(100));
        assert_eq!(config.retry_backoff(2), Duration::from_millis(200));
        assert_eq!(config.retry_backoff(3), Duration::from_millis(400));
        assert_eq!(config.retry_backoff(10), Duration::from_millis(400));
    }

    #[test]
    fn stream_from_policies() {
        assert!(StreamFrom::SavedOffsetOrBeginning.uses_saved_offset());
        assert!(StreamFrom::SavedOffsetOrNow.uses_saved_offset());
        assert!(!StreamFrom::Beginning.uses_saved_offset());
        assert!(!StreamFrom::Now.uses_saved_offset());

        assert_eq!(
            StreamFrom::SavedOffsetOrBeginning.fallback_position(),
            StreamPosition::Beginning
        );
        assert_eq!(StreamFrom::Now.fallback_position(), StreamPosition::Now);
    }
}
