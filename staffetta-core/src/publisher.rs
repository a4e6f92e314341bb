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

//! Downstream publisher contract.
//!
//! A [`Publisher`] delivers batches of [`SourceRecord`]s to the
//! destination message queue. The core treats the publisher as an
//! external collaborator with one non-negotiable rule: a batch is
//! all-or-nothing. On success every record in the batch is confirmed
//! delivered in order; on failure *nothing* in the batch is confirmed,
//! and the coordinator will not advance the checkpoint past it.
//!
//! Error variants carry retryability so the coordinator can distinguish
//! transient broker trouble (retried with backoff) from permanent
//! rejections (which fail the partition).

use crate::record::SourceRecord;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;

/// Errors from the downstream publisher.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Broker/connection trouble. Retryable after backoff.
    #[error("publisher connection error: {message}")]
    Connection {
        /// Human-readable cause.
        message: String,
        /// Underlying error, when available.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The destination rejected the batch (schema, size, authorization).
    /// Not retryable; retrying the same batch cannot succeed.
    #[error("batch rejected by destination: {message}")]
    Rejected {
        /// Human-readable cause.
        message: String,
    },

    /// The destination is applying backpressure. Retryable, optionally
    /// after the suggested delay.
    #[error("publisher capacity exceeded: {message}")]
    Capacity {
        /// Human-readable cause.
        message: String,
        /// Suggested wait before retrying.
        retry_after: Option<std::time::Duration>,
    },

    /// Anything else, with explicit retryability.
    #[error("publish error: {message}")]
    Other {
        /// Human-readable cause.
        message: String,
        /// Whether retrying may succeed.
        retryable: bool,
    },
}

impl PublishError {
    /// Creates a connection error with a message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a non-retryable rejection.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Returns whether retrying this publish may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Capacity { .. } => true,
            Self::Rejected { .. } => false,
            Self::Other { retryable, .. } => *retryable,
        }
    }

    /// Suggested wait before retrying, if the destination provided one.
    #[must_use]
    pub const fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Self::Capacity { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Delivers record batches to the destination message queue.
///
/// Implementations are shared across all partition workers and must be
/// safe for concurrent `publish` calls; ordering is only required within
/// a single call's batch (the core never interleaves one partition's
/// records across concurrent batches).
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes a batch. Success confirms every record, in order;
    /// failure confirms none.
    async fn publish(&self, records: Vec<SourceRecord>) -> Result<(), PublishError>;

    /// Flushes any internal buffering. Default: no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if buffered records cannot be confirmed.
    async fn flush(&self) -> Result<(), PublishError> {
        Ok(())
    }

    /// Closes the publisher. Default: flush.
    ///
    /// # Errors
    ///
    /// Returns an error if the publisher cannot be closed cleanly.
    async fn close(&self) -> Result<(), PublishError> {
        self.flush().await
    }
}

/// An in-memory publisher for tests and examples.
///
/// Records every accepted batch and can inject a bounded number of
/// transient failures, or fail permanently, to exercise the retry paths.
#[derive(Debug, Default)]
pub struct MockPublisher {
    batches: Mutex<Vec<Vec<SourceRecord>>>,
    publish_calls: AtomicUsize,
    transient_failures: AtomicUsize,
    fail_permanently: bool,
}

impl MockPublisher {
    /// A publisher that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A publisher that fails the first `count` publish calls with a
    /// retryable error, then accepts.
    #[must_use]
    pub fn with_transient_failures(count: usize) -> Self {
        Self {
            transient_failures: AtomicUsize::new(count),
            ..Self::default()
        }
    }

    /// A publisher that rejects every batch with a non-retryable error.
    #[must_use]
    pub fn rejecting() -> Self {
        Self {
            fail_permanently: true,
            ..Self::default()
        }
    }

    /// All accepted batches, in acceptance order.
    #[must_use]
    pub fn batches(&self) -> Vec<Vec<SourceRecord>> {
        self.batches.lock().expect("batches lock poisoned").clone()
    }

    /// Accepted batches containing only records from `partition`.
    #[must_use]
    pub fn batches_for_partition(&self, partition: u16) -> Vec<Vec<SourceRecord>> {
        self.batches()
            .into_iter()
            .filter(|batch| batch.iter().all(|r| r.headers.partition == partition))
            .filter(|batch| !batch.is_empty())
            .collect()
    }

    /// Total accepted records.
    #[must_use]
    pub fn total_records(&self) -> usize {
        self.batches().iter().map(Vec::len).sum()
    }

    /// Number of `publish` calls, including failed ones.
    #[must_use]
    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, records: Vec<SourceRecord>) -> Result<(), PublishError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_permanently {
            return Err(PublishError::rejected("simulated permanent failure"));
        }

        let remaining = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if remaining {
            return Err(PublishError::connection("simulated transient failure"));
        }

        self.batches
            .lock()
            .expect("batches lock poisoned")
            .push(records);
        Ok(())
    }
}
