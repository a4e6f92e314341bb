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

//! Durability-gated publication.
//!
//! When a source node fails over, changes that were not yet replicated
//! can be rolled back. Publishing such a change and then seeing it erased
//! would make the destination topic inconsistent with the source. The
//! [`DurabilityTracker`] closes that window: a polling task periodically
//! asks the cluster (via [`DurabilityQuery`]) for each partition's
//! highest durably-persisted sequence number and raises a per-partition
//! "safe to publish" ceiling; events above the ceiling are *held*, not
//! dropped, until durability catches up.
//!
//! Held events keep their flow-control credit, so sustained durability
//! lag turns into backpressure instead of unbounded memory growth.
//!
//! Setting the polling interval to zero disables the gate entirely:
//! events become eligible for publication on arrival, trading the
//! consistency guarantee for latency (and making the connector usable
//! against ephemeral buckets that never persist).
//!
//! Ceilings live behind [`tokio::sync::watch`] channels, so waiting is
//! cancellable and a rollback can preempt an in-flight ceiling update by
//! re-registering the partition, which resets its channel.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::time::interval;
use tracing::{debug, warn};

use crate::metrics;

/// Errors from durability tracking.
#[derive(Debug, Error)]
pub enum DurabilityError {
    /// Querying the persisted watermark failed. Transient: the poller
    /// logs it and retries on the next tick; the ceiling simply does not
    /// advance in the meantime.
    #[error("durability query failed for partition {partition}: {message}")]
    Query {
        /// Partition the query was for.
        partition: u16,
        /// Human-readable cause.
        message: String,
        /// Underlying error, when available.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The partition's ceiling channel was torn down while a caller was
    /// waiting on it (partition closed or rolled back).
    #[error("durability wait interrupted for partition {partition}")]
    Interrupted {
        /// Partition whose wait was interrupted.
        partition: u16,
    },
}

/// Reports the highest durably-persisted sequence number per partition.
///
/// Implementations wrap the cluster client's persistence observation API.
#[async_trait]
pub trait DurabilityQuery: Send + Sync {
    /// Highest sequence number confirmed durably persisted for
    /// `partition`.
    async fn persisted_seqno(&self, partition: u16) -> Result<u64, DurabilityError>;
}

/// Per-partition safe-to-publish ceilings plus the polling loop that
/// advances them.
#[derive(Debug)]
pub struct DurabilityTracker {
    poll_interval: Duration,
    ceilings: RwLock<HashMap<u16, watch::Sender<u64>>>,
}

impl DurabilityTracker {
    /// Creates a tracker. A zero `poll_interval` disables gating.
    #[must_use]
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            ceilings: RwLock::new(HashMap::new()),
        }
    }

    /// Whether the durability gate is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.poll_interval.is_zero()
    }

    /// Configured polling interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Registers a partition, returning a receiver for its ceiling.
    ///
    /// Re-registering resets the ceiling to zero and disconnects any
    /// previous channel. This is deliberate: a rollback preempts and
    /// invalidates in-flight durability state for the partition.
    pub async fn register(&self, partition: u16) -> watch::Receiver<u64> {
        let (tx, rx) = watch::channel(0);
        self.ceilings.write().await.insert(partition, tx);
        debug!(partition, "durability ceiling registered");
        rx
    }

    /// Removes a partition's ceiling on close.
    pub async fn deregister(&self, partition: u16) {
        self.ceilings.write().await.remove(&partition);
        debug!(partition, "durability ceiling deregistered");
    }

    /// Raises a partition's ceiling. Lowering is ignored; the ceiling is
    /// monotonic between registrations.
    pub async fn raise_ceiling(&self, partition: u16, seqno: u64) {
        if let Some(tx) = self.ceilings.read().await.get(&partition) {
            tx.send_if_modified(|current| {
                if seqno > *current {
                    *current = seqno;
                    true
                } else {
                    false
                }
            });
        }
    }

    /// Current ceiling for a partition, if registered.
    pub async fn ceiling(&self, partition: u16) -> Option<u64> {
        self.ceilings
            .read()
            .await
            .get(&partition)
            .map(|tx| *tx.borrow())
    }

    /// Suspends until the partition's ceiling reaches `seqno`.
    ///
    /// Immediate when gating is disabled. Cancellable; cancellation
    /// leaves the held event untouched.
    ///
    /// # Errors
    ///
    /// Returns [`DurabilityError::Interrupted`] if the ceiling channel is
    /// torn down while waiting.
    pub async fn wait_until_persisted(
        &self,
        partition: u16,
        ceiling: &mut watch::Receiver<u64>,
        seqno: u64,
    ) -> Result<(), DurabilityError> {
        if !self.is_enabled() {
            return Ok(());
        }
        ceiling
            .wait_for(|current| *current >= seqno)
            .await
            .map_err(|_| DurabilityError::Interrupted { partition })?;
        Ok(())
    }

    /// Polling loop: queries every registered partition's persisted
    /// watermark on each tick and raises its ceiling. Returns when the
    /// shutdown signal fires, or immediately when gating is disabled.
    pub async fn run_poller<Q: DurabilityQuery>(
        self: Arc<Self>,
        query: Arc<Q>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        if !self.is_enabled() {
            return;
        }

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        debug!(interval = ?self.poll_interval, "durability poller started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("durability poller stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_once(query.as_ref()).await;
                }
            }
        }
    }

    async fn poll_once<Q: DurabilityQuery + ?Sized>(&self, query: &Q) {
        let partitions: Vec<u16> = self.ceilings.read().await.keys().copied().collect();
        for partition in partitions {
            match query.persisted_seqno(partition).await {
                Ok(seqno) => self.raise_ceiling(partition, seqno).await,
                Err(e) => {
                    // Conservative: the ceiling stays put until the next tick.
                    metrics::increment_durability_poll_failures();
                    warn!(partition, error = %e, "durability poll failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    struct FixedQuery {
        seqno: AtomicU64,
    }

    #[async_trait]
    impl DurabilityQuery for FixedQuery {
        async fn persisted_seqno(&self, _partition: u16) -> Result<u64, DurabilityError> {
            Ok(self.seqno.load(Ordering::SeqCst))
        }
    }

    struct FailingQuery;

    #[async_trait]
    impl DurabilityQuery for FailingQuery {
        async fn persisted_seqno(&self, partition: u16) -> Result<u64, DurabilityError> {
            Err(DurabilityError::Query {
                partition,
                message: "node unreachable".to_string(),
                source: None,
            })
        }
    }

    #[tokio::test]
    async fn disabled_gate_is_immediate() {
        let tracker = DurabilityTracker::new(Duration::ZERO);
        assert!(!tracker.is_enabled());

        let mut ceiling = tracker.register(0).await;
        // Ceiling is still zero, but the wait returns immediately.
        tracker
            .wait_until_persisted(0, &mut ceiling, 1_000)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wait_holds_until_ceiling_rises() {
        let tracker = Arc::new(DurabilityTracker::new(Duration::from_millis(5)));
        let mut ceiling = tracker.register(3).await;

        let waiter = {
            let tracker = Arc::clone(&tracker);
            let mut ceiling = ceiling.clone();
            tokio::spawn(async move {
                tracker.wait_until_persisted(3, &mut ceiling, 10).await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        tracker.raise_ceiling(3, 9).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        tracker.raise_ceiling(3, 12).await;
        waiter.await.unwrap().unwrap();

        // And a wait below the ceiling is immediate.
        tracker
            .wait_until_persisted(3, &mut ceiling, 11)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ceiling_is_monotonic() {
        let tracker = DurabilityTracker::new(Duration::from_millis(5));
        tracker.register(1).await;

        tracker.raise_ceiling(1, 50).await;
        tracker.raise_ceiling(1, 40).await;
        assert_eq!(tracker.ceiling(1).await, Some(50));
    }

    #[tokio::test]
    async fn reregister_resets_ceiling() {
        let tracker = DurabilityTracker::new(Duration::from_millis(5));
        tracker.register(1).await;
        tracker.raise_ceiling(1, 50).await;

        tracker.register(1).await;
        assert_eq!(tracker.ceiling(1).await, Some(0));
    }

    #[tokio::test]
    async fn poller_raises_ceilings() {
        let tracker = Arc::new(DurabilityTracker::new(Duration::from_millis(5)));
        let query = Arc::new(FixedQuery {
            seqno: AtomicU64::new(7),
        });
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let mut ceiling = tracker.register(0).await;
        let poller = tokio::spawn(Arc::clone(&tracker).run_poller(query.clone(), shutdown_rx));

        ceiling.wait_for(|c| *c >= 7).await.unwrap();

        query.seqno.store(21, Ordering::SeqCst);
        ceiling.wait_for(|c| *c >= 21).await.unwrap();

        shutdown_tx.send(()).unwrap();
        poller.await.unwrap();
    }

    #[tokio::test]
    async fn poll_failure_leaves_ceiling_unchanged() {
        let tracker = Arc::new(DurabilityTracker::new(Duration::from_millis(5)));
        tracker.register(0).await;
        tracker.raise_ceiling(0, 4).await;

        tracker.poll_once(&FailingQuery).await;
        assert_eq!(tracker.ceiling(0).await, Some(4));
    }

    #[tokio::test]
    async fn deregister_interrupts_waiters() {
        let tracker = Arc::new(DurabilityTracker::new(Duration::from_millis(5)));
        let mut ceiling = tracker.register(2).await;

        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                tracker.wait_until_persisted(2, &mut ceiling, 100).await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        tracker.deregister(2).await;

        let result = waiter.await.unwrap();
        assert!(matches!(
            result,
            Err(DurabilityError::Interrupted { partition: 2 })
        ));
    }
}
