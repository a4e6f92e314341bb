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

//! Upstream change-feed contract.
//!
//! The pipeline core depends only on the notification contract defined
//! here, never on the feed's wire encoding. A [`ChangeFeed`]
//! implementation opens one notification stream per partition; the stream
//! delivers [`FeedNotification`]s over a *bounded* channel, and that bound
//! is the flow-control pause path: when a partition worker stops draining
//! its channel (because it is waiting for credit, for the durability
//! ceiling, or for a batch flush), the feed's sender suspends without
//! dropping anything. Pausing is therefore loss-free by construction.
//!
//! # Resumption contract
//!
//! `open_stream(partition, position)` must deliver changes *after*
//! `position`: for [`StreamPosition::At`] the first change has a sequence
//! number strictly greater than the given one; for
//! [`StreamPosition::Beginning`] the stream starts at the partition's
//! first retained change; for [`StreamPosition::Now`] only changes that
//! occur after the stream is opened are delivered.

use crate::event::{DocumentEvent, SnapshotWindow};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Where to begin a partition stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPosition {
    /// Stream from the beginning of retained history.
    Beginning,

    /// Stream only changes that occur from now on.
    Now,

    /// Resume after a known sequence number under a known partition epoch.
    At {
        /// Partition UUID the sequence number was recorded under.
        partition_uuid: u64,
        /// Last sequence number already processed; delivery starts after it.
        seqno: u64,
    },
}

/// One notification delivered by the feed for a single partition.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedNotification {
    /// Announces the `{start, end}` window of the changes that follow.
    Snapshot {
        /// Partition the window applies to.
        partition: u16,
        /// Announced window.
        window: SnapshotWindow,
    },

    /// A document change.
    Change(DocumentEvent),

    /// Instruction to rewind the partition to an earlier sequence number,
    /// typically after a node failover lost unreplicated data. The
    /// partition UUID changes; state recorded under the old UUID beyond
    /// the rollback point is void.
    Rollback {
        /// Partition to rewind.
        partition: u16,
        /// New partition epoch.
        partition_uuid: u64,
        /// Sequence number to rewind to.
        seqno: u64,
    },
}

impl FeedNotification {
    /// Partition this notification applies to.
    #[must_use]
    pub fn partition(&self) -> u16 {
        match self {
            FeedNotification::Snapshot { partition, .. }
            | FeedNotification::Rollback { partition, .. } => *partition,
            FeedNotification::Change(event) => event.partition,
        }
    }
}

/// Errors surfaced by a change-feed implementation.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Opening a partition stream failed.
    #[error("failed to open stream for partition {partition}: {message}")]
    StreamOpen {
        /// Partition the open was requested for.
        partition: u16,
        /// Human-readable cause.
        message: String,
        /// Underlying error, when available.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The feed has been shut down and cannot open new streams.
    #[error("change feed is closed")]
    Closed,
}

/// Supplies per-partition change/snapshot/rollback notifications.
///
/// Implementations wrap the actual change-feed client. The returned
/// receiver's channel must be bounded; see the module docs for why.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Opens (or re-opens, after a rollback) the notification stream for
    /// one partition, starting at `position`.
    async fn open_stream(
        &self,
        partition: u16,
        position: StreamPosition,
    ) -> Result<mpsc::Receiver<FeedNotification>, FeedError>;
}

/// Channel capacity used by [`ScriptedFeed`] streams. Deliberately small
/// so tests exercise the pause path.
const SCRIPTED_CHANNEL_CAPACITY: usize = 8;

/// A scripted in-memory feed for tests and examples.
///
/// Each call to [`open_stream`](ChangeFeed::open_stream) for a partition
/// pops the next script for that partition and replays it; when a script
/// is exhausted the stream ends. Rollback handling can be scripted by
/// queueing a second script containing the post-rollback notifications.
/// Every requested open position is recorded for assertions.
///
/// # Examples
///
/// ```rust
/// use staffetta_core::event::SnapshotWindow;
/// use staffetta_core::feed::{ChangeFeed, FeedNotification, ScriptedFeed, StreamPosition};
///
/// # async fn example() {
/// let feed = ScriptedFeed::new();
/// feed.push_script(
///     0,
///     vec![FeedNotification::Snapshot {
///         partition: 0,
///         window: SnapshotWindow { start: 1, end: 5 },
///     }],
/// );
///
/// let mut rx = feed.open_stream(0, StreamPosition::Beginning).await.unwrap();
/// assert!(rx.recv().await.is_some());
/// assert_eq!(feed.opened_positions(0), vec![StreamPosition::Beginning]);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ScriptedFeed {
    scripts: Mutex<HashMap<u16, VecDeque<Vec<FeedNotification>>>>,
    opened: Mutex<Vec<(u16, StreamPosition)>>,
}

impl ScriptedFeed {
    /// Creates an empty scripted feed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a script for a partition. Scripts are replayed in the order
    /// they were pushed, one per `open_stream` call.
    pub fn push_script(&self, partition: u16, notifications: Vec<FeedNotification>) {
        self.scripts
            .lock()
            .expect("scripts lock poisoned")
            .entry(partition)
            .or_default()
            .push_back(notifications);
    }

    /// All positions `open_stream` was called with for a partition, in
    /// call order.
    #[must_use]
    pub fn opened_positions(&self, partition: u16) -> Vec<StreamPosition> {
        self.opened
            .lock()
            .expect("opened lock poisoned")
            .iter()
            .filter(|(p, _)| *p == partition)
            .map(|(_, pos)| *pos)
            .collect()
    }

    /// Total number of `open_stream` calls across all partitions.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opened.lock().expect("opened lock poisoned").len()
    }
}

#[async_trait]
impl ChangeFeed for ScriptedFeed {
    async fn open_stream(
        &self,
        partition: u16,
        position: StreamPosition,
    ) -> Result<mpsc::Receiver<FeedNotification>, FeedError> {
        self.opened
            .lock()
            .expect("opened lock poisoned")
            .push((partition, position));

        let script = self
            .scripts
            .lock()
            .expect("scripts lock poisoned")
            .get_mut(&partition)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();

        debug!(partition, ?position, events = script.len(), "opening scripted stream");

        let (tx, rx) = mpsc::channel(SCRIPTED_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            for notification in script {
                if tx.send(notification).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventType, SnapshotWindow};
    use bytes::Bytes;

    fn change(partition: u16, seqno: u64) -> FeedNotification {
        FeedNotification::Change(DocumentEvent {
            partition,
            partition_uuid: 1,
            seqno,
            key: format!("doc-{seqno}"),
            cas: seqno,
            revision_seqno: 1,
            content: Some(Bytes::from_static(b"{}")),
            xattrs: None,
            event_type: EventType::Mutation,
            snapshot: SnapshotWindow { start: 1, end: 10 },
        })
    }

    #[tokio::test]
    async fn replays_scripts_in_order() {
        let feed = ScriptedFeed::new();
        feed.push_script(0, vec![change(0, 1), change(0, 2)]);
        feed.push_script(0, vec![change(0, 3)]);

        let mut rx = feed.open_stream(0, StreamPosition::Beginning).await.unwrap();
        assert_eq!(rx.recv().await, Some(change(0, 1)));
        assert_eq!(rx.recv().await, Some(change(0, 2)));
        assert_eq!(rx.recv().await, None);

        let mut rx = feed
            .open_stream(
                0,
                StreamPosition::At {
                    partition_uuid: 2,
                    seqno: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(change(0, 3)));
        assert_eq!(rx.recv().await, None);

        assert_eq!(feed.open_count(), 2);
        assert_eq!(
            feed.opened_positions(0),
            vec![
                StreamPosition::Beginning,
                StreamPosition::At {
                    partition_uuid: 2,
                    seqno: 2
                }
            ]
        );
    }

    #[tokio::test]
    async fn empty_script_yields_ended_stream() {
        let feed = ScriptedFeed::new();
        let mut rx = feed.open_stream(5, StreamPosition::Now).await.unwrap();
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn notification_partition_accessor() {
        assert_eq!(change(9, 1).partition(), 9);
        let rollback = FeedNotification::Rollback {
            partition: 4,
            partition_uuid: 2,
            seqno: 0,
        };
        assert_eq!(rollback.partition(), 4);
    }
}
