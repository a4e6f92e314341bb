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

//! Per-partition stream state.
//!
//! A [`PartitionState`] tracks one partition assigned to this connector
//! instance: its current epoch (partition UUID), the last-seen sequence
//! number, the current snapshot window, the last checkpointed sequence
//! number, and the lifecycle status. All notification handling for a
//! partition goes through [`observe`](PartitionState::observe), and each
//! partition is owned by a single worker task, so state mutation is
//! serialized per partition without locks.
//!
//! # Invariants
//!
//! `checkpointed_seqno <= last_seen_seqno <= snapshot.end`. A change
//! whose sequence number regresses or falls outside the announced
//! snapshot window violates the feed's contract and is fatal for the
//! partition: it signals a bug or corruption upstream, never a condition
//! to paper over. A partition-UUID change (rollback) voids everything
//! recorded under the old UUID beyond the rollback point.
//!
//! # Lifecycle
//!
//! ```text
//! Unassigned -> Opening -> Streaming <-> RollbackPending
//!                              |
//!                           Closing -> Closed { failed }
//! ```

use crate::event::{DocumentEvent, SnapshotWindow};
use crate::feed::FeedNotification;
use crate::offset::Checkpoint;
use thiserror::Error;

/// Lifecycle status of a partition stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionStatus {
    /// Not yet assigned a stream.
    Unassigned,

    /// Start position requested; stream not yet delivering.
    Opening,

    /// Steady state: notifications flowing.
    Streaming,

    /// Rollback received; buffered events are being discarded and the
    /// stream re-requested from the rollback point.
    RollbackPending,

    /// Reassignment or shutdown: draining outstanding events.
    Closing,

    /// Terminal. `failed` is set when the partition was closed by a
    /// fatal fault rather than an orderly shutdown.
    Closed {
        /// True if closed due to a fatal error.
        failed: bool,
    },
}

/// What the coordinator should do with an observed notification.
#[derive(Debug, PartialEq)]
pub enum Admission {
    /// Forward this event into the pipeline.
    Deliver(DocumentEvent),

    /// Bookkeeping only; nothing to forward.
    Continue,

    /// Rollback: discard buffered events for this partition, rewrite the
    /// checkpoint to the target, and re-request the stream from there.
    Rewind {
        /// New partition epoch.
        partition_uuid: u64,
        /// Sequence number to resume from.
        seqno: u64,
    },
}

/// Protocol-consistency faults. Fatal for the affected partition.
#[derive(Debug, Error)]
pub enum PartitionError {
    /// A change's sequence number regressed below the last-seen one.
    #[error(
        "sequence regression on partition {partition}: seqno {seqno} after {last_seen} (uuid {partition_uuid:#x})"
    )]
    SequenceRegression {
        /// Affected partition.
        partition: u16,
        /// Partition epoch the fault occurred under.
        partition_uuid: u64,
        /// Offending sequence number.
        seqno: u64,
        /// Last sequence number seen before the fault.
        last_seen: u64,
    },

    /// A change's sequence number fell outside the announced snapshot
    /// window.
    #[error(
        "seqno {seqno} outside snapshot window [{window_start}, {window_end}] on partition {partition}"
    )]
    OutsideSnapshotWindow {
        /// Affected partition.
        partition: u16,
        /// Offending sequence number.
        seqno: u64,
        /// Current window start.
        window_start: u64,
        /// Current window end.
        window_end: u64,
    },

    /// A snapshot marker announced a window that is inconsistent with the
    /// stream so far.
    #[error(
        "invalid snapshot window [{window_start}, {window_end}] on partition {partition} (last seen {last_seen})"
    )]
    InvalidSnapshotWindow {
        /// Affected partition.
        partition: u16,
        /// Announced window start.
        window_start: u64,
        /// Announced window end.
        window_end: u64,
        /// Last sequence number seen.
        last_seen: u64,
    },

    /// A notification for a different partition reached this state. Only
    /// possible if stream wiring is broken.
    #[error("notification for partition {got} routed to partition {expected}")]
    WrongPartition {
        /// Partition this state tracks.
        expected: u16,
        /// Partition the notification was for.
        got: u16,
    },
}

/// Sequence/snapshot/checkpoint bookkeeping for one partition.
#[derive(Debug, Clone)]
pub struct PartitionState {
    partition: u16,
    partition_uuid: u64,
    last_seen_seqno: u64,
    snapshot: SnapshotWindow,
    checkpointed_seqno: u64,
    status: PartitionStatus,
}

impl PartitionState {
    /// Fresh state for a partition with no saved checkpoint.
    #[must_use]
    pub fn new(partition: u16) -> Self {
        Self {
            partition,
            partition_uuid: 0,
            last_seen_seqno: 0,
            snapshot: SnapshotWindow::at(0),
            checkpointed_seqno: 0,
            status: PartitionStatus::Unassigned,
        }
    }

    /// State resuming from a saved checkpoint.
    #[must_use]
    pub fn resume_from(checkpoint: &Checkpoint) -> Self {
        Self {
            partition: checkpoint.partition,
            partition_uuid: checkpoint.partition_uuid,
            last_seen_seqno: checkpoint.seqno,
            snapshot: SnapshotWindow::at(checkpoint.seqno),
            checkpointed_seqno: checkpoint.seqno,
            status: PartitionStatus::Unassigned,
        }
    }

    /// Partition id this state tracks.
    #[must_use]
    pub fn partition(&self) -> u16 {
        self.partition
    }

    /// Current partition epoch.
    #[must_use]
    pub fn partition_uuid(&self) -> u64 {
        self.partition_uuid
    }

    /// Last sequence number seen on the stream.
    #[must_use]
    pub fn last_seen_seqno(&self) -> u64 {
        self.last_seen_seqno
    }

    /// Last sequence number confirmed published and checkpointed.
    #[must_use]
    pub fn checkpointed_seqno(&self) -> u64 {
        self.checkpointed_seqno
    }

    /// Current snapshot window.
    #[must_use]
    pub fn snapshot(&self) -> SnapshotWindow {
        self.snapshot
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> PartitionStatus {
        self.status
    }

    /// Marks the stream-open request issued.
    pub fn mark_opening(&mut self) {
        self.status = PartitionStatus::Opening;
    }

    /// Marks the stream live (initial open or post-rollback resume).
    pub fn mark_streaming(&mut self) {
        self.status = PartitionStatus::Streaming;
    }

    /// Marks the partition draining for shutdown or reassignment.
    pub fn mark_closing(&mut self) {
        self.status = PartitionStatus::Closing;
    }

    /// Marks the partition terminal.
    pub fn mark_closed(&mut self, failed: bool) {
        self.status = PartitionStatus::Closed { failed };
    }

    /// Records a confirmed checkpoint at `seqno`.
    ///
    /// Called only after the publish covering `seqno` was acknowledged
    /// (or after a rollback rewind, where regression is expected).
    pub fn record_checkpoint(&mut self, seqno: u64) {
        self.checkpointed_seqno = seqno;
    }

    /// Applies one feed notification and decides what flows downstream.
    ///
    /// # Errors
    ///
    /// Returns a [`PartitionError`] on a protocol-consistency fault; the
    /// caller must treat it as fatal for this partition.
    pub fn observe(&mut self, notification: FeedNotification) -> Result<Admission, PartitionError> {
        if notification.partition() != self.partition {
            return Err(PartitionError::WrongPartition {
                expected: self.partition,
                got: notification.partition(),
            });
        }

        match notification {
            FeedNotification::Snapshot { window, .. } => {
                if window.start > window.end || window.end < self.last_seen_seqno {
                    return Err(PartitionError::InvalidSnapshotWindow {
                        partition: self.partition,
                        window_start: window.start,
                        window_end: window.end,
                        last_seen: self.last_seen_seqno,
                    });
                }
                self.snapshot = window;
                Ok(Admission::Continue)
            }

            FeedNotification::Change(event) => {
                if event.seqno < self.last_seen_seqno {
                    return Err(PartitionError::SequenceRegression {
                        partition: self.partition,
                        partition_uuid: self.partition_uuid,
                        seqno: event.seqno,
                        last_seen: self.last_seen_seqno,
                    });
                }
                if !self.snapshot.contains(event.seqno) {
                    return Err(PartitionError::OutsideSnapshotWindow {
                        partition: self.partition,
                        seqno: event.seqno,
                        window_start: self.snapshot.start,
                        window_end: self.snapshot.end,
                    });
                }
                self.last_seen_seqno = event.seqno;
                self.partition_uuid = event.partition_uuid;
                Ok(Admission::Deliver(event))
            }

            FeedNotification::Rollback {
                partition_uuid,
                seqno,
                ..
            } => {
                // Everything recorded under the old UUID past the target is void.
                self.partition_uuid = partition_uuid;
                self.last_seen_seqno = seqno;
                self.snapshot = SnapshotWindow::at(seqno);
                self.checkpointed_seqno = seqno;
                self.status = PartitionStatus::RollbackPending;
                Ok(Admission::Rewind {
                    partition_uuid,
                    seqno,
                })
            }
        }
    }

    /// Current position as a checkpoint, for persisting.
    #[must_use]
    pub fn checkpoint_at(&self, seqno: u64) -> Checkpoint {
        Checkpoint {
            partition: self.partition,
            partition_uuid: self.partition_uuid,
            seqno,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventType, SnapshotWindow};
    use bytes::Bytes;

    fn snapshot(partition: u16, start: u64, end: u64) -> FeedNotification {
        FeedNotification::Snapshot {
            partition,
            window: SnapshotWindow { start, end },
        }
    }

    fn change(partition: u16, uuid: u64, seqno: u64) -> FeedNotification {
        FeedNotification::Change(DocumentEvent {
            partition,
            partition_uuid: uuid,
            seqno,
            key: format!("doc-{seqno}"),
            cas: seqno,
            revision_seqno: 1,
            content: Some(Bytes::from_static(b"{}")),
            xattrs: None,
            event_type: EventType::Mutation,
            snapshot: SnapshotWindow { start: 0, end: u64::MAX },
        })
    }

    #[test]
    fn delivers_in_window_changes_and_tracks_progress() {
        let mut state = PartitionState::new(0);
        state.observe(snapshot(0, 1, 5)).unwrap();

        for seqno in 1..=5 {
            match state.observe(change(0, 7, seqno)).unwrap() {
                Admission::Deliver(event) => assert_eq!(event.seqno, seqno),
                other => panic!("expected Deliver, got {other:?}"),
            }
        }
        assert_eq!(state.last_seen_seqno(), 5);
        assert_eq!(state.partition_uuid(), 7);
    }

    #[test]
    fn sequence_regression_is_fatal() {
        let mut state = PartitionState::new(0);
        state.observe(snapshot(0, 1, 10)).unwrap();
        state.observe(change(0, 1, 5)).unwrap();

        let err = state.observe(change(0, 1, 4)).unwrap_err();
        assert!(matches!(
            err,
            PartitionError::SequenceRegression { seqno: 4, last_seen: 5, .. }
        ));
    }

    #[test]
    fn out_of_window_change_is_fatal() {
        let mut state = PartitionState::new(0);
        state.observe(snapshot(0, 1, 5)).unwrap();

        let err = state.observe(change(0, 1, 6)).unwrap_err();
        assert!(matches!(
            err,
            PartitionError::OutsideSnapshotWindow { seqno: 6, window_end: 5, .. }
        ));
    }

    #[test]
    fn snapshot_window_behind_progress_is_fatal() {
        let mut state = PartitionState::new(0);
        state.observe(snapshot(0, 1, 10)).unwrap();
        state.observe(change(0, 1, 8)).unwrap();

        let err = state.observe(snapshot(0, 2, 6)).unwrap_err();
        assert!(matches!(err, PartitionError::InvalidSnapshotWindow { .. }));

        let mut state = PartitionState::new(0);
        let err = state.observe(snapshot(0, 5, 3)).unwrap_err();
        assert!(matches!(err, PartitionError::InvalidSnapshotWindow { .. }));
    }

    #[test]
    fn rollback_rewinds_and_voids_old_epoch() {
        let mut state = PartitionState::new(0);
        state.observe(snapshot(0, 1, 10)).unwrap();
        state.observe(change(0, 1, 8)).unwrap();
        state.record_checkpoint(8);

        let admission = state
            .observe(FeedNotification::Rollback {
                partition: 0,
                partition_uuid: 2,
                seqno: 3,
            })
            .unwrap();

        assert_eq!(
            admission,
            Admission::Rewind {
                partition_uuid: 2,
                seqno: 3
            }
        );
        assert_eq!(state.status(), PartitionStatus::RollbackPending);
        assert_eq!(state.partition_uuid(), 2);
        assert_eq!(state.last_seen_seqno(), 3);
        assert_eq!(state.checkpointed_seqno(), 3);

        // Stream resumes: new snapshot and changes under the new epoch.
        state.mark_streaming();
        state.observe(snapshot(0, 4, 10)).unwrap();
        match state.observe(change(0, 2, 4)).unwrap() {
            Admission::Deliver(event) => assert_eq!(event.partition_uuid, 2),
            other => panic!("expected Deliver, got {other:?}"),
        }
    }

    #[test]
    fn resume_from_checkpoint_positions_state() {
        let checkpoint = Checkpoint {
            partition: 3,
            partition_uuid: 0xBEEF,
            seqno: 10,
        };
        let mut state = PartitionState::resume_from(&checkpoint);
        assert_eq!(state.partition(), 3);
        assert_eq!(state.last_seen_seqno(), 10);
        assert_eq!(state.checkpointed_seqno(), 10);

        // An event equal to the checkpoint seqno would regress nothing, but
        // the feed contract delivers strictly after the resume point.
        state.observe(snapshot(3, 11, 20)).unwrap();
        match state.observe(change(3, 0xBEEF, 11)).unwrap() {
            Admission::Deliver(event) => assert_eq!(event.seqno, 11),
            other => panic!("expected Deliver, got {other:?}"),
        }
    }

    #[test]
    fn wrong_partition_notification_is_rejected() {
        let mut state = PartitionState::new(1);
        let err = state.observe(change(2, 1, 1)).unwrap_err();
        assert!(matches!(
            err,
            PartitionError::WrongPartition { expected: 1, got: 2 }
        ));
    }

    #[test]
    fn lifecycle_transitions() {
        let mut state = PartitionState::new(0);
        assert_eq!(state.status(), PartitionStatus::Unassigned);
        state.mark_opening();
        assert_eq!(state.status(), PartitionStatus::Opening);
        state.mark_streaming();
        assert_eq!(state.status(), PartitionStatus::Streaming);
        state.mark_closing();
        assert_eq!(state.status(), PartitionStatus::Closing);
        state.mark_closed(false);
        assert_eq!(state.status(), PartitionStatus::Closed { failed: false });
    }

    #[test]
    fn checkpoint_at_uses_current_epoch() {
        let mut state = PartitionState::new(4);
        state.observe(snapshot(4, 1, 10)).unwrap();
        state.observe(change(4, 9, 2)).unwrap();

        let checkpoint = state.checkpoint_at(2);
        assert_eq!(checkpoint.partition, 4);
        assert_eq!(checkpoint.partition_uuid, 9);
        assert_eq!(checkpoint.seqno, 2);
    }
}
