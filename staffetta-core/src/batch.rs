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

//! Record batching.
//!
//! A [`Batcher`] accumulates translated records for **one** partition up
//! to a configured record-count ceiling. Batches are never mixed across
//! partitions, so publish order within a partition matches stream order
//! and the destination's per-key ordering holds.
//!
//! The batcher also tracks the highest *covered* sequence number: the
//! latest event accounted for, whether it produced records, was rejected
//! by the filter, or translated to nothing. When a batch is taken and its
//! publish is acknowledged, that covered sequence number becomes the
//! partition's checkpoint; a batch with no records but advanced coverage
//! checkpoints without publishing, which is how filtering avoids stalling
//! offset progress.
//!
//! Flow-control permits for the batched events ride along in the
//! [`PendingBatch`] and are released when it is acknowledged or
//! discarded.

use crate::flow::FlowPermit;
use crate::record::SourceRecord;

/// Accumulates one partition's records between flushes.
#[derive(Debug)]
pub struct Batcher {
    partition: u16,
    max_records: usize,
    records: Vec<SourceRecord>,
    permits: Vec<FlowPermit>,
    covered_seqno: Option<u64>,
}

impl Batcher {
    /// Creates a batcher for `partition` flushing at `max_records`.
    #[must_use]
    pub fn new(partition: u16, max_records: usize) -> Self {
        Self {
            partition,
            max_records,
            records: Vec::with_capacity(max_records.min(1024)),
            permits: Vec::new(),
            covered_seqno: None,
        }
    }

    /// Partition this batcher serves.
    #[must_use]
    pub fn partition(&self) -> u16 {
        self.partition
    }

    /// Number of records currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if no records are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True once the record count reached the ceiling. A single event's
    /// fan-out may overshoot the ceiling; the batch flushes right after.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.max_records
    }

    /// True if taking a batch now would do anything: records to publish
    /// or coverage to checkpoint.
    #[must_use]
    pub fn has_work(&self) -> bool {
        !self.records.is_empty() || self.covered_seqno.is_some()
    }

    /// Highest sequence number covered since the last take.
    #[must_use]
    pub fn covered_seqno(&self) -> Option<u64> {
        self.covered_seqno
    }

    /// Adds the records translated from the event at `seqno`, carrying
    /// its flow-control permit until acknowledgment.
    pub fn push(&mut self, records: Vec<SourceRecord>, seqno: u64, permit: FlowPermit) {
        debug_assert!(!records.is_empty(), "use note_progress for empty translations");
        self.records.extend(records);
        self.permits.push(permit);
        self.note_progress(seqno);
    }

    /// Records that the event at `seqno` was accounted for without
    /// producing records (filtered out, or translated to nothing).
    pub fn note_progress(&mut self, seqno: u64) {
        self.covered_seqno = Some(self.covered_seqno.map_or(seqno, |s| s.max(seqno)));
    }

    /// Drains the buffered records and coverage into a [`PendingBatch`].
    #[must_use]
    pub fn take(&mut self) -> PendingBatch {
        PendingBatch {
            partition: self.partition,
            records: std::mem::take(&mut self.records),
            permits: std::mem::take(&mut self.permits),
            covered_seqno: self.covered_seqno.take(),
        }
    }

    /// Drops buffered records, coverage, and permits without publishing.
    /// Used on rollback and on shutdown-grace expiry.
    pub fn discard(&mut self) {
        self.records.clear();
        self.permits.clear();
        self.covered_seqno = None;
    }
}

/// A batch drained from the [`Batcher`], awaiting publish acknowledgment.
#[derive(Debug)]
pub struct PendingBatch {
    partition: u16,
    /// Records to publish, in stream order. Empty batches carry only
    /// coverage.
    pub records: Vec<SourceRecord>,
    permits: Vec<FlowPermit>,
    covered_seqno: Option<u64>,
}

impl PendingBatch {
    /// Partition the batch belongs to.
    #[must_use]
    pub fn partition(&self) -> u16 {
        self.partition
    }

    /// Highest sequence number this batch accounts for.
    #[must_use]
    pub fn covered_seqno(&self) -> Option<u64> {
        self.covered_seqno
    }

    /// Consumes the batch after a confirmed publish, releasing its
    /// flow-control credit and yielding the checkpoint sequence number.
    #[must_use]
    pub fn ack(self) -> Option<u64> {
        // Dropping the permits returns the credit.
        self.covered_seqno
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use crate::flow::FlowController;
    use crate::record::RecordHeaders;
    use bytes::Bytes;

    fn record(seqno: u64) -> SourceRecord {
        SourceRecord::new(
            "topic",
            format!("doc-{seqno}"),
            RecordHeaders {
                partition: 0,
                seqno,
                event_type: EventType::Mutation,
            },
            Bytes::from_static(b"{}"),
        )
    }

    #[tokio::test]
    async fn fills_and_takes_in_order() {
        let flow = FlowController::new(1000);
        let mut batcher = Batcher::new(0, 3);

        for seqno in 1..=3 {
            let permit = flow.admit(10).await.unwrap();
            batcher.push(vec![record(seqno)], seqno, permit);
        }
        assert!(batcher.is_full());
        assert_eq!(flow.in_flight_bytes(), 30);

        let pending = batcher.take();
        assert!(batcher.is_empty());
        assert!(!batcher.has_work());
        assert_eq!(pending.covered_seqno(), Some(3));
        assert_eq!(
            pending.records.iter().map(|r| r.headers.seqno).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        assert_eq!(pending.ack(), Some(3));
        assert_eq!(flow.in_flight_bytes(), 0);
    }

    #[tokio::test]
    async fn progress_without_records_still_covers() {
        let mut batcher = Batcher::new(0, 3);
        batcher.note_progress(4);
        batcher.note_progress(7);

        assert!(batcher.is_empty());
        assert!(batcher.has_work());

        let pending = batcher.take();
        assert!(pending.records.is_empty());
        assert_eq!(pending.ack(), Some(7));
    }

    #[tokio::test]
    async fn fan_out_may_overshoot_ceiling() {
        let flow = FlowController::new(1000);
        let mut batcher = Batcher::new(0, 3);

        let permit = flow.admit(10).await.unwrap();
        batcher.push(vec![record(1), record(1), record(1), record(1)], 1, permit);
        assert!(batcher.is_full());
        assert_eq!(batcher.len(), 4);
    }

    #[tokio::test]
    async fn discard_releases_credit_without_coverage() {
        let flow = FlowController::new(1000);
        let mut batcher = Batcher::new(0, 10);

        let permit = flow.admit(25).await.unwrap();
        batcher.push(vec![record(1)], 1, permit);
        assert_eq!(flow.in_flight_bytes(), 25);

        batcher.discard();
        assert_eq!(flow.in_flight_bytes(), 0);
        assert!(!batcher.has_work());
        assert_eq!(batcher.covered_seqno(), None);
    }
}
