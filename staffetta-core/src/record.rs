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

//! Outbound record types.
//!
//! A [`SourceRecord`] is the result of translating one
//! [`DocumentEvent`](crate::event::DocumentEvent) for the downstream
//! message queue. A single change event may fan out to zero or more
//! records; each record carries the destination topic, the partitioning
//! key the destination uses for per-key ordering, header metadata
//! identifying the source change, and an opaque payload.

use crate::event::EventType;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Header metadata attached to every outbound record.
///
/// Identifies the source change so consumers can correlate records with
/// partitions and sequence numbers without parsing the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordHeaders {
    /// Source partition (vbucket) of the originating change.
    pub partition: u16,

    /// Sequence number of the originating change.
    pub seqno: u64,

    /// Kind of the originating change.
    pub event_type: EventType,
}

/// One record destined for the downstream message queue.
///
/// Deletions and expirations are conventionally represented as records
/// with an empty payload (tombstones); the destination's compaction relies
/// on the partition key for identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Destination topic.
    pub topic: String,

    /// Destination partitioning key. The destination provides per-key
    /// ordering, so records derived from the same document share a key.
    pub partition_key: String,

    /// Source-change metadata.
    pub headers: RecordHeaders,

    /// Opaque payload. Empty for tombstones.
    pub payload: Bytes,
}

impl SourceRecord {
    /// Creates a record.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        partition_key: impl Into<String>,
        headers: RecordHeaders,
        payload: Bytes,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition_key: partition_key.into(),
            headers,
            payload,
        }
    }

    /// Returns true if this record is a tombstone (empty payload).
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.payload.is_empty()
    }

    /// Estimated encoded size in bytes.
    #[must_use]
    pub fn estimated_size_bytes(&self) -> usize {
        self.topic.len() + self.partition_key.len() + self.payload.len() + 32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tombstone_detection() {
        let headers = RecordHeaders {
            partition: 3,
            seqno: 9,
            event_type: EventType::Deletion,
        };
        let record = SourceRecord::new("topic", "doc-9", headers, Bytes::new());
        assert!(record.is_tombstone());

        let record = SourceRecord::new(
            "topic",
            "doc-9",
            headers,
            Bytes::from_static(b"{\"a\":1}"),
        );
        assert!(!record.is_tombstone());
    }

    #[test]
    fn size_estimate_tracks_payload() {
        let headers = RecordHeaders {
            partition: 0,
            seqno: 1,
            event_type: EventType::Mutation,
        };
        let small = SourceRecord::new("t", "k", headers, Bytes::from_static(b"x"));
        let large = SourceRecord::new("t", "k", headers, Bytes::from(vec![0u8; 100]));
        assert_eq!(
            large.estimated_size_bytes() - small.estimated_size_bytes(),
            99
        );
    }
}
