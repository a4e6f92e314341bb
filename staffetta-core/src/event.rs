//! Change-Feed Event Representation
//!
//! This module defines the core event types used throughout the Staffetta
//! pipeline. Events represent document changes streamed from the source
//! database's change feed and flow from the feed through filtering,
//! translation, and batching toward the downstream publisher.
//!
//! # Examples
//!
//! ```rust
//! use staffetta_core::event::{DocumentEvent, EventType, SnapshotWindow};
//! use bytes::Bytes;
//!
//! let event = DocumentEvent {
//!     partition: 7,
//!     partition_uuid: 0xCAFE,
//!     seqno: 42,
//!     key: "airline_10".to_string(),
//!     cas: 1_700_000_000,
//!     revision_seqno: 3,
//!     content: Some(Bytes::from_static(b"{\"name\":\"40-Mile Air\"}")),
//!     xattrs: None,
//!     event_type: EventType::Mutation,
//!     snapshot: SnapshotWindow { start: 40, end: 50 },
//! };
//!
//! assert!(event.is_mutation());
//! assert!(event.snapshot.contains(event.seqno));
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Kind of document change carried by a [`DocumentEvent`].
///
/// The change feed reports three kinds of document-level changes. DDL-style
/// notifications (snapshot boundaries, rollbacks) are not events; they are
/// delivered as separate feed notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// A document was created or updated.
    Mutation,

    /// A document was explicitly deleted.
    Deletion,

    /// A document was removed because its TTL expired.
    Expiration,
}

impl EventType {
    /// Stable lowercase name, used for metric labels and record headers.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EventType::Mutation => "mutation",
            EventType::Deletion => "deletion",
            EventType::Expiration => "expiration",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `{start, end}` sequence-number range announced by the feed before the
/// changes within it are delivered.
///
/// The feed groups changes into snapshot windows; every change event carries
/// the window it belongs to, and its sequence number must lie within that
/// window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotWindow {
    /// First sequence number of the window (inclusive).
    pub start: u64,

    /// Last sequence number of the window (inclusive).
    pub end: u64,
}

impl SnapshotWindow {
    /// A degenerate single-point window, used when resuming at a known
    /// sequence number before the first real snapshot marker arrives.
    #[must_use]
    pub const fn at(seqno: u64) -> Self {
        Self {
            start: seqno,
            end: seqno,
        }
    }

    /// Returns true if `seqno` lies within this window.
    #[must_use]
    pub const fn contains(&self, seqno: u64) -> bool {
        self.start <= seqno && seqno <= self.end
    }
}

/// A single document change streamed from one partition of the source
/// database.
///
/// Immutable once constructed; owned by the pipeline stage currently
/// processing it and never retained past publish acknowledgment. All fields
/// are owned data so events can move freely between tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEvent {
    /// Partition (vbucket) the change belongs to.
    pub partition: u16,

    /// Partition epoch. Changes after a failover; sequence numbers are only
    /// comparable under the same UUID.
    pub partition_uuid: u64,

    /// Monotonically increasing per-partition change counter.
    pub seqno: u64,

    /// Document key.
    pub key: String,

    /// CAS / version token of the document at the time of the change.
    pub cas: u64,

    /// Per-document revision counter.
    pub revision_seqno: u64,

    /// Document body. `None` for deletions and expirations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Bytes>,

    /// Extended attributes, when the feed was asked to include them.
    /// Visibility to filters and handlers is gated by configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xattrs: Option<HashMap<String, Bytes>>,

    /// Kind of change.
    pub event_type: EventType,

    /// Snapshot window this event was delivered under.
    pub snapshot: SnapshotWindow,
}

impl DocumentEvent {
    /// Returns true if this is a mutation (document created or updated).
    #[inline]
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        self.event_type == EventType::Mutation
    }

    /// Returns true if this is an explicit deletion.
    #[inline]
    #[must_use]
    pub fn is_deletion(&self) -> bool {
        self.event_type == EventType::Deletion
    }

    /// Returns true if this is a TTL expiration.
    #[inline]
    #[must_use]
    pub fn is_expiration(&self) -> bool {
        self.event_type == EventType::Expiration
    }

    /// Returns true if the document body is present.
    #[inline]
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }

    /// Estimated encoded size in bytes, used for flow-control accounting.
    ///
    /// Counts the key, body, and extended attributes plus a fixed overhead
    /// for the bookkeeping fields. The estimate only needs to be stable and
    /// roughly proportional to the wire size.
    #[must_use]
    pub fn estimated_size_bytes(&self) -> usize {
        let mut size = std::mem::size_of::<Self>();
        size += self.key.len();
        if let Some(content) = &self.content {
            size += content.len();
        }
        if let Some(xattrs) = &self.xattrs {
            size += xattrs.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>();
        }
        size
    }

    /// Returns a copy of this event with extended attributes removed.
    ///
    /// Applied before filters and handlers when xattr visibility is
    /// disabled.
    #[must_use]
    pub fn without_xattrs(mut self) -> Self {
        self.xattrs = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mutation(seqno: u64) -> DocumentEvent {
        DocumentEvent {
            partition: 0,
            partition_uuid: 1,
            seqno,
            key: format!("doc-{seqno}"),
            cas: seqno * 10,
            revision_seqno: 1,
            content: Some(Bytes::from_static(b"{}")),
            xattrs: None,
            event_type: EventType::Mutation,
            snapshot: SnapshotWindow { start: 0, end: 100 },
        }
    }

    #[test]
    fn event_type_predicates() {
        let mut event = mutation(1);
        assert!(event.is_mutation());
        assert!(!event.is_deletion());

        event.event_type = EventType::Deletion;
        event.content = None;
        assert!(event.is_deletion());
        assert!(!event.has_content());

        event.event_type = EventType::Expiration;
        assert!(event.is_expiration());
    }

    #[test]
    fn snapshot_window_contains_bounds() {
        let window = SnapshotWindow { start: 5, end: 10 };
        assert!(window.contains(5));
        assert!(window.contains(10));
        assert!(!window.contains(4));
        assert!(!window.contains(11));

        let point = SnapshotWindow::at(7);
        assert!(point.contains(7));
        assert!(!point.contains(8));
    }

    #[test]
    fn size_estimate_counts_key_body_and_xattrs() {
        let bare = mutation(1);
        let base = bare.estimated_size_bytes();

        let mut with_xattrs = mutation(1);
        let mut xattrs = HashMap::new();
        xattrs.insert("meta".to_string(), Bytes::from_static(b"0123456789"));
        with_xattrs.xattrs = Some(xattrs);

        assert_eq!(with_xattrs.estimated_size_bytes(), base + "meta".len() + 10);
    }

    #[test]
    fn without_xattrs_strips_attributes() {
        let mut event = mutation(3);
        let mut xattrs = HashMap::new();
        xattrs.insert("sync".to_string(), Bytes::from_static(b"x"));
        event.xattrs = Some(xattrs);

        let stripped = event.without_xattrs();
        assert!(stripped.xattrs.is_none());
        assert_eq!(stripped.seqno, 3);
    }

    #[test]
    fn event_type_labels_are_stable() {
        assert_eq!(EventType::Mutation.as_str(), "mutation");
        assert_eq!(EventType::Deletion.as_str(), "deletion");
        assert_eq!(EventType::Expiration.as_str(), "expiration");
        assert_eq!(EventType::Mutation.to_string(), "mutation");
    }
}
