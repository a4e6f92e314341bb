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

//! Source handlers: event-to-record translation.
//!
//! A [`SourceHandler`] converts one admitted, filtered change event into
//! zero or more [`SourceRecord`]s. Returning an empty Vec is legitimate;
//! a handler may drop an event after inspection, and the event still
//! advances the partition's checkpoint. A translation *error* is
//! different: it is retried up to the configured policy and, if it keeps
//! failing, fails the partition rather than silently skipping data.
//!
//! Handlers are selected by name through a [`HandlerRegistry`], resolved
//! once at startup. The built-in `"default"` handler
//! ([`DefaultSourceHandler`]) emits one record per event: the raw
//! document body keyed by document key, with deletions and expirations
//! becoming empty-payload tombstones.

use crate::event::DocumentEvent;
use crate::record::{RecordHeaders, SourceRecord};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by a source handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Translating an event failed. Carries the offending event's
    /// identity so the failure can be reported precisely.
    #[error("failed to translate event (partition {partition}, seqno {seqno}, key {key:?}): {message}")]
    Translation {
        /// Partition of the offending event.
        partition: u16,
        /// Sequence number of the offending event.
        seqno: u64,
        /// Document key of the offending event.
        key: String,
        /// Human-readable cause.
        message: String,
        /// Underlying error, when available.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl HandlerError {
    /// Creates a translation error for `event` with a message.
    #[must_use]
    pub fn translation(event: &DocumentEvent, message: impl Into<String>) -> Self {
        Self::Translation {
            partition: event.partition,
            seqno: event.seqno,
            key: event.key.clone(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a translation error for `event` wrapping a source error.
    #[must_use]
    pub fn translation_source(
        event: &DocumentEvent,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Translation {
            partition: event.partition,
            seqno: event.seqno,
            key: event.key.clone(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }
}

/// Converts an admitted, filtered change event into outbound records.
///
/// Implementations must be deterministic for a given event, since a
/// failed publish may re-translate and re-publish the same event after a
/// restart.
pub trait SourceHandler: Send + Sync {
    /// Translates `event` into records destined for `topic`.
    fn translate(
        &self,
        event: &DocumentEvent,
        topic: &str,
    ) -> Result<Vec<SourceRecord>, HandlerError>;
}

/// The built-in handler: one record per event, raw body as payload.
///
/// Mutations carry the document body; deletions and expirations become
/// tombstones (empty payload). The record's partition key is the document
/// key, so the destination's per-key ordering matches per-document
/// ordering.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSourceHandler;

impl DefaultSourceHandler {
    /// Registry name of the built-in handler.
    pub const NAME: &'static str = "default";
}

impl SourceHandler for DefaultSourceHandler {
    fn translate(
        &self,
        event: &DocumentEvent,
        topic: &str,
    ) -> Result<Vec<SourceRecord>, HandlerError> {
        let headers = RecordHeaders {
            partition: event.partition,
            seqno: event.seqno,
            event_type: event.event_type,
        };
        let payload = event.content.clone().unwrap_or_else(Bytes::new);
        Ok(vec![SourceRecord::new(
            topic,
            event.key.clone(),
            headers,
            payload,
        )])
    }
}

/// Maps configuration-provided names to handler instances.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn SourceHandler>>,
}

impl HandlerRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in handler registered.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(DefaultSourceHandler::NAME, Arc::new(DefaultSourceHandler));
        registry
    }

    /// Registers a handler under a name, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn SourceHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Looks up a handler by name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn SourceHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Registered names, for error reporting.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventType, SnapshotWindow};

    fn event(event_type: EventType) -> DocumentEvent {
        DocumentEvent {
            partition: 2,
            partition_uuid: 1,
            seqno: 17,
            key: "user::42".to_string(),
            cas: 99,
            revision_seqno: 4,
            content: matches!(event_type, EventType::Mutation)
                .then(|| Bytes::from_static(b"{\"name\":\"x\"}")),
            xattrs: None,
            event_type,
            snapshot: SnapshotWindow { start: 10, end: 20 },
        }
    }

    #[test]
    fn default_handler_emits_one_record_with_headers() {
        let handler = DefaultSourceHandler;
        let records = handler.translate(&event(EventType::Mutation), "topic-a").unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.topic, "topic-a");
        assert_eq!(record.partition_key, "user::42");
        assert_eq!(record.headers.partition, 2);
        assert_eq!(record.headers.seqno, 17);
        assert_eq!(record.headers.event_type, EventType::Mutation);
        assert_eq!(record.payload.as_ref(), b"{\"name\":\"x\"}");
    }

    #[test]
    fn default_handler_emits_tombstone_for_deletion() {
        let handler = DefaultSourceHandler;
        let records = handler.translate(&event(EventType::Deletion), "topic-a").unwrap();

        assert_eq!(records.len(), 1);
        assert!(records[0].is_tombstone());
        assert_eq!(records[0].headers.event_type, EventType::Deletion);
    }

    #[test]
    fn registry_resolves_default() {
        let registry = HandlerRegistry::with_defaults();
        assert!(registry.resolve(DefaultSourceHandler::NAME).is_some());
        assert!(registry.resolve("missing").is_none());
    }

    #[test]
    fn translation_error_reports_event_identity() {
        let err = HandlerError::translation(&event(EventType::Mutation), "bad payload");
        let text = err.to_string();
        assert!(text.contains("partition 2"));
        assert!(text.contains("seqno 17"));
        assert!(text.contains("user::42"));
    }
}
