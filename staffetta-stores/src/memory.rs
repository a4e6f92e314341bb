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

//! In-memory offset store.
//!
//! A thread-safe, in-process implementation of the
//! [`OffsetStore`](staffetta_core::offset::OffsetStore) trait.
//!
//! # Use Cases
//!
//! - **Local development and testing**: no external dependencies
//! - **Single-instance runs**: where shared state isn't needed
//!
//! # Limitations
//!
//! Checkpoints do not survive a process restart, so every restart
//! replays from the configured starting position. For production
//! deployments use [`RedisOffsetStore`](crate::redis::RedisOffsetStore)
//! (or another durable backend) instead.

use staffetta_core::offset::{Checkpoint, OffsetStore, OffsetStoreError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace};

type Key = (Option<String>, u16);

/// In-memory checkpoint storage, keyed by `(scope, partition)`.
///
/// Cloning is cheap and clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryOffsetStore {
    checkpoints: Arc<RwLock<HashMap<Key, Checkpoint>>>,
}

impl MemoryOffsetStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        debug!("creating in-memory offset store");
        Self::default()
    }

    /// Number of checkpoints currently stored, across all scopes.
    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    /// True if no checkpoints are stored.
    pub async fn is_empty(&self) -> bool {
        self.checkpoints.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl OffsetStore for MemoryOffsetStore {
    async fn load(
        &self,
        scope: Option<&str>,
        partition: u16,
    ) -> Result<Option<Checkpoint>, OffsetStoreError> {
        let key = (scope.map(String::from), partition);
        let checkpoint = self.checkpoints.read().await.get(&key).cloned();
        trace!(?scope, partition, found = checkpoint.is_some(), "loaded checkpoint");
        Ok(checkpoint)
    }

    async fn save(
        &self,
        scope: Option<&str>,
        checkpoint: &Checkpoint,
    ) -> Result<(), OffsetStoreError> {
        let key = (scope.map(String::from), checkpoint.partition);
        trace!(?scope, partition = checkpoint.partition, seqno = checkpoint.seqno, "saving checkpoint");
        self.checkpoints.write().await.insert(key, checkpoint.clone());
        Ok(())
    }

    async fn delete(&self, scope: Option<&str>, partition: u16) -> Result<(), OffsetStoreError> {
        let key = (scope.map(String::from), partition);
        self.checkpoints.write().await.remove(&key);
        Ok(())
    }

    async fn list(
        &self,
        scope: Option<&str>,
    ) -> Result<HashMap<u16, Checkpoint>, OffsetStoreError> {
        let scope = scope.map(String::from);
        Ok(self
            .checkpoints
            .read()
            .await
            .iter()
            .filter(|((s, _), _)| *s == scope)
            .map(|((_, partition), checkpoint)| (*partition, checkpoint.clone()))
            .collect())
    }

    async fn close(&self) -> Result<(), OffsetStoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(partition: u16, seqno: u64) -> Checkpoint {
        Checkpoint {
            partition,
            partition_uuid: 1,
            seqno,
        }
    }

    #[tokio::test]
    async fn save_load_delete_roundtrip() {
        let store = MemoryOffsetStore::new();
        assert!(store.is_empty().await);

        store.save(None, &checkpoint(0, 10)).await.unwrap();
        assert_eq!(store.load(None, 0).await.unwrap(), Some(checkpoint(0, 10)));

        store.delete(None, 0).await.unwrap();
        assert_eq!(store.load(None, 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn scopes_are_isolated() {
        let store = MemoryOffsetStore::new();
        store.save(Some("a"), &checkpoint(0, 1)).await.unwrap();
        store.save(Some("b"), &checkpoint(0, 2)).await.unwrap();
        store.save(None, &checkpoint(0, 3)).await.unwrap();

        assert_eq!(store.load(Some("a"), 0).await.unwrap().unwrap().seqno, 1);
        assert_eq!(store.load(Some("b"), 0).await.unwrap().unwrap().seqno, 2);
        assert_eq!(store.load(None, 0).await.unwrap().unwrap().seqno, 3);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn list_filters_by_scope() {
        let store = MemoryOffsetStore::new();
        store.save(Some("a"), &checkpoint(0, 1)).await.unwrap();
        store.save(Some("a"), &checkpoint(1, 2)).await.unwrap();
        store.save(Some("b"), &checkpoint(2, 3)).await.unwrap();

        let listed = store.list(Some("a")).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[&0].seqno, 1);
        assert_eq!(listed[&1].seqno, 2);

        assert!(store.list(Some("missing")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_overwrites_and_allows_rollback_regression() {
        let store = MemoryOffsetStore::new();
        store.save(None, &checkpoint(0, 10)).await.unwrap();
        store.save(None, &checkpoint(0, 12)).await.unwrap();
        assert_eq!(store.load(None, 0).await.unwrap().unwrap().seqno, 12);

        // After a rollback the coordinator may legitimately write a
        // smaller sequence number; the store must not reject it.
        let rewound = Checkpoint {
            partition: 0,
            partition_uuid: 2,
            seqno: 5,
        };
        store.save(None, &rewound).await.unwrap();
        assert_eq!(store.load(None, 0).await.unwrap(), Some(rewound));
    }

    #[tokio::test]
    async fn clones_share_state() {
        let store = MemoryOffsetStore::new();
        let clone = store.clone();
        store.save(None, &checkpoint(7, 1)).await.unwrap();
        assert_eq!(clone.load(None, 7).await.unwrap(), Some(checkpoint(7, 1)));
    }
}
