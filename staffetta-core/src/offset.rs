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

//! Checkpoint persistence contract.
//!
//! The [`OffsetStore`] trait abstracts where checkpoints live (memory,
//! Redis, the destination topic itself). Checkpoints are scoped by an
//! optional connector name so multiple independent connector instances
//! can stream the same source without clobbering each other's offsets.
//!
//! The store itself is a plain keyed map; the *monotonicity* rule (a
//! later checkpoint for a partition never has a smaller sequence number,
//! except immediately after a rollback) is enforced by the single writer
//! per partition (the coordinator's partition worker), not by the store.
//!
//! # Implementing a store
//!
//! ```rust
//! use staffetta_core::offset::{Checkpoint, OffsetStore, OffsetStoreError};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use tokio::sync::Mutex;
//!
//! #[derive(Default)]
//! struct MapStore {
//!     inner: Arc<Mutex<HashMap<(Option<String>, u16), Checkpoint>>>,
//! }
//!
//! #[async_trait::async_trait]
//! impl OffsetStore for MapStore {
//!     async fn load(
//!         &self,
//!         scope: Option<&str>,
//!         partition: u16,
//!     ) -> Result<Option<Checkpoint>, OffsetStoreError> {
//!         let key = (scope.map(String::from), partition);
//!         Ok(self.inner.lock().await.get(&key).cloned())
//!     }
//!
//!     async fn save(
//!         &self,
//!         scope: Option<&str>,
//!         checkpoint: &Checkpoint,
//!     ) -> Result<(), OffsetStoreError> {
//!         let key = (scope.map(String::from), checkpoint.partition);
//!         self.inner.lock().await.insert(key, checkpoint.clone());
//!         Ok(())
//!     }
//!
//!     async fn delete(
//!         &self,
//!         scope: Option<&str>,
//!         partition: u16,
//!     ) -> Result<(), OffsetStoreError> {
//!         let key = (scope.map(String::from), partition);
//!         self.inner.lock().await.remove(&key);
//!         Ok(())
//!     }
//!
//!     async fn list(
//!         &self,
//!         scope: Option<&str>,
//!     ) -> Result<HashMap<u16, Checkpoint>, OffsetStoreError> {
//!         let scope = scope.map(String::from);
//!         Ok(self
//!             .inner
//!             .lock()
//!             .await
//!             .iter()
//!             .filter(|((s, _), _)| *s == scope)
//!             .map(|((_, p), c)| (*p, c.clone()))
//!             .collect())
//!     }
//!
//!     async fn close(&self) -> Result<(), OffsetStoreError> {
//!         Ok(())
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Persisted resume position for one partition.
///
/// The sequence number is meaningful only under the recorded partition
/// UUID; a rollback changes the UUID and may legitimately regress the
/// sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Partition the checkpoint belongs to.
    pub partition: u16,

    /// Partition epoch the sequence number was recorded under.
    pub partition_uuid: u64,

    /// Last sequence number whose publication was acknowledged.
    pub seqno: u64,
}

/// Errors from checkpoint persistence backends.
#[derive(Debug, thiserror::Error)]
pub enum OffsetStoreError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Connection error
    #[error("connection error: {0}")]
    Connection(String),

    /// Other errors
    #[error("offset store error: {0}")]
    Other(String),
}

/// Persisted, connector-scoped checkpoint storage.
///
/// Implementations must persist durably enough to survive connector
/// restarts; exactly one live checkpoint exists per `(scope, partition)`
/// pair.
#[async_trait::async_trait]
pub trait OffsetStore: Send + Sync {
    /// Loads the checkpoint for a partition, or `None` if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn load(
        &self,
        scope: Option<&str>,
        partition: u16,
    ) -> Result<Option<Checkpoint>, OffsetStoreError>;

    /// Saves (overwrites) the checkpoint for `checkpoint.partition`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    async fn save(
        &self,
        scope: Option<&str>,
        checkpoint: &Checkpoint,
    ) -> Result<(), OffsetStoreError>;

    /// Deletes the checkpoint for a partition, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    async fn delete(&self, scope: Option<&str>, partition: u16) -> Result<(), OffsetStoreError>;

    /// Lists all checkpoints under a scope.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn list(&self, scope: Option<&str>) -> Result<HashMap<u16, Checkpoint>, OffsetStoreError>;

    /// Closes the store, releasing any resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be closed cleanly.
    async fn close(&self) -> Result<(), OffsetStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_serializes_compactly() {
        let checkpoint = Checkpoint {
            partition: 12,
            partition_uuid: 0xABCD,
            seqno: 42,
        };
        let json = serde_json::to_string(&checkpoint).unwrap();
        let back: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, checkpoint);
        assert!(json.contains("\"partition\":12"));
    }
}
