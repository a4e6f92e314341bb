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

//! Offset store implementations for the Staffetta connector.
//!
//! This crate provides backend implementations of the
//! [`OffsetStore`](staffetta_core::offset::OffsetStore) trait for
//! persisting per-partition checkpoints.
//!
//! # Available Stores
//!
//! - **Memory** ([`memory`]): in-process storage for testing and
//!   single-instance runs without external infrastructure
//! - **Redis** ([`redis`], `redis-store` feature): shared storage for
//!   distributed deployments
//!
//! # Feature Flags
//!
//! - `redis-store` (default): enables the Redis-backed store
//!
//! # Example
//!
//! ```rust
//! use staffetta_core::offset::{Checkpoint, OffsetStore};
//! use staffetta_stores::memory::MemoryOffsetStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryOffsetStore::new();
//! let checkpoint = Checkpoint {
//!     partition: 0,
//!     partition_uuid: 0xCAFE,
//!     seqno: 42,
//! };
//!
//! store.save(Some("my-connector"), &checkpoint).await?;
//! assert_eq!(store.load(Some("my-connector"), 0).await?, Some(checkpoint));
//! # Ok(())
//! # }
//! ```

pub mod memory;

#[cfg(feature = "redis-store")]
pub mod redis;
