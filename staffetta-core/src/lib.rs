//! Staffetta Core - Change-Feed Ingestion Pipeline
//!
//! This crate provides the core of the Staffetta connector: it streams
//! document-change events from a clustered database's change feed into an
//! ordered, partitioned message-queue topic, preserving per-partition
//! ordering with configurable consistency/latency trade-offs.
//!
//! # Key Components
//!
//! - **Events**: [`event`] defines the change-feed event model
//! - **Partition state**: [`partition`] tracks per-partition
//!   sequence/snapshot/checkpoint bookkeeping and the stream lifecycle
//! - **Flow control**: [`flow`] bounds in-flight bytes across partitions
//! - **Durability gate**: [`durability`] defers publication until changes
//!   are durably persisted at the source
//! - **Filtering & translation**: [`filter`] and [`handler`] are the
//!   pluggable predicate and record-conversion seams
//! - **Batching & publishing**: [`batch`] and [`publisher`] move records
//!   to the destination all-or-nothing
//! - **Checkpoints**: [`offset`] persists resume positions
//! - **Coordination**: [`coordinator`] wires it all together
//!
//! # Example
//!
//! ```rust
//! use staffetta_core::event::{DocumentEvent, EventType};
//!
//! fn describe(event: &DocumentEvent) -> String {
//!     match event.event_type {
//!         EventType::Mutation => format!("document {} changed", event.key),
//!         EventType::Deletion => format!("document {} deleted", event.key),
//!         EventType::Expiration => format!("document {} expired", event.key),
//!     }
//! }
//! ```

pub mod batch;
pub mod config;
pub mod coordinator;
pub mod durability;
pub mod event;
pub mod feed;
pub mod filter;
pub mod flow;
pub mod handler;
pub mod metrics;
pub mod offset;
pub mod partition;
pub mod publisher;
pub mod record;
