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

//! Event filtering.
//!
//! A [`Filter`] decides whether a change event is forwarded to the source
//! handler. Filters are pure, side-effect-free predicates: a rejected
//! event is counted and dropped, but still advances the partition's
//! progress and remains eligible for checkpointing; rejection must never
//! stall offset progress.
//!
//! Filters are selected by name through a [`FilterRegistry`], resolved
//! once at startup. Two built-ins are provided:
//!
//! - `"all-pass"`: [`AllPassFilter`], forwards everything (the default)
//! - `"only-mutations"`: [`OnlyMutationsFilter`], forwards mutations and
//!   drops deletions/expirations
//!
//! # Custom filters
//!
//! ```rust
//! use staffetta_core::event::DocumentEvent;
//! use staffetta_core::filter::{Filter, FilterRegistry};
//! use std::sync::Arc;
//!
//! struct PrefixFilter;
//!
//! impl Filter for PrefixFilter {
//!     fn pass(&self, event: &DocumentEvent) -> bool {
//!         event.key.starts_with("orders:")
//!     }
//! }
//!
//! let mut registry = FilterRegistry::with_defaults();
//! registry.register("orders-only", Arc::new(PrefixFilter));
//! assert!(registry.resolve("orders-only").is_some());
//! ```

use crate::event::DocumentEvent;
use std::collections::HashMap;
use std::sync::Arc;

/// Pure predicate over a change event.
pub trait Filter: Send + Sync {
    /// Returns true if the event should be forwarded to the source
    /// handler. Must be side-effect-free.
    fn pass(&self, event: &DocumentEvent) -> bool;
}

/// Forwards every event. The default filter.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllPassFilter;

impl Filter for AllPassFilter {
    fn pass(&self, _event: &DocumentEvent) -> bool {
        true
    }
}

/// Forwards mutations only; deletions and expirations are dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct OnlyMutationsFilter;

impl Filter for OnlyMutationsFilter {
    fn pass(&self, event: &DocumentEvent) -> bool {
        event.is_mutation()
    }
}

/// Maps configuration-provided names to filter instances.
///
/// Resolution happens once at connector startup, never per event.
#[derive(Default)]
pub struct FilterRegistry {
    filters: HashMap<String, Arc<dyn Filter>>,
}

impl FilterRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in filters registered.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(AllPassFilter::NAME, Arc::new(AllPassFilter));
        registry.register(OnlyMutationsFilter::NAME, Arc::new(OnlyMutationsFilter));
        registry
    }

    /// Registers a filter under a name, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, filter: Arc<dyn Filter>) {
        self.filters.insert(name.into(), filter);
    }

    /// Looks up a filter by name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Filter>> {
        self.filters.get(name).cloned()
    }

    /// Registered names, for error reporting.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.filters.keys().map(String::as_str).collect()
    }
}

impl AllPassFilter {
    /// Registry name of the built-in all-pass filter.
    pub const NAME: &'static str = "all-pass";
}

impl OnlyMutationsFilter {
    /// Registry name of the built-in mutations-only filter.
    pub const NAME: &'static str = "only-mutations";
}
