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

//! Credit-based flow control.
//!
//! A single [`FlowController`] per connector instance bounds the total
//! estimated byte volume of unacknowledged events across all partitions.
//! Admission takes credit; the credit travels with the event as a
//! [`FlowPermit`] and is returned when the permit is dropped: after the
//! downstream publisher acknowledges the batch, when a filter rejects the
//! event, when translation legitimately produces no records, or when a
//! rollback discards buffered events.
//!
//! The budget is a [`tokio::sync::Semaphore`], so concurrent admit and
//! release from many partition workers never contend on a lock held
//! across I/O, the count can never go negative, and a pending
//! [`admit`](FlowController::admit) is cancellable without losing the
//! event (cancellation simply never takes the credit).
//!
//! Backpressure into the upstream feed is indirect and loss-free: a
//! partition worker that is waiting for credit stops draining its bounded
//! notification channel, which suspends the feed's sender.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::metrics;

/// Errors from the flow controller.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The controller was shut down while a caller was waiting for
    /// credit. Only possible during connector teardown.
    #[error("flow controller is closed")]
    Closed,
}

/// Shared byte budget bounding in-flight event volume.
#[derive(Debug)]
pub struct FlowController {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
}

impl FlowController {
    /// Creates a controller with the given byte capacity.
    ///
    /// Capacities above `u32::MAX` are clamped; a multi-gigabyte
    /// flow-control buffer is outside the intended operating range
    /// anyway.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(u32::MAX as usize);
        Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configured capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently admitted and not yet released.
    #[must_use]
    pub fn in_flight_bytes(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Bytes of budget currently available.
    #[must_use]
    pub fn available_bytes(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Admission requests larger than the whole budget are clamped so a
    /// single oversized event cannot wedge the pipeline.
    fn clamp(&self, bytes: usize) -> u32 {
        bytes.min(self.capacity).max(1) as u32
    }

    /// Waits until `bytes` of credit are available and takes them.
    ///
    /// Cancellable: dropping the future before it resolves takes no
    /// credit.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Closed`] if the controller was shut down.
    pub async fn admit(&self, bytes: usize) -> Result<FlowPermit, FlowError> {
        let permits = self.clamp(bytes);
        let permit = Arc::clone(&self.semaphore)
            .acquire_many_owned(permits)
            .await
            .map_err(|_| FlowError::Closed)?;
        Ok(self.charge(permit, permits as usize))
    }

    /// Takes `bytes` of credit if available right now.
    ///
    /// Returns `None` when the budget is exhausted; the caller defers
    /// admission without blocking other partitions.
    #[must_use]
    pub fn try_admit(&self, bytes: usize) -> Option<FlowPermit> {
        let permits = self.clamp(bytes);
        Arc::clone(&self.semaphore)
            .try_acquire_many_owned(permits)
            .ok()
            .map(|permit| self.charge(permit, permits as usize))
    }

    fn charge(&self, permit: OwnedSemaphorePermit, bytes: usize) -> FlowPermit {
        let in_flight = self.in_flight.fetch_add(bytes, Ordering::Relaxed) + bytes;
        metrics::set_flow_in_flight_bytes(in_flight);
        trace!(bytes, in_flight, "flow credit taken");
        FlowPermit {
            bytes,
            in_flight: Arc::clone(&self.in_flight),
            _permit: permit,
        }
    }
}

/// Credit taken for one admitted event. Dropping it returns the credit.
#[derive(Debug)]
pub struct FlowPermit {
    bytes: usize,
    in_flight: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl FlowPermit {
    /// Bytes of budget this permit holds.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for FlowPermit {
    fn drop(&mut self) {
        let in_flight = self
            .in_flight
            .fetch_sub(self.bytes, Ordering::Relaxed)
            .saturating_sub(self.bytes);
        metrics::set_flow_in_flight_bytes(in_flight);
        trace!(bytes = self.bytes, in_flight, "flow credit released");
    }
}
