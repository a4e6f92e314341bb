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

//! Stream coordination.
//!
//! The [`StreamCoordinator`] owns partition assignment and wires the
//! pipeline together: change feed → partition state → flow control →
//! durability gate → filter → source handler → batcher → publisher, with
//! checkpoint writes triggered by publish acknowledgment.
//!
//! One tokio task runs per assigned partition, so all state mutation for
//! a partition is serialized while partitions proceed in parallel; the
//! shared flow-control budget is the only cross-partition
//! synchronization point. A failure in one partition marks that
//! partition failed and never blocks the others.
//!
//! # Example
//!
//! ```rust,no_run
//! use staffetta_core::config::ConnectorConfig;
//! use staffetta_core::coordinator::StreamCoordinator;
//! use staffetta_core::durability::{DurabilityError, DurabilityQuery};
//! use staffetta_core::feed::ScriptedFeed;
//! use staffetta_core::filter::FilterRegistry;
//! use staffetta_core::handler::HandlerRegistry;
//! use staffetta_core::publisher::MockPublisher;
//! use std::sync::Arc;
//!
//! struct NoDurability;
//!
//! #[async_trait::async_trait]
//! impl DurabilityQuery for NoDurability {
//!     async fn persisted_seqno(&self, _partition: u16) -> Result<u64, DurabilityError> {
//!         Ok(u64::MAX)
//!     }
//! }
//!
//! # async fn example(offsets: Arc<impl staffetta_core::offset::OffsetStore + 'static>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConnectorConfig::builder()
//!     .connector_name("example")
//!     .topic("example-topic")
//!     .partitions(vec![0, 1])
//!     .build()?;
//!
//! let mut coordinator = StreamCoordinator::new(
//!     config,
//!     Arc::new(ScriptedFeed::new()),
//!     Arc::new(NoDurability),
//!     offsets,
//!     Arc::new(MockPublisher::new()),
//!     &FilterRegistry::with_defaults(),
//!     &HandlerRegistry::with_defaults(),
//! )?;
//!
//! coordinator.start().await?;
//! // ... run until shutdown ...
//! coordinator.stop().await?;
//! # Ok(())
//! # }
//! ```

use crate::batch::Batcher;
use crate::config::ConnectorConfig;
use crate::durability::{DurabilityError, DurabilityQuery, DurabilityTracker};
use crate::event::DocumentEvent;
use crate::feed::{ChangeFeed, FeedError, StreamPosition};
use crate::filter::{Filter, FilterRegistry};
use crate::flow::{FlowController, FlowError};
use crate::handler::{HandlerError, HandlerRegistry, SourceHandler};
use crate::metrics;
use crate::offset::{Checkpoint, OffsetStore, OffsetStoreError};
use crate::partition::{Admission, PartitionError, PartitionState};
use crate::publisher::{PublishError, Publisher};
use crate::record::SourceRecord;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Coordinator errors. Worker-local errors fail one partition; errors
/// from [`start`](StreamCoordinator::start) fail the whole connector.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The coordinator is already running.
    #[error("coordinator is already running")]
    AlreadyRunning,

    /// The configured filter name is not registered.
    #[error("unknown filter {0:?}")]
    UnknownFilter(String),

    /// The configured source-handler name is not registered.
    #[error("unknown source handler {0:?}")]
    UnknownHandler(String),

    /// Upstream feed error.
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// Checkpoint persistence error.
    #[error("offset store error: {0}")]
    OffsetStore(#[from] OffsetStoreError),

    /// Protocol-consistency fault.
    #[error("partition fault: {0}")]
    Partition(#[from] PartitionError),

    /// Translation failed past the retry policy.
    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),

    /// Publish failed past the retry policy.
    #[error("publish error: {0}")]
    Publish(#[from] PublishError),

    /// Durability wait was interrupted.
    #[error("durability error: {0}")]
    Durability(#[from] DurabilityError),

    /// Flow controller torn down mid-admission.
    #[error("flow control error: {0}")]
    Flow(#[from] FlowError),
}

/// Counters exposed by [`StreamCoordinator::stats`].
#[derive(Debug, Clone, Default)]
pub struct CoordinatorStats {
    /// Events admitted and processed (filtered events excluded).
    pub events_processed: u64,

    /// Events rejected by the filter.
    pub events_filtered: u64,

    /// Batches acknowledged by the publisher.
    pub batches_published: u64,

    /// Publish retry attempts.
    pub publish_retries: u64,

    /// Rollbacks handled.
    pub rollbacks: u64,

    /// Checkpoint writes.
    pub checkpoint_saves: u64,
}

type WorkerHandle = JoinHandle<Result<(), CoordinatorError>>;

/// Everything a partition worker needs, shared by `Arc`.
struct WorkerShared<F, S, P> {
    config: ConnectorConfig,
    feed: Arc<F>,
    offsets: Arc<S>,
    publisher: Arc<P>,
    durability: Arc<DurabilityTracker>,
    flow: Arc<FlowController>,
    filter: Arc<dyn Filter>,
    handler: Arc<dyn SourceHandler>,
    stats: Arc<RwLock<CoordinatorStats>>,
    failed: Arc<RwLock<HashMap<u16, String>>>,
}

/// Orchestrates per-partition streaming for one connector instance.
pub struct StreamCoordinator<F, Q, S, P> {
    shared: Arc<WorkerShared<F, S, P>>,
    durability_query: Arc<Q>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    workers: Vec<WorkerHandle>,
    poller: Option<JoinHandle<()>>,
    running: bool,
}

impl<F, Q, S, P> StreamCoordinator<F, Q, S, P>
where
    F: ChangeFeed + 'static,
    Q: DurabilityQuery + 'static,
    S: OffsetStore + 'static,
    P: Publisher + 'static,
{
    /// Creates a coordinator, resolving the configured filter and
    /// handler names.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownFilter`] /
    /// [`CoordinatorError::UnknownHandler`] when a configured name is
    /// not registered.
    pub fn new(
        config: ConnectorConfig,
        feed: Arc<F>,
        durability_query: Arc<Q>,
        offsets: Arc<S>,
        publisher: Arc<P>,
        filters: &FilterRegistry,
        handlers: &HandlerRegistry,
    ) -> Result<Self, CoordinatorError> {
        let filter = filters
            .resolve(&config.filter)
            .ok_or_else(|| CoordinatorError::UnknownFilter(config.filter.clone()))?;
        let handler = handlers
            .resolve(&config.source_handler)
            .ok_or_else(|| CoordinatorError::UnknownHandler(config.source_handler.clone()))?;

        info!(
            connector = %config.connector_name,
            topic = %config.topic,
            partitions = config.partitions.len(),
            batch_size_max = config.batch_size_max,
            flow_control_buffer = config.flow_control_buffer,
            durability_polling = ?config.persistence_polling_interval,
            "creating stream coordinator"
        );

        let durability = Arc::new(DurabilityTracker::new(config.persistence_polling_interval));
        let flow = Arc::new(FlowController::new(config.flow_control_buffer));

        Ok(Self {
            shared: Arc::new(WorkerShared {
                config,
                feed,
                offsets,
                publisher,
                durability,
                flow,
                filter,
                handler,
                stats: Arc::new(RwLock::new(CoordinatorStats::default())),
                failed: Arc::new(RwLock::new(HashMap::new())),
            }),
            durability_query,
            shutdown_tx: None,
            workers: Vec::new(),
            poller: None,
            running: false,
        })
    }

    /// Starts the durability poller and one worker per assigned
    /// partition.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::AlreadyRunning`] if called twice
    /// without an intervening [`stop`](Self::stop).
    #[instrument(skip(self), fields(connector = %self.shared.config.connector_name))]
    pub async fn start(&mut self) -> Result<(), CoordinatorError> {
        if self.running {
            return Err(CoordinatorError::AlreadyRunning);
        }

        info!("starting coordinator");
        let (shutdown_tx, _) = broadcast::channel(1);

        self.poller = Some(tokio::spawn(
            Arc::clone(&self.shared.durability)
                .run_poller(Arc::clone(&self.durability_query), shutdown_tx.subscribe()),
        ));

        for &partition in &self.shared.config.partitions {
            let shared = Arc::clone(&self.shared);
            let shutdown_rx = shutdown_tx.subscribe();
            self.workers.push(tokio::spawn(async move {
                Self::run_partition(shared, partition, shutdown_rx).await
            }));
        }

        metrics::set_active_partitions(self.workers.len());
        self.shutdown_tx = Some(shutdown_tx);
        self.running = true;
        info!(workers = self.workers.len(), "coordinator started");
        Ok(())
    }

    /// Stops the coordinator: signals all workers, drains in-flight
    /// batches within the shutdown grace period, persists the resulting
    /// checkpoints, and closes the publisher.
    ///
    /// # Errors
    ///
    /// Returns an error if the publisher cannot be closed cleanly.
    #[instrument(skip(self), fields(connector = %self.shared.config.connector_name))]
    pub async fn stop(&mut self) -> Result<(), CoordinatorError> {
        if !self.running {
            warn!("coordinator is not running");
            return Ok(());
        }

        info!("stopping coordinator");
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        for result in futures::future::join_all(self.workers.drain(..)).await {
            match result {
                Ok(Ok(())) => debug!("worker stopped"),
                Ok(Err(e)) => error!(error = %e, "worker stopped with error"),
                Err(e) => error!(error = %e, "worker panicked"),
            }
        }
        if let Some(poller) = self.poller.take() {
            let _ = poller.await;
        }

        self.shared.publisher.flush().await?;
        self.shared.publisher.close().await?;

        metrics::set_active_partitions(0);
        self.running = false;

        let stats = self.shared.stats.read().await;
        info!(
            events_processed = stats.events_processed,
            events_filtered = stats.events_filtered,
            batches_published = stats.batches_published,
            rollbacks = stats.rollbacks,
            "coordinator stopped"
        );
        Ok(())
    }

    /// Snapshot of the pipeline counters.
    pub async fn stats(&self) -> CoordinatorStats {
        self.shared.stats.read().await.clone()
    }

    /// Partitions that reached a fatal state, with the error that closed
    /// them. Failed partitions are excluded from further processing
    /// until the connector is restarted or the partition reassigned.
    pub async fn failed_partitions(&self) -> HashMap<u16, String> {
        self.shared.failed.read().await.clone()
    }

    /// Whether the coordinator is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Worker entry point: streams one partition, records failure state
    /// on fatal errors.
    async fn run_partition(
        shared: Arc<WorkerShared<F, S, P>>,
        partition: u16,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), CoordinatorError> {
        let result = Self::stream_partition(&shared, partition, &mut shutdown_rx).await;
        shared.durability.deregister(partition).await;

        if let Err(e) = &result {
            metrics::increment_events_failed(match e {
                CoordinatorError::Partition(_) => "protocol",
                CoordinatorError::Handler(_) => "translation",
                CoordinatorError::Publish(_) => "publish",
                _ => "other",
            });
            shared
                .failed
                .write()
                .await
                .insert(partition, e.to_string());
            error!(partition, error = %e, "partition failed");
        }
        result
    }

    /// The per-partition event loop.
    #[instrument(skip(shared, shutdown_rx), fields(partition = partition))]
    async fn stream_partition(
        shared: &Arc<WorkerShared<F, S, P>>,
        partition: u16,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<(), CoordinatorError> {
        let config = &shared.config;
        let scope = config.offset_scope();

        // Restart resumption: saved checkpoint first, configured policy
        // as the fallback.
        let saved = if config.stream_from.uses_saved_offset() {
            shared.offsets.load(scope, partition).await?
        } else {
            None
        };
        let (mut state, position) = match saved {
            Some(checkpoint) => {
                info!(
                    partition,
                    seqno = checkpoint.seqno,
                    partition_uuid = checkpoint.partition_uuid,
                    "resuming from saved checkpoint"
                );
                let position = StreamPosition::At {
                    partition_uuid: checkpoint.partition_uuid,
                    seqno: checkpoint.seqno,
                };
                (PartitionState::resume_from(&checkpoint), position)
            }
            None => (
                PartitionState::new(partition),
                config.stream_from.fallback_position(),
            ),
        };

        let result = Self::stream_loop(shared, partition, &mut state, position, shutdown_rx).await;
        if result.is_err() {
            // Terminal fault: straight to Closed with the error flag set.
            state.mark_closed(true);
        }
        result
    }

    /// Opens the stream and runs the notification loop until shutdown,
    /// stream end, or a fatal error.
    async fn stream_loop(
        shared: &Arc<WorkerShared<F, S, P>>,
        partition: u16,
        state: &mut PartitionState,
        position: StreamPosition,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<(), CoordinatorError> {
        let config = &shared.config;
        let scope = config.offset_scope();

        state.mark_opening();
        let mut notifications = shared.feed.open_stream(partition, position).await?;
        let mut ceiling = shared.durability.register(partition).await;
        state.mark_streaming();
        debug!(partition, ?position, "partition streaming");

        let mut batcher = Batcher::new(partition, config.batch_size_max);
        let mut flush_timer = interval(config.flush_interval);
        flush_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(partition, "shutdown requested");
                    state.mark_closing();
                    Self::drain(shared, &mut batcher, state).await;
                    state.mark_closed(false);
                    return Ok(());
                }

                _ = flush_timer.tick() => {
                    if batcher.has_work() {
                        Self::flush(shared, &mut batcher, state).await?;
                    }
                }

                maybe = notifications.recv() => {
                    let Some(notification) = maybe else {
                        debug!(partition, "feed stream ended");
                        state.mark_closing();
                        Self::drain(shared, &mut batcher, state).await;
                        state.mark_closed(false);
                        return Ok(());
                    };

                    match state.observe(notification)? {
                        Admission::Continue => {}

                        Admission::Rewind { partition_uuid, seqno } => {
                            warn!(partition, seqno, partition_uuid, "rollback: rewinding");
                            // Buffered events under the old epoch are void.
                            batcher.discard();
                            let checkpoint = Checkpoint { partition, partition_uuid, seqno };
                            shared.offsets.save(scope, &checkpoint).await?;
                            metrics::increment_checkpoint_saves();
                            metrics::increment_rollbacks();
                            {
                                let mut stats = shared.stats.write().await;
                                stats.rollbacks += 1;
                                stats.checkpoint_saves += 1;
                            }
                            // Rollback preempts any in-flight durability
                            // update for this partition.
                            ceiling = shared.durability.register(partition).await;
                            notifications = shared
                                .feed
                                .open_stream(partition, StreamPosition::At { partition_uuid, seqno })
                                .await?;
                            state.mark_streaming();
                        }

                        Admission::Deliver(event) => {
                            let done = Self::process_event(
                                shared,
                                &mut batcher,
                                &mut ceiling,
                                event,
                                shutdown_rx,
                            )
                            .await?;
                            if done {
                                state.mark_closing();
                                Self::drain(shared, &mut batcher, state).await;
                                state.mark_closed(false);
                                return Ok(());
                            }
                            if batcher.is_full() {
                                Self::flush(shared, &mut batcher, state).await?;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Runs one admitted event through credit admission, the durability
    /// gate, the filter, and translation. Returns `Ok(true)` when
    /// shutdown interrupted a wait and the worker should drain and exit.
    async fn process_event(
        shared: &Arc<WorkerShared<F, S, P>>,
        batcher: &mut Batcher,
        ceiling: &mut watch::Receiver<u64>,
        event: DocumentEvent,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<bool, CoordinatorError> {
        let config = &shared.config;
        let event = if config.xattrs {
            event
        } else {
            event.without_xattrs()
        };
        let partition = event.partition;
        let seqno = event.seqno;

        // Flow-control admission. Waiting here stops draining the feed
        // channel, which pauses delivery loss-free.
        let permit = tokio::select! {
            permit = shared.flow.admit(event.estimated_size_bytes()) => permit?,
            _ = shutdown_rx.recv() => {
                debug!(partition, seqno, "shutdown while waiting for flow credit");
                return Ok(true);
            }
        };

        // Durability gate: hold (not drop) until the persisted watermark
        // covers this event. The permit stays charged while held.
        tokio::select! {
            gated = shared.durability.wait_until_persisted(partition, ceiling, seqno) => gated?,
            _ = shutdown_rx.recv() => {
                debug!(partition, seqno, "shutdown while awaiting durability");
                drop(permit);
                return Ok(true);
            }
        }

        if !shared.filter.pass(&event) {
            // Rejection is not failure: release credit, keep the seqno
            // eligible for checkpointing.
            drop(permit);
            batcher.note_progress(seqno);
            metrics::increment_events_filtered();
            shared.stats.write().await.events_filtered += 1;
            return Ok(false);
        }

        let records = Self::translate_with_retry(shared, &event).await?;
        metrics::increment_events_processed(event.event_type.as_str());
        shared.stats.write().await.events_processed += 1;

        if records.is_empty() {
            // A handler may legitimately drop an event after inspection.
            drop(permit);
            batcher.note_progress(seqno);
        } else {
            batcher.push(records, seqno, permit);
        }
        Ok(false)
    }

    /// Translates with the bounded retry policy; exhaustion fails the
    /// partition so data is never silently skipped.
    async fn translate_with_retry(
        shared: &Arc<WorkerShared<F, S, P>>,
        event: &DocumentEvent,
    ) -> Result<Vec<SourceRecord>, CoordinatorError> {
        let config = &shared.config;
        let mut attempt: u32 = 0;
        loop {
            match shared.handler.translate(event, &config.topic) {
                Ok(records) => return Ok(records),
                Err(e) => {
                    attempt += 1;
                    if attempt as usize > config.max_retries {
                        error!(
                            partition = event.partition,
                            seqno = event.seqno,
                            error = %e,
                            "translation failed after max retries"
                        );
                        return Err(e.into());
                    }
                    warn!(
                        partition = event.partition,
                        seqno = event.seqno,
                        attempt,
                        error = %e,
                        "translation failed, retrying"
                    );
                    tokio::time::sleep(config.retry_backoff(attempt)).await;
                }
            }
        }
    }

    /// Flushes the batcher: publish (all-or-nothing), then, only after
    /// acknowledgment, write the checkpoint and release credit.
    async fn flush(
        shared: &Arc<WorkerShared<F, S, P>>,
        batcher: &mut Batcher,
        state: &mut PartitionState,
    ) -> Result<(), CoordinatorError> {
        if !batcher.has_work() {
            return Ok(());
        }
        let pending = batcher.take();
        let record_count = pending.records.len();

        if record_count > 0 {
            let start = Instant::now();
            Self::publish_with_retry(shared, &pending.records).await?;
            metrics::record_publish_duration(start.elapsed().as_secs_f64());
            metrics::record_batch_published(record_count);
            shared.stats.write().await.batches_published += 1;
        }

        // Acknowledgment is the trigger for the checkpoint write.
        if let Some(seqno) = pending.ack() {
            let checkpoint = state.checkpoint_at(seqno);
            shared
                .offsets
                .save(shared.config.offset_scope(), &checkpoint)
                .await?;
            state.record_checkpoint(seqno);
            metrics::increment_checkpoint_saves();
            shared.stats.write().await.checkpoint_saves += 1;
            debug!(
                partition = state.partition(),
                seqno,
                records = record_count,
                "batch acknowledged and checkpointed"
            );
        }
        Ok(())
    }

    /// Publishes a batch with exponential backoff. The batch is
    /// unconfirmed as a whole until a publish succeeds.
    async fn publish_with_retry(
        shared: &Arc<WorkerShared<F, S, P>>,
        records: &[SourceRecord],
    ) -> Result<(), CoordinatorError> {
        let config = &shared.config;
        let mut attempt: u32 = 0;
        loop {
            match shared.publisher.publish(records.to_vec()).await {
                Ok(()) => {
                    if attempt > 0 {
                        info!(attempts = attempt + 1, "publish succeeded after retries");
                    }
                    return Ok(());
                }
                Err(e) => {
                    attempt += 1;
                    if !e.is_retryable() || attempt as usize > config.max_retries {
                        error!(attempts = attempt, error = %e, "publish failed");
                        return Err(e.into());
                    }
                    metrics::increment_publish_retries();
                    shared.stats.write().await.publish_retries += 1;
                    let backoff = e
                        .retry_after()
                        .unwrap_or_else(|| config.retry_backoff(attempt));
                    warn!(
                        attempt,
                        max_retries = config.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "publish failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Shutdown drain: flush within the grace period, discard what is
    /// left. Discarded items are redelivered from the last persisted
    /// checkpoint on restart.
    async fn drain(
        shared: &Arc<WorkerShared<F, S, P>>,
        batcher: &mut Batcher,
        state: &mut PartitionState,
    ) {
        if !batcher.has_work() {
            return;
        }
        let partition = state.partition();
        info!(partition, pending = batcher.len(), "draining partition");
        match timeout(
            shared.config.shutdown_grace,
            Self::flush(shared, batcher, state),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(partition, error = %e, "drain flush failed; batch will be redelivered");
            }
            Err(_) => {
                warn!(partition, "shutdown grace expired; discarding unflushed batch");
                batcher.discard();
            }
        }
    }
}
