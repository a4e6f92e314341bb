//! Console Pipeline Example
//!
//! Demonstrates the simplest possible Staffetta setup: a scripted
//! in-memory change feed streaming two partitions into a publisher that
//! prints batches to the console, with checkpoints held in memory.
//!
//! # Running the Example
//!
//! ```bash
//! cargo run --example console_pipeline
//! ```

use staffetta_core::config::ConnectorConfig;
use staffetta_core::coordinator::StreamCoordinator;
use staffetta_core::durability::{DurabilityError, DurabilityQuery};
use staffetta_core::event::{DocumentEvent, EventType, SnapshotWindow};
use staffetta_core::feed::{FeedNotification, ScriptedFeed};
use staffetta_core::filter::FilterRegistry;
use staffetta_core::handler::HandlerRegistry;
use staffetta_core::offset::{Checkpoint, OffsetStore, OffsetStoreError};
use staffetta_core::publisher::{PublishError, Publisher};
use staffetta_core::record::SourceRecord;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Publisher that just logs what it would send.
#[derive(Debug, Default)]
struct ConsolePublisher {
    batches: Mutex<usize>,
}

#[async_trait::async_trait]
impl Publisher for ConsolePublisher {
    async fn publish(&self, records: Vec<SourceRecord>) -> Result<(), PublishError> {
        let mut batches = self.batches.lock().await;
        *batches += 1;
        info!(batch = *batches, records = records.len(), "publishing batch");
        for record in &records {
            info!(
                topic = %record.topic,
                key = %record.partition_key,
                partition = record.headers.partition,
                seqno = record.headers.seqno,
                "  record"
            );
        }
        Ok(())
    }
}

/// Minimal in-memory offset store for the example.
#[derive(Debug, Default)]
struct MemoryStore {
    checkpoints: Mutex<HashMap<(Option<String>, u16), Checkpoint>>,
}

#[async_trait::async_trait]
impl OffsetStore for MemoryStore {
    async fn load(
        &self,
        scope: Option<&str>,
        partition: u16,
    ) -> Result<Option<Checkpoint>, OffsetStoreError> {
        Ok(self
            .checkpoints
            .lock()
            .await
            .get(&(scope.map(String::from), partition))
            .cloned())
    }

    async fn save(
        &self,
        scope: Option<&str>,
        checkpoint: &Checkpoint,
    ) -> Result<(), OffsetStoreError> {
        info!(
            partition = checkpoint.partition,
            seqno = checkpoint.seqno,
            "checkpoint saved"
        );
        self.checkpoints.lock().await.insert(
            (scope.map(String::from), checkpoint.partition),
            checkpoint.clone(),
        );
        Ok(())
    }

    async fn delete(&self, scope: Option<&str>, partition: u16) -> Result<(), OffsetStoreError> {
        self.checkpoints
            .lock()
            .await
            .remove(&(scope.map(String::from), partition));
        Ok(())
    }

    async fn list(
        &self,
        scope: Option<&str>,
    ) -> Result<HashMap<u16, Checkpoint>, OffsetStoreError> {
        let scope = scope.map(String::from);
        Ok(self
            .checkpoints
            .lock()
            .await
            .iter()
            .filter(|((s, _), _)| *s == scope)
            .map(|((_, p), c)| (*p, c.clone()))
            .collect())
    }

    async fn close(&self) -> Result<(), OffsetStoreError> {
        Ok(())
    }
}

/// Durability query that reports everything as persisted.
struct AlwaysPersisted;

#[async_trait::async_trait]
impl DurabilityQuery for AlwaysPersisted {
    async fn persisted_seqno(&self, _partition: u16) -> Result<u64, DurabilityError> {
        Ok(u64::MAX)
    }
}

fn demo_script(partition: u16) -> Vec<FeedNotification> {
    let mut script = vec![FeedNotification::Snapshot {
        partition,
        window: SnapshotWindow { start: 1, end: 8 },
    }];
    for seqno in 1..=8 {
        script.push(FeedNotification::Change(DocumentEvent {
            partition,
            partition_uuid: 1,
            seqno,
            key: format!("user::{partition}-{seqno}"),
            cas: seqno * 1000,
            revision_seqno: 1,
            content: Some(bytes::Bytes::from(format!(
                "{{\"partition\":{partition},\"seq\":{seqno}}}"
            ))),
            xattrs: None,
            event_type: if seqno % 4 == 0 {
                EventType::Deletion
            } else {
                EventType::Mutation
            },
            snapshot: SnapshotWindow { start: 1, end: 8 },
        }));
    }
    script
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let feed = Arc::new(ScriptedFeed::new());
    feed.push_script(0, demo_script(0));
    feed.push_script(1, demo_script(1));

    let config = ConnectorConfig::builder()
        .connector_name("console-example")
        .topic("demo-topic")
        .partitions(vec![0, 1])
        .batch_size_max(3)
        .persistence_polling_interval(Duration::ZERO)
        .flush_interval(Duration::from_millis(500))
        .build()?;

    let mut coordinator = StreamCoordinator::new(
        config,
        feed,
        Arc::new(AlwaysPersisted),
        Arc::new(MemoryStore::default()),
        Arc::new(ConsolePublisher::default()),
        &FilterRegistry::with_defaults(),
        &HandlerRegistry::with_defaults(),
    )?;

    coordinator.start().await?;
    // Give the scripted streams time to drain.
    tokio::time::sleep(Duration::from_secs(2)).await;
    coordinator.stop().await?;

    let stats = coordinator.stats().await;
    info!(
        events_processed = stats.events_processed,
        batches_published = stats.batches_published,
        "example complete"
    );
    Ok(())
}
