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

#![cfg(feature = "redis-store")]

use staffetta_core::offset::{Checkpoint, OffsetStore};
use staffetta_stores::redis::{RedisConfig, RedisOffsetStore};
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::redis::Redis;

async fn start_redis() -> (testcontainers::ContainerAsync<Redis>, String) {
    let container = Redis::default()
        .start()
        .await
        .expect("failed to start Redis container");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("failed to get port");
    (container, format!("redis://127.0.0.1:{port}"))
}

async fn create_test_store(url: String) -> RedisOffsetStore {
    let config = RedisConfig::builder()
        .url(url)
        .pool_size(5)
        .build()
        .expect("valid config");
    RedisOffsetStore::new(config)
        .await
        .expect("failed to create store")
}

fn checkpoint(partition: u16, seqno: u64) -> Checkpoint {
    Checkpoint {
        partition,
        partition_uuid: 0xFEED,
        seqno,
    }
}

#[tokio::test]
#[ignore] // Requires Docker
async fn save_and_load_checkpoint() {
    let (_container, url) = start_redis().await;
    let store = create_test_store(url).await;

    let saved = checkpoint(0, 42);
    store.save(Some("conn-a"), &saved).await.expect("save");

    let loaded = store.load(Some("conn-a"), 0).await.expect("load");
    assert_eq!(loaded, Some(saved));

    store.close().await.expect("close");
}

#[tokio::test]
#[ignore] // Requires Docker
async fn load_missing_checkpoint_is_none() {
    let (_container, url) = start_redis().await;
    let store = create_test_store(url).await;

    let loaded = store.load(Some("conn-a"), 99).await.expect("load");
    assert_eq!(loaded, None);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn delete_removes_checkpoint() {
    let (_container, url) = start_redis().await;
    let store = create_test_store(url).await;

    store.save(None, &checkpoint(3, 7)).await.expect("save");
    store.delete(None, 3).await.expect("delete");

    assert_eq!(store.load(None, 3).await.expect("load"), None);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn scopes_are_isolated() {
    let (_container, url) = start_redis().await;
    let store = create_test_store(url).await;

    store.save(Some("conn-a"), &checkpoint(0, 1)).await.expect("save a");
    store.save(Some("conn-b"), &checkpoint(0, 2)).await.expect("save b");
    store.save(None, &checkpoint(0, 3)).await.expect("save unscoped");

    assert_eq!(
        store.load(Some("conn-a"), 0).await.expect("load").unwrap().seqno,
        1
    );
    assert_eq!(
        store.load(Some("conn-b"), 0).await.expect("load").unwrap().seqno,
        2
    );
    assert_eq!(store.load(None, 0).await.expect("load").unwrap().seqno, 3);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn list_returns_scope_checkpoints() {
    let (_container, url) = start_redis().await;
    let store = create_test_store(url).await;

    for partition in 0..4u16 {
        store
            .save(Some("conn-a"), &checkpoint(partition, u64::from(partition) * 10))
            .await
            .expect("save");
    }
    store.save(Some("conn-b"), &checkpoint(9, 9)).await.expect("save");

    let listed = store.list(Some("conn-a")).await.expect("list");
    assert_eq!(listed.len(), 4);
    assert_eq!(listed[&2].seqno, 20);
    assert!(!listed.contains_key(&9));
}

#[tokio::test]
#[ignore] // Requires Docker
async fn rollback_regression_overwrites() {
    let (_container, url) = start_redis().await;
    let store = create_test_store(url).await;

    store.save(Some("conn-a"), &checkpoint(0, 40)).await.expect("save");
    let rewound = Checkpoint {
        partition: 0,
        partition_uuid: 0xBEEF,
        seqno: 12,
    };
    store.save(Some("conn-a"), &rewound).await.expect("rewind save");

    assert_eq!(
        store.load(Some("conn-a"), 0).await.expect("load"),
        Some(rewound)
    );
}

#[tokio::test]
#[ignore] // Requires Docker
async fn ttl_expires_checkpoints() {
    let (_container, url) = start_redis().await;
    let config = RedisConfig::builder()
        .url(url)
        .ttl(Duration::from_secs(1))
        .build()
        .expect("valid config");
    let store = RedisOffsetStore::new(config).await.expect("store");

    store.save(Some("conn-a"), &checkpoint(0, 5)).await.expect("save");
    assert!(store.load(Some("conn-a"), 0).await.expect("load").is_some());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(store.load(Some("conn-a"), 0).await.expect("load"), None);
}
