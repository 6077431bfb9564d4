//! Integration Tests for the Cache Engine
//!
//! Drives `ShardedCache` through its public API across restarts, snapshots
//! and concurrent callers.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use shard_cache::{
    cache::{CleanupStatus, ManualClock, ShardedCache},
    CacheConfig, CacheError,
};
use tempfile::TempDir;

// == Helper Functions ==

const START_MS: u64 = 1_700_000_000_000;

fn base_config(dir: &TempDir) -> CacheConfig {
    CacheConfig {
        num_shards: 8,
        ttl_seconds: 300,
        snapshot_dir: dir.path().join("snapshots"),
        wal_path: dir.path().join("wal"),
        wal_sync: false,
        ..CacheConfig::default()
    }
}

fn wal_config(dir: &TempDir) -> CacheConfig {
    CacheConfig {
        enable_wal: true,
        ..base_config(dir)
    }
}

fn clocked(config: CacheConfig) -> (ShardedCache, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START_MS));
    let cache = ShardedCache::with_clock(config, clock.clone()).unwrap();
    (cache, clock)
}

fn wal_segments(dir: &TempDir) -> Vec<std::path::PathBuf> {
    let mut segments: Vec<_> = std::fs::read_dir(dir.path().join("wal"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "log"))
        .collect();
    segments.sort();
    segments
}

// == Eviction Scenarios ==

#[tokio::test]
async fn test_two_entry_budget_evicts_least_recent() {
    let dir = TempDir::new().unwrap();
    let (cache, clock) = clocked(CacheConfig {
        num_shards: 4,
        max_entries: 2,
        ..base_config(&dir)
    });

    cache.set("x", json!(1), None).await.unwrap();
    clock.advance_ms(10);
    cache.set("y", json!(2), None).await.unwrap();
    assert_eq!(cache.size(), 2);

    clock.advance_ms(10);
    cache.set("z", json!(3), None).await.unwrap();

    assert_eq!(cache.size(), 2);
    assert_eq!(cache.get("x").await.unwrap(), None);
    assert_eq!(cache.get("y").await.unwrap(), Some(json!(2)));
    assert_eq!(cache.get("z").await.unwrap(), Some(json!(3)));
}

#[tokio::test]
async fn test_read_refreshes_recency_across_shards() {
    let dir = TempDir::new().unwrap();
    let (cache, clock) = clocked(CacheConfig {
        max_entries: 3,
        ..base_config(&dir)
    });

    for key in ["a", "b", "c"] {
        cache.set(key, json!(key), None).await.unwrap();
        clock.advance_ms(5);
    }
    cache.get("a").await.unwrap();
    clock.advance_ms(5);
    cache.set("d", json!("d"), None).await.unwrap();

    assert_eq!(cache.get("b").await.unwrap(), None);
    assert!(cache.get("a").await.unwrap().is_some());
    assert!(cache.get("c").await.unwrap().is_some());
    assert!(cache.get("d").await.unwrap().is_some());
}

#[tokio::test]
async fn test_memory_budget_holds_after_every_set() {
    let dir = TempDir::new().unwrap();
    let (cache, clock) = clocked(CacheConfig {
        max_memory_mb: 1,
        ..base_config(&dir)
    });
    let budget = 1024 * 1024;
    let blob = "x".repeat(20_000);

    for i in 0..200 {
        cache
            .set(&format!("blob_{}", i), json!({ "data": blob }), None)
            .await
            .unwrap();
        clock.advance_ms(1);
        assert!(cache.bytes_used() <= budget, "over budget after set {}", i);
    }

    let stats = cache.stats().await.unwrap();
    assert!(stats.evictions > 0);
    assert!(cache.verify_counters().await.consistent);
}

// == WAL Durability ==

#[tokio::test]
async fn test_wal_rotation_and_replay_across_segments() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig {
        wal_max_log_bytes: 512,
        ..wal_config(&dir)
    };
    {
        let (cache, _) = clocked(config.clone());
        for i in 0..50 {
            cache
                .set(&format!("key_{}", i), json!({ "i": i }), None)
                .await
                .unwrap();
        }
        cache.delete("key_0").await.unwrap();
        cache.shutdown().await.unwrap();
    }
    assert!(wal_segments(&dir).len() > 1, "segments should rotate");

    let (restarted, _) = clocked(config);
    let report = restarted.start().await.unwrap();

    assert_eq!(report.applied, 51);
    assert_eq!(restarted.size(), 49);
    assert_eq!(restarted.get("key_0").await.unwrap(), None);
    assert_eq!(restarted.get("key_49").await.unwrap(), Some(json!({"i": 49})));
}

#[tokio::test]
async fn test_torn_wal_tail_is_skipped() {
    let dir = TempDir::new().unwrap();
    {
        let (cache, _) = clocked(wal_config(&dir));
        cache.set("a", json!(1), None).await.unwrap();
        cache.set("b", json!(2), None).await.unwrap();
        cache.shutdown().await.unwrap();
    }

    let last = wal_segments(&dir).pop().unwrap();
    let mut contents = std::fs::read_to_string(&last).unwrap();
    contents.push_str("{\"sequence\": 3, \"timestamp\": 17");
    std::fs::write(&last, contents).unwrap();

    let (restarted, _) = clocked(wal_config(&dir));
    let report = restarted.start().await.unwrap();

    assert_eq!(report.applied, 2);
    assert_eq!(report.skipped_corrupt, 1);
    assert_eq!(restarted.get("b").await.unwrap(), Some(json!(2)));
}

#[tokio::test]
async fn test_write_after_torn_tail_survives_restart() {
    let dir = TempDir::new().unwrap();
    {
        let (cache, _) = clocked(wal_config(&dir));
        cache.set("a", json!(1), None).await.unwrap();
        cache.shutdown().await.unwrap();
    }

    let last = wal_segments(&dir).pop().unwrap();
    let mut contents = std::fs::read_to_string(&last).unwrap();
    contents.push_str("{\"sequence\": 2, \"timestamp\": 17");
    std::fs::write(&last, contents).unwrap();

    {
        let (cache, _) = clocked(wal_config(&dir));
        cache.set("b", json!(2), None).await.unwrap();
        cache.shutdown().await.unwrap();
    }

    let (restarted, _) = clocked(wal_config(&dir));
    let report = restarted.start().await.unwrap();

    assert_eq!(report.applied, 2);
    assert_eq!(report.skipped_corrupt, 1);
    assert_eq!(restarted.get("a").await.unwrap(), Some(json!(1)));
    assert_eq!(restarted.get("b").await.unwrap(), Some(json!(2)));
}

#[tokio::test]
async fn test_first_mutation_triggers_replay() {
    let dir = TempDir::new().unwrap();
    {
        let (cache, _) = clocked(wal_config(&dir));
        cache.set("old", json!("v"), None).await.unwrap();
    }

    let (restarted, _) = clocked(wal_config(&dir));
    restarted.set("new", json!("w"), None).await.unwrap();

    assert_eq!(restarted.size(), 2);
    assert_eq!(restarted.get("old").await.unwrap(), Some(json!("v")));
}

#[tokio::test]
async fn test_replay_after_restore_starts_from_the_clear() {
    let dir = TempDir::new().unwrap();
    {
        let (cache, _) = clocked(wal_config(&dir));
        cache.set("snap", json!({"v": 1}), Some(600)).await.unwrap();
        let handle = cache.snapshot().await.unwrap();
        cache.set("after", json!(2), None).await.unwrap();
        cache.restore(&handle).await.unwrap();
        assert_eq!(cache.get("snap").await.unwrap(), Some(json!({"v": 1})));
        cache.set("post_restore", json!(3), None).await.unwrap();
        cache.shutdown().await.unwrap();
    }

    // restored entries are not logged; the WAL carries the CLEAR and later writes
    let (restarted, _) = clocked(wal_config(&dir));
    restarted.start().await.unwrap();

    assert_eq!(restarted.get("after").await.unwrap(), None);
    assert_eq!(restarted.get("snap").await.unwrap(), None);
    assert_eq!(restarted.get("post_restore").await.unwrap(), Some(json!(3)));
}

// == Snapshot Fidelity ==

#[tokio::test]
async fn test_snapshot_fidelity_with_remaining_ttl() {
    let dir = TempDir::new().unwrap();
    let (cache, clock) = clocked(base_config(&dir));

    cache.set("long", json!([1, 2, 3]), Some(100)).await.unwrap();
    cache.set("forever", json!({"k": "v"}), Some(0)).await.unwrap();
    cache.set("brief", json!("soon"), Some(3)).await.unwrap();

    let handle = cache.snapshot().await.unwrap();
    cache.clear().await.unwrap();
    clock.advance_secs(5);

    let report = cache.restore(&handle).await.unwrap();
    assert_eq!(report.restored, 2);
    assert_eq!(report.skipped_expired, 1);

    clock.advance_secs(90);
    assert_eq!(cache.get("long").await.unwrap(), Some(json!([1, 2, 3])));
    clock.advance_secs(10);
    assert_eq!(cache.get("long").await.unwrap(), None);
    assert_eq!(cache.get("forever").await.unwrap(), Some(json!({"k": "v"})));
}

#[tokio::test]
async fn test_restore_rejects_foreign_file_name() {
    let dir = TempDir::new().unwrap();
    let (cache, _) = clocked(base_config(&dir));

    let result = cache.restore_named("../../etc/passwd").await;

    assert!(matches!(result, Err(CacheError::Validation(_))));
}

// == Concurrency ==

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_last_writer_wins() {
    let dir = TempDir::new().unwrap();
    let cache = ShardedCache::new(base_config(&dir)).unwrap();
    cache.start().await.unwrap();

    let mut tasks = Vec::new();
    for writer in 0..16 {
        let cache = cache.clone();
        tasks.push(tokio::spawn(async move {
            for key in 0..20 {
                cache
                    .set(&format!("shared_{}", key), json!(writer), None)
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let writers: Vec<Value> = (0..16).map(|w| json!(w)).collect();
    for key in 0..20 {
        let value = cache.get(&format!("shared_{}", key)).await.unwrap().unwrap();
        assert!(writers.contains(&value));
    }
    assert_eq!(cache.size(), 20);
    assert!(cache.verify_counters().await.consistent);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mixed_operations_keep_counters_consistent() {
    let dir = TempDir::new().unwrap();
    let cache = ShardedCache::new(CacheConfig {
        max_entries: 50,
        ..base_config(&dir)
    })
    .unwrap();

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let cache = cache.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..100 {
                let key = format!("k{}", (worker * 31 + i) % 120);
                match i % 5 {
                    0 => {
                        cache.delete(&key).await.unwrap();
                    }
                    1 => {
                        cache.get(&key).await.unwrap();
                    }
                    _ => cache.set(&key, json!(i), None).await.unwrap(),
                }
            }
        }));
    }
    tasks.push(tokio::spawn({
        let cache = cache.clone();
        async move {
            for _ in 0..5 {
                cache.snapshot().await.unwrap();
            }
        }
    }));
    for task in tasks {
        task.await.unwrap();
    }

    let check = cache.verify_counters().await;
    assert!(check.consistent, "{:?}", check);
    assert!(cache.size() <= 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_calls_replay_once() {
    let dir = TempDir::new().unwrap();
    {
        let (cache, _) = clocked(wal_config(&dir));
        for i in 0..20 {
            cache.set(&format!("k{}", i), json!(i), None).await.unwrap();
        }
        cache.set("contested", json!("old"), None).await.unwrap();
        cache.delete("contested").await.unwrap();
        cache.shutdown().await.unwrap();
    }

    let (restarted, _) = clocked(wal_config(&dir));
    let mut tasks = Vec::new();
    for worker in 0..16 {
        let cache = restarted.clone();
        tasks.push(tokio::spawn(async move {
            if worker % 2 == 0 {
                cache.set("contested", json!("new"), None).await.unwrap();
            } else {
                cache.get(&format!("k{}", worker)).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let report = restarted.start().await.unwrap();
    assert_eq!(report.applied, 22);
    assert_eq!(report.skipped_corrupt, 0);
    assert_eq!(restarted.get("contested").await.unwrap(), Some(json!("new")));
    assert_eq!(restarted.size(), 21);
    assert!(restarted.verify_counters().await.consistent);
    restarted.shutdown().await.unwrap();
}

// == Background Expiry ==

#[tokio::test]
async fn test_background_sweep_removes_expired_entries() {
    let dir = TempDir::new().unwrap();
    let (cache, clock) = clocked(CacheConfig {
        cleanup_interval_seconds: 1,
        ..base_config(&dir)
    });
    cache.start().await.unwrap();
    for i in 0..10 {
        cache.set(&format!("t{}", i), json!(i), Some(1)).await.unwrap();
    }
    clock.advance_secs(2);

    let mut swept = false;
    for _ in 0..30 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if cache.size() == 0 {
            swept = true;
            break;
        }
    }
    assert!(swept, "background sweep never ran");

    let health = cache.health_check().await;
    assert_eq!(health.cleanup_status, CleanupStatus::Running);
    cache.shutdown().await.unwrap();
}
