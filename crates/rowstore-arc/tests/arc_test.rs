//! Replacement cache integration tests.
//!
//! Covers:
//! - Promotion protecting re-read keys from one-shot inserts
//! - Size bounds under random workloads
//! - Partitioned cache shared across threads

use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use rowstore_arc::{AdaptiveCache, ConcurrentArc, SimpleArc};

// =============================================================================
// Generations
// =============================================================================

#[test]
fn test_scan_does_not_flush_hot_keys() {
    let cache = SimpleArc::new(64);
    for k in 0..16u32 {
        cache.put(k, k);
        assert_eq!(cache.get(&k), Some(k));
    }
    for k in 1000..10_000u32 {
        cache.put(k, k);
    }
    for k in 0..16u32 {
        assert_eq!(cache.get(&k), Some(k), "hot key {} was evicted", k);
    }
}

#[test]
fn test_random_workload_stays_bounded() {
    let mut rng = rand::thread_rng();
    let cache = SimpleArc::new(100);
    let mut truth = HashMap::new();
    for _ in 0..20_000 {
        let key: u16 = rng.gen_range(0..500);
        if rng.gen_bool(0.5) {
            let value: u64 = rng.gen();
            cache.put(key, value);
            truth.insert(key, value);
        } else if let Some(value) = cache.get(&key) {
            assert_eq!(Some(&value), truth.get(&key));
        }
        let (a, b) = cache.generation_sizes();
        assert!(a <= 51 && b <= 51, "generations grew to ({}, {})", a, b);
    }
}

// =============================================================================
// Partitioned
// =============================================================================

#[test]
fn test_concurrent_readers_and_writers() {
    let cache: Arc<ConcurrentArc<u64, u64>> = Arc::new(ConcurrentArc::new(100_000, 8));
    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..1000 {
                    let key = t * 10_000 + i;
                    cache.put(key, key + 1);
                    assert_eq!(cache.get(&key), Some(key + 1));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(cache.len(), 4000);
    assert_eq!(cache.get(&30_999), Some(31_000));
}

#[test]
fn test_cpu_partitions_with_access_order() {
    let cache: ConcurrentArc<String, usize> =
        ConcurrentArc::with_cpu_partitions(1024).with_access_order();
    assert!(cache.partition_count() >= 1);
    cache.put("alpha".to_string(), 1);
    assert!(cache.contains_key(&"alpha".to_string()));
    assert_eq!(cache.remove(&"alpha".to_string()), Some(1));
    assert!(cache.is_empty());
    assert_eq!(cache.capacity(), 1024);
}
