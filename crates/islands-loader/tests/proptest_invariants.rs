//! Property tests for queue ordering and the cache byte budget

use bytes::Bytes;
use islands_loader::{
    CacheConfig, CacheEntry, CacheStore, EvictionPolicy, MemoryStorage, Priority, PriorityQueue,
    PriorityWeights,
};
use proptest::prelude::*;

fn priority() -> impl Strategy<Value = Priority> {
    prop::sample::select(Priority::ALL.to_vec())
}

fn eviction_policy() -> impl Strategy<Value = EvictionPolicy> {
    prop_oneof![
        Just(EvictionPolicy::Lru),
        Just(EvictionPolicy::Lfu),
        Just(EvictionPolicy::Priority),
    ]
}

proptest! {
    #[test]
    fn dequeue_order_is_weight_then_fifo(priorities in prop::collection::vec(priority(), 0..64)) {
        let weights = PriorityWeights::default();
        let mut queue = PriorityQueue::new();
        for (index, priority) in priorities.iter().enumerate() {
            queue.enqueue(*priority, index);
        }

        let mut drained = Vec::new();
        while let Some(item) = queue.dequeue() {
            drained.push((weights.weight(item.priority), item.payload));
        }

        prop_assert_eq!(drained.len(), priorities.len());
        for pair in drained.windows(2) {
            let ((w1, i1), (w2, i2)) = (pair[0], pair[1]);
            prop_assert!(w1 >= w2);
            if w1 == w2 {
                prop_assert!(i1 < i2);
            }
        }
    }

    #[test]
    fn reweighting_keeps_every_item(
        priorities in prop::collection::vec(priority(), 1..32),
        low in 0u32..2000,
    ) {
        let mut queue = PriorityQueue::new();
        for (index, priority) in priorities.iter().enumerate() {
            queue.enqueue(*priority, index);
        }
        let weights = PriorityWeights { low, ..PriorityWeights::default() };
        queue.update_priority_weights(weights);

        let mut seen: Vec<usize> = std::iter::from_fn(|| queue.dequeue())
            .map(|item| item.payload)
            .collect();
        seen.sort_unstable();
        prop_assert_eq!(seen, (0..priorities.len()).collect::<Vec<_>>());
    }

    #[test]
    fn cache_never_exceeds_budget(
        max_size in 64u64..4096,
        policy in eviction_policy(),
        puts in prop::collection::vec((0usize..6, 1usize..1024, priority()), 1..40),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let config = CacheConfig::default()
                .with_max_size(max_size)
                .with_eviction_policy(policy);
            let cache = CacheStore::open(config, &MemoryStorage::new(), "props").await.unwrap();

            for (id, size, priority) in puts {
                let entry = CacheEntry::new(format!("fw{}", id), "1.0.0", Bytes::from(vec![b'x'; size]))
                    .with_priority(priority);
                let fits = size as u64 <= max_size;
                let result = cache.put(entry).await;
                prop_assert_eq!(result.is_ok(), fits);

                let stats = cache.stats().await;
                prop_assert!(stats.total_size <= max_size);
            }
            Ok(())
        })?;
    }
}
