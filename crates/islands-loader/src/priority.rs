//! Weighted priority queue for pending load requests
//!
//! Items are ordered by the weight of their [`Priority`] level, highest first.
//! Items with the same weight leave the queue in insertion order. Weights can
//! be swapped at runtime and the queued items are re-sorted immediately.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

/// Priority level for a framework load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Needed for first paint, blocks interactivity
    Critical,
    /// Visible island, needed soon
    High,
    /// Standard priority
    #[default]
    Normal,
    /// Preload/background
    Low,
}

impl Priority {
    /// All levels, most urgent first
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Stable lowercase name (also used as the cache header value)
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }

    /// Parse a lowercase name
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Priority::Critical),
            "high" => Some(Priority::High),
            "normal" => Some(Priority::Normal),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }

    /// Rank used by the cache eviction policy (higher = more valuable)
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Critical => 3,
            Priority::High => 2,
            Priority::Normal => 1,
            Priority::Low => 0,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric weight per priority level (higher = dequeued first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PriorityWeights {
    pub critical: u32,
    pub high: u32,
    pub normal: u32,
    pub low: u32,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            critical: 1000,
            high: 100,
            normal: 10,
            low: 1,
        }
    }
}

impl PriorityWeights {
    /// Weight assigned to a priority level
    pub fn weight(&self, priority: Priority) -> u32 {
        match priority {
            Priority::Critical => self.critical,
            Priority::High => self.high,
            Priority::Normal => self.normal,
            Priority::Low => self.low,
        }
    }
}

/// A queued payload with its scheduling metadata
#[derive(Debug)]
pub struct QueueItem<T> {
    /// Priority level at enqueue time
    pub priority: Priority,
    /// Wrapped payload (request plus its completion target)
    pub payload: T,
    /// Insertion timestamp
    pub enqueued_at: Instant,
    /// Monotonic insertion sequence, breaks timestamp ties
    pub sequence: u64,
}

impl<T> QueueItem<T> {
    /// Time spent in the queue so far
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

struct Slot<T> {
    weight: u32,
    item: QueueItem<T>,
}

impl<T> Slot<T> {
    fn key_cmp(&self, other: &Self) -> Ordering {
        // Max-heap: larger weight first, then earlier insertion first
        self.weight
            .cmp(&other.weight)
            .then_with(|| other.item.enqueued_at.cmp(&self.item.enqueued_at))
            .then_with(|| other.item.sequence.cmp(&self.item.sequence))
    }
}

impl<T> PartialEq for Slot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key_cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Slot<T> {}

impl<T> PartialOrd for Slot<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Slot<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key_cmp(other)
    }
}

/// Age of the oldest queued item
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OldestItem {
    pub priority: Priority,
    pub age: Duration,
}

/// Queue statistics
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    /// Total queued items
    pub total: usize,
    /// Items per priority level
    pub by_priority: HashMap<Priority, usize>,
    /// Oldest queued item, if any
    pub oldest: Option<OldestItem>,
    /// Mean time items have spent in the queue
    pub mean_age: Duration,
}

impl QueueStats {
    /// Items queued at a given level
    pub fn count(&self, priority: Priority) -> usize {
        self.by_priority.get(&priority).copied().unwrap_or(0)
    }
}

/// Priority queue ordered by configurable weights with FIFO tie-break
pub struct PriorityQueue<T> {
    heap: BinaryHeap<Slot<T>>,
    weights: PriorityWeights,
    next_sequence: u64,
}

impl<T> PriorityQueue<T> {
    /// Create a queue with default weights
    pub fn new() -> Self {
        Self::with_weights(PriorityWeights::default())
    }

    /// Create a queue with custom weights
    pub fn with_weights(weights: PriorityWeights) -> Self {
        Self {
            heap: BinaryHeap::new(),
            weights,
            next_sequence: 0,
        }
    }

    /// Push a payload at the given priority
    pub fn enqueue(&mut self, priority: Priority, payload: T) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        self.heap.push(Slot {
            weight: self.weights.weight(priority),
            item: QueueItem {
                priority,
                payload,
                enqueued_at: Instant::now(),
                sequence,
            },
        });
    }

    /// Pop the highest weighted item, `None` when empty
    pub fn dequeue(&mut self) -> Option<QueueItem<T>> {
        self.heap.pop().map(|slot| slot.item)
    }

    /// Look at the next item without removing it
    pub fn peek(&self) -> Option<&QueueItem<T>> {
        self.heap.peek().map(|slot| &slot.item)
    }

    /// Remove the first item (in dequeue order) matching the predicate
    pub fn remove<F>(&mut self, mut predicate: F) -> Option<QueueItem<T>>
    where
        F: FnMut(&QueueItem<T>) -> bool,
    {
        let mut slots = std::mem::take(&mut self.heap).into_vec();

        let mut best: Option<usize> = None;
        for (idx, slot) in slots.iter().enumerate() {
            if !predicate(&slot.item) {
                continue;
            }
            best = match best {
                Some(current) if slots[current] >= *slot => Some(current),
                _ => Some(idx),
            };
        }

        let removed = best.map(|idx| slots.swap_remove(idx).item);
        self.heap = BinaryHeap::from(slots);
        removed
    }

    /// Remove every item, returned in dequeue order
    pub fn clear(&mut self) -> Vec<QueueItem<T>> {
        let heap = std::mem::take(&mut self.heap);
        heap.into_sorted_vec()
            .into_iter()
            .rev()
            .map(|slot| slot.item)
            .collect()
    }

    /// Replace the weights and re-sort everything already queued
    pub fn update_priority_weights(&mut self, weights: PriorityWeights) {
        self.weights = weights;

        let slots = std::mem::take(&mut self.heap).into_vec();
        self.heap = slots
            .into_iter()
            .map(|mut slot| {
                slot.weight = weights.weight(slot.item.priority);
                slot
            })
            .collect();
    }

    /// Current weights
    pub fn weights(&self) -> PriorityWeights {
        self.weights
    }

    /// Get queue length
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Check whether any queued item matches
    pub fn contains<F>(&self, mut predicate: F) -> bool
    where
        F: FnMut(&QueueItem<T>) -> bool,
    {
        self.heap.iter().any(|slot| predicate(&slot.item))
    }

    /// Snapshot of queue statistics
    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total: self.heap.len(),
            ..Default::default()
        };

        // One clock reading so every age is measured against the same instant
        let now = Instant::now();
        let mut total_age = Duration::ZERO;
        for slot in self.heap.iter() {
            let item = &slot.item;
            *stats.by_priority.entry(item.priority).or_insert(0) += 1;
            total_age += now.saturating_duration_since(item.enqueued_at);
        }

        stats.oldest = self
            .heap
            .iter()
            .map(|slot| &slot.item)
            .min_by_key(|item| (item.enqueued_at, item.sequence))
            .map(|item| OldestItem {
                priority: item.priority,
                age: now.saturating_duration_since(item.enqueued_at),
            });

        if stats.total > 0 {
            stats.mean_age = total_age / stats.total as u32;
        }

        stats
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
