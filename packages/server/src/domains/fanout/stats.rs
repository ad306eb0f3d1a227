use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Per-queue settlement counters.
#[derive(Debug, Default)]
pub struct QueueCounters {
    acked: AtomicU64,
    nacked: AtomicU64,
    dead_lettered: AtomicU64,
    malformed: AtomicU64,
}

impl QueueCounters {
    pub fn record_ack(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_nack(&self) {
        self.nacked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_letter(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub queue: String,
    pub acked: u64,
    pub nacked: u64,
    pub dead_lettered: u64,
    pub malformed: u64,
}

/// Counters for every consumer queue, surfaced through `/health`.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    queues: DashMap<String, Arc<QueueCounters>>,
}

impl ConsumerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self, queue: &str) -> Arc<QueueCounters> {
        self.queues
            .entry(queue.to_string())
            .or_default()
            .clone()
    }

    pub fn snapshot(&self) -> Vec<QueueStats> {
        let mut stats: Vec<QueueStats> = self
            .queues
            .iter()
            .map(|entry| QueueStats {
                queue: entry.key().clone(),
                acked: entry.acked.load(Ordering::Relaxed),
                nacked: entry.nacked.load(Ordering::Relaxed),
                dead_lettered: entry.dead_lettered.load(Ordering::Relaxed),
                malformed: entry.malformed.load(Ordering::Relaxed),
            })
            .collect();
        stats.sort_by(|a, b| a.queue.cmp(&b.queue));
        stats
    }

    pub fn for_queue(&self, queue: &str) -> Option<QueueStats> {
        self.snapshot().into_iter().find(|s| s.queue == queue)
    }

    /// Total poison messages across all queues.
    pub fn dead_lettered_total(&self) -> u64 {
        self.queues
            .iter()
            .map(|q| q.dead_lettered.load(Ordering::Relaxed) + q.malformed.load(Ordering::Relaxed))
            .sum()
    }
}
