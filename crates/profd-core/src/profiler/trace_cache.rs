//! Concurrent counter of stack signatures.
//!
//! High-frequency samples increment entries; a slower reporter drains the
//! whole map at once. Both operations hold the same mutex, so an increment
//! lands either entirely before a drain or entirely after it.

use std::collections::HashMap;
use std::mem;
use std::sync::{Mutex, MutexGuard};

/// Occurrences of one signature since the last drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEntry {
    pub count: i64,
    /// Earliest timestamp recorded for this signature.
    pub first_timestamp_ms: i64,
}

impl Default for TraceEntry {
    fn default() -> Self {
        Self {
            count: 0,
            first_timestamp_ms: i64::MAX,
        }
    }
}

#[derive(Debug, Default)]
pub struct TraceCache {
    traces: Mutex<HashMap<String, TraceEntry>>,
}

impl TraceCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn traces(&self) -> MutexGuard<'_, HashMap<String, TraceEntry>> {
        self.traces.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn increment(&self, key: &str, timestamp_ms: i64) {
        let mut traces = self.traces();
        if !traces.contains_key(key) {
            traces.insert(key.to_string(), TraceEntry::default());
        }
        if let Some(entry) = traces.get_mut(key) {
            entry.count += 1;
            entry.first_timestamp_ms = entry.first_timestamp_ms.min(timestamp_ms);
        }
    }

    /// Swaps the map for an empty one and returns the previous content.
    pub fn copy_and_clear(&self) -> HashMap<String, TraceEntry> {
        let mut traces = self.traces();
        let capacity = traces.len();
        mem::replace(&mut *traces, HashMap::with_capacity(capacity))
    }

    pub fn len(&self) -> usize {
        self.traces().len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn counts_and_keeps_earliest_timestamp() {
        let cache = TraceCache::new();
        cache.increment("a", 30);
        cache.increment("a", 10);
        cache.increment("a", 20);
        cache.increment("b", 5);

        let traces = cache.copy_and_clear();
        assert_eq!(
            traces["a"],
            TraceEntry {
                count: 3,
                first_timestamp_ms: 10
            }
        );
        assert_eq!(traces["b"].count, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_increments_are_exact() {
        const THREADS: usize = 8;
        const KEYS: usize = 16;
        const INCREMENTS: usize = 500;

        let cache = Arc::new(TraceCache::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..INCREMENTS {
                        for k in 0..KEYS {
                            cache.increment(&format!("key-{k}"), (t * INCREMENTS + i) as i64);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let traces = cache.copy_and_clear();
        assert_eq!(traces.len(), KEYS);
        for entry in traces.values() {
            assert_eq!(entry.count, (THREADS * INCREMENTS) as i64);
            assert_eq!(entry.first_timestamp_ms, 0);
        }
        assert!(cache.copy_and_clear().is_empty());
    }

    #[test]
    fn drain_during_increments_loses_nothing() {
        let cache = Arc::new(TraceCache::new());
        let writer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..10_000 {
                    cache.increment("hot", i);
                }
            })
        };

        let mut total = 0;
        while !writer.is_finished() {
            total += cache.copy_and_clear().get("hot").map_or(0, |e| e.count);
        }
        writer.join().unwrap();
        total += cache.copy_and_clear().get("hot").map_or(0, |e| e.count);
        assert_eq!(total, 10_000);
    }
}
