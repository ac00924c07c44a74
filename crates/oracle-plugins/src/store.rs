//! Per-plugin sample buffers.
//!
//! Each plugin keeps a bounded, timestamp-ordered queue per symbol. Samples
//! are stamped with the broadcast timestamp they answer, so selection for a
//! round target is a window lookup around that timestamp.

use std::collections::{HashMap, VecDeque};

use oracle_types::Sample;

/// Bounded per-symbol sample history of one plugin.
#[derive(Debug, Clone)]
pub struct SampleStore {
    capacity: usize,
    window: u64,
    by_symbol: HashMap<String, VecDeque<Sample>>,
}

impl SampleStore {
    /// Keep at most `capacity` samples per symbol; select within `window`
    /// seconds of the target.
    pub fn new(capacity: usize, window: u64) -> Self {
        Self {
            capacity: capacity.max(1),
            window,
            by_symbol: HashMap::new(),
        }
    }

    /// Insert a sample, replacing one with the same timestamp.
    pub fn push(&mut self, sample: Sample) {
        let queue = self.by_symbol.entry(sample.symbol.clone()).or_default();
        match queue.binary_search_by_key(&sample.timestamp, |s| s.timestamp) {
            Ok(idx) => queue[idx] = sample,
            Err(idx) => queue.insert(idx, sample),
        }
        while queue.len() > self.capacity {
            queue.pop_front();
        }
    }

    /// Sample to use for `symbol` at `target`.
    ///
    /// The latest sample at or before `target` inside the window wins;
    /// otherwise the earliest one after `target` inside the window.
    pub fn select(&self, symbol: &str, target: u64) -> Option<&Sample> {
        let queue = self.by_symbol.get(symbol)?;
        let before = queue
            .iter()
            .rev()
            .find(|s| s.timestamp <= target && target - s.timestamp <= self.window);
        before.or_else(|| {
            queue
                .iter()
                .find(|s| s.timestamp > target && s.timestamp - target <= self.window)
        })
    }

    /// Number of samples held for `symbol`.
    #[cfg(test)]
    fn len(&self, symbol: &str) -> usize {
        self.by_symbol.get(symbol).map_or(0, VecDeque::len)
    }
}
