//! Sliding window of recent samples

use std::collections::VecDeque;

use super::types::Sample;

/// Default number of samples kept per subscription
pub const HISTORY_CAPACITY: usize = 50;

/// Fixed-capacity FIFO of the most recent samples
///
/// Never grows beyond its capacity; pushing into a full buffer evicts the
/// oldest sample first.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
    /// Samples pushed since the last clear, evicted ones included
    received: u64,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    /// Create a buffer holding at most `capacity` samples (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            received: 0,
        }
    }

    /// Append a sample, evicting from the front once full
    pub fn push(&mut self, sample: Sample) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.received += 1;
    }

    /// Owned copy of the samples in arrival order
    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.received = 0;
    }

    /// Number of samples pushed since the buffer was last cleared
    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }
}
