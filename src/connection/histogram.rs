// Copyright (c) 2023 The TQUIC Authors.
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

use std::time::Duration;

/// Default number of inter-arrival deltas kept by the host.
pub const DEFAULT_HISTOGRAM_LEN: usize = 64;

/// A circular buffer of recent ACK inter-arrival time deltas, in microseconds.
///
/// The host records one delta per arriving ACK. Congestion controllers only
/// read it, walking backward from the newest entry to translate a queuing
/// delay into a number of queued packets.
#[derive(Debug, Clone)]
pub struct RttHistogram {
    /// Delta magnitudes in microseconds.
    deltas: Vec<u64>,

    /// Index of the oldest valid entry.
    head: usize,

    /// Index of the slot the next delta is written to.
    last: usize,

    /// Number of valid entries.
    count: usize,
}

impl RttHistogram {
    pub fn new(len: usize) -> Self {
        Self {
            deltas: vec![0; len.max(1)],
            head: 0,
            last: 0,
            count: 0,
        }
    }

    /// Record the gap between two consecutive ACK arrivals.
    pub fn record(&mut self, delta: Duration) {
        let cap = self.deltas.len();
        self.deltas[self.last] = delta.as_micros().min(u64::MAX as u128) as u64;
        self.last = (self.last + 1) % cap;

        if self.count < cap {
            self.count += 1;
        } else {
            self.head = (self.head + 1) % cap;
        }
    }

    /// Drop all recorded deltas.
    pub fn clear(&mut self) {
        self.head = 0;
        self.last = 0;
        self.count = 0;
    }

    /// Number of valid entries.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Fixed size of the underlying buffer.
    pub fn capacity(&self) -> usize {
        self.deltas.len()
    }

    /// Index of the oldest valid entry.
    pub fn head(&self) -> usize {
        self.head
    }

    /// Index of the newest valid entry, if any.
    pub fn newest(&self) -> Option<usize> {
        if self.count == 0 {
            return None;
        }
        Some((self.last + self.deltas.len() - 1) % self.deltas.len())
    }

    /// Return the index preceding `index` on the ring.
    pub fn prev(&self, index: usize) -> usize {
        (index + self.deltas.len() - 1) % self.deltas.len()
    }

    /// Delta stored at `index`, in microseconds.
    pub fn get(&self, index: usize) -> u64 {
        self.deltas[index]
    }
}

impl Default for RttHistogram {
    fn default() -> Self {
        Self::new(DEFAULT_HISTOGRAM_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_empty() {
        let h = RttHistogram::new(4);
        assert!(h.is_empty());
        assert_eq!(h.len(), 0);
        assert_eq!(h.capacity(), 4);
        assert_eq!(h.newest(), None);
    }

    #[test]
    fn histogram_record() {
        let mut h = RttHistogram::new(4);
        h.record(Duration::from_micros(10));
        h.record(Duration::from_micros(20));

        assert_eq!(h.len(), 2);
        assert_eq!(h.head(), 0);
        assert_eq!(h.newest(), Some(1));
        assert_eq!(h.get(1), 20);
        assert_eq!(h.get(h.prev(1)), 10);
    }

    #[test]
    fn histogram_wrap_around() {
        let mut h = RttHistogram::new(3);
        for i in 1..=5 {
            h.record(Duration::from_micros(i * 100));
        }

        // Only the three newest deltas survive: 300, 400, 500.
        assert_eq!(h.len(), 3);
        let newest = h.newest().unwrap();
        assert_eq!(h.get(newest), 500);
        assert_eq!(h.get(h.prev(newest)), 400);
        assert_eq!(h.get(h.head()), 300);
        assert_eq!(h.prev(h.prev(newest)), h.head());

        h.clear();
        assert!(h.is_empty());
        assert_eq!(h.newest(), None);
    }
}
