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

//! A bounded, time ordered window of acknowledgment samples.
//!
//! The window is limited both by a fixed capacity and, on demand, by a time
//! horizon. The capacity bounds memory when ACKs arrive in bursts; the time
//! horizon keeps the rate estimate tracking recent behavior when ACKs are
//! sparse.

use std::collections::VecDeque;
use std::time::Duration;
use std::time::Instant;

/// How the window aggregates its samples.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default)]
pub enum Aggregation {
    /// The total is the sum of the sample lengths, in whatever unit the
    /// caller records.
    #[default]
    Sum,

    /// The total is the number of samples, whatever their weight.
    Count,
}

/// A single acknowledgment sample.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct Sample {
    /// Arrival time.
    pub time: Instant,

    /// Amount acknowledged.
    pub len: u64,
}

#[derive(Debug, Clone)]
pub struct SampleWindow {
    /// Samples in arrival order, the oldest first.
    samples: VecDeque<Sample>,

    /// Max number of samples held.
    capacity: usize,

    /// Aggregate over all held samples.
    total: u64,

    /// Aggregation mode.
    aggregation: Aggregation,
}

impl SampleWindow {
    pub fn new(capacity: usize, aggregation: Aggregation) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            total: 0,
            aggregation,
        }
    }

    /// Weight a sample contributes to the total.
    fn weight(&self, len: u64) -> u64 {
        match self.aggregation {
            Aggregation::Sum => len,
            Aggregation::Count => 1,
        }
    }

    /// Append a sample, evicting the oldest one if the window is full.
    /// A time earlier than the newest sample is raised to it, so samples
    /// stay ordered when the clock goes backwards.
    pub fn put(&mut self, time: Instant, len: u64) {
        let time = match self.samples.back() {
            Some(newest) => time.max(newest.time),
            None => time,
        };

        if self.samples.len() >= self.capacity {
            self.pop_oldest();
        }

        self.samples.push_back(Sample { time, len });
        self.total = self.total.saturating_add(self.weight(len));
    }

    fn pop_oldest(&mut self) -> Option<Sample> {
        let sample = self.samples.pop_front()?;
        self.total = self.total.saturating_sub(self.weight(sample.len));
        Some(sample)
    }

    /// Time elapsed since the oldest sample, or zero if the window is empty.
    pub fn time_span(&self, now: Instant) -> Duration {
        match self.samples.front() {
            Some(oldest) => now.saturating_duration_since(oldest.time),
            None => Duration::ZERO,
        }
    }

    /// Evict the oldest samples until the window spans at most `threshold`.
    pub fn evict_older_than(&mut self, now: Instant, threshold: Duration) {
        while self.time_span(now) > threshold {
            if self.pop_oldest().is_none() {
                break;
            }
        }
    }

    /// Average rate over the window, in sample units per second. Zero if the window
    /// spans no time.
    pub fn rate(&self, now: Instant) -> f64 {
        let span = self.time_span(now);
        if span.is_zero() {
            return 0.0;
        }
        self.total as f64 / span.as_secs_f64()
    }

    /// Drop all samples.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.total = 0;
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

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    /// Iterate over samples, the oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }
}
