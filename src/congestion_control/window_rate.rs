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

//! Window-rate queue adaptive congestion control.
//!
//! The sender keeps a sliding window of (arrival time, acked segments)
//! samples and derives the delivery rate from it. Data in flight beyond the
//! bandwidth-delay product sits in the bottleneck queue:
//!
//! ```text
//! queue_len = initial_cwnd + outstanding - rate * (base_rtt + ack_var)
//! ```
//!
//! where `initial_cwnd + outstanding` tracks the data in flight since
//! sampling started. Every control period the window is moved by the
//! difference between the estimated and the target queue length, so a queue
//! above target shrinks the window and a queue below target grows it.

use std::time::Duration;
use std::time::Instant;

use log::*;

use super::reno;
use super::AckSample;
use super::Aggregation;
use super::CongestionController;
use super::ControllerInfo;
use super::SampleWindow;
use super::MIN_CWND;
use crate::connection::SenderState;
use crate::seq;
use crate::trace::TickRecord;
use crate::trace::TraceWriter;
use crate::Config;
use crate::Result;

/// Default target queue length in segments.
pub const DEFAULT_TARGET_QUEUE_LEN: i64 = 10;

/// Default interval between two window updates.
pub const DEFAULT_CONTROL_PERIOD: Duration = Duration::from_millis(2);

/// Default length of history used for the rate estimate.
pub const DEFAULT_ESTIMATION_PERIOD: Duration = Duration::from_secs(1);

/// Default number of ACK samples kept.
pub const DEFAULT_SAMPLE_WINDOW_CAPACITY: usize = 1024;

/// Window-rate configurable parameters.
#[derive(Debug, Clone)]
pub struct WindowRateConfig {
    /// Window installed when the connection starts, in segments. It is also
    /// the amount of data assumed in flight when sampling starts.
    initial_cwnd: u32,

    /// Whether `initial_cwnd` overrides the host's window at start.
    initial_cwnd_enabled: bool,

    /// Queue length to steer toward, in segments.
    target_queue_len: i64,

    /// Interval between two window updates.
    control_period: Duration,

    /// Length of history used for the rate estimate.
    estimation_period: Duration,

    /// Max number of ACK samples kept.
    sample_window_capacity: usize,

    /// Constant added to the estimated rate, in segments per second.
    bandwidth_deviation: f64,
}

impl WindowRateConfig {
    pub fn from(conf: &Config) -> Self {
        Self {
            initial_cwnd: conf.initial_congestion_window,
            initial_cwnd_enabled: conf.initial_congestion_window_enabled,
            target_queue_len: conf.target_queue_len,
            control_period: conf.control_period,
            estimation_period: conf.estimation_period,
            sample_window_capacity: conf.sample_window_capacity,
            bandwidth_deviation: conf.bandwidth_deviation,
        }
    }
}

impl Default for WindowRateConfig {
    fn default() -> Self {
        Self {
            initial_cwnd: crate::DEFAULT_INITIAL_CWND,
            initial_cwnd_enabled: true,
            target_queue_len: DEFAULT_TARGET_QUEUE_LEN,
            control_period: DEFAULT_CONTROL_PERIOD,
            estimation_period: DEFAULT_ESTIMATION_PERIOD,
            sample_window_capacity: DEFAULT_SAMPLE_WINDOW_CAPACITY,
            bandwidth_deviation: 0.0,
        }
    }
}

/// Window-rate queue adaptive congestion controller.
#[derive(Debug)]
pub struct WindowRate {
    /// Configuration.
    config: WindowRateConfig,

    /// Whether the algorithm governs the window.
    enabled: bool,

    /// Minimum RTT since activation, in microseconds.
    base_rtt: Option<u64>,

    /// Latest queue length estimate.
    queue_len: i64,

    /// Queue length to steer toward.
    target_queue_len: i64,

    /// Latest delivery rate estimate, in segments per second.
    estimated_bandwidth: f64,

    /// Whether an ACK beyond `start_seq` was seen.
    sampling: bool,

    /// `snd_nxt` when the algorithm was activated.
    start_seq: u32,

    /// Time of the last window update.
    period_start: Option<Instant>,

    /// Segments sent minus segments acked since sampling started.
    outstanding: i64,

    /// ACK samples.
    samples: SampleWindow,

    /// Number of window updates that hit the clamp.
    overshoot_count: u64,

    /// Diagnostic stream.
    trace: Option<TraceWriter>,
}

impl WindowRate {
    pub fn new(config: WindowRateConfig) -> Self {
        let samples = SampleWindow::new(config.sample_window_capacity, Aggregation::Sum);
        let target_queue_len = config.target_queue_len;

        Self {
            config,
            enabled: true,
            base_rtt: None,
            queue_len: target_queue_len,
            target_queue_len,
            estimated_bandwidth: 0.0,
            sampling: false,
            start_seq: 0,
            period_start: None,
            outstanding: 0,
            samples,
            overshoot_count: 0,
            trace: None,
        }
    }

    /// Path delay used to convert the rate into a window, in seconds.
    fn path_delay(&self, sender: &SenderState) -> Option<f64> {
        let base_rtt = self.base_rtt?;
        Some(Duration::from_micros(base_rtt).as_secs_f64() + sender.ack_var.as_secs_f64())
    }

    /// Queue length implied by the given delivery rate.
    fn queue_estimate(&self, bandwidth: f64, sender: &SenderState) -> i64 {
        let delay = match self.path_delay(sender) {
            Some(v) => v,
            None => return self.target_queue_len,
        };

        let in_flight = self.config.initial_cwnd as f64 + self.outstanding as f64;
        (in_flight - (bandwidth + self.config.bandwidth_deviation) * delay) as i64
    }

    /// Recompute the queue length and move the window by its distance to the
    /// target.
    fn control_tick(&mut self, now: Instant, sender: &mut SenderState) {
        let span = self.samples.time_span(now);

        if span >= self.config.estimation_period {
            self.estimated_bandwidth = self.samples.rate(now);
            self.queue_len = self.queue_estimate(self.estimated_bandwidth, sender);
            self.samples
                .evict_older_than(now, self.config.estimation_period);
        } else if span.is_zero() {
            // Not a single interval measured yet, leave the window alone.
            self.estimated_bandwidth = 0.0;
            self.queue_len = self.target_queue_len;
        } else {
            self.estimated_bandwidth = self.samples.rate(now);
            self.queue_len = self.queue_estimate(self.estimated_bandwidth, sender);
        }

        let diff = self.queue_len.saturating_sub(self.target_queue_len);
        let cwnd = sender.cwnd as i64;
        sender.cwnd = if cwnd <= diff {
            0
        } else {
            cwnd.saturating_sub(diff).min(u32::MAX as i64) as u32
        };

        trace!(
            "{}. tick span={}us rate={:.2} queue_len={} target={} outstanding={} cwnd={}",
            self.name(),
            span.as_micros(),
            self.estimated_bandwidth,
            self.queue_len,
            self.target_queue_len,
            self.outstanding,
            sender.cwnd
        );

        self.period_start = Some(now);
    }

    /// Write the result of a tick to the diagnostic stream.
    fn trace_tick(&mut self, now: Instant, sender: &SenderState, ack: u32) {
        let delay = self.path_delay(sender);
        let record = TickRecord {
            ack,
            cwnd: sender.cwnd,
            queue_len: self.queue_len,
            target_queue_len: self.target_queue_len,
            outstanding: self.outstanding,
            bandwidth: self.estimated_bandwidth,
            bdp: self.estimated_bandwidth * delay.unwrap_or(0.0),
            base_delay: delay.map(|d| d * 1000.0),
            ..Default::default()
        };

        if let Some(trace) = self.trace.as_mut() {
            if let Err(e) = trace.add_record(now, record) {
                warn!("{}. failed to write trace: {:?}", self.name(), e);
            }
        }
    }
}

impl CongestionController for WindowRate {
    fn name(&self) -> &str {
        "SOD"
    }

    fn init(&mut self, now: Instant, sender: &mut SenderState) {
        if self.config.initial_cwnd_enabled {
            sender.cwnd = self.config.initial_cwnd;
            debug!("{}. initial congestion window {}", self.name(), sender.cwnd);
        }

        self.on_activate(sender);
    }

    fn on_activate(&mut self, sender: &SenderState) {
        self.enabled = true;
        self.base_rtt = None;
        self.target_queue_len = self.config.target_queue_len;
        self.queue_len = self.target_queue_len;
        self.estimated_bandwidth = 0.0;
        self.sampling = false;
        self.start_seq = sender.snd_nxt;
        self.period_start = None;
        self.outstanding = 0;
        self.samples.clear();
    }

    fn on_deactivate(&mut self) {
        self.enabled = false;
    }

    fn on_sent(&mut self, now: Instant, segments: u32) {
        if self.enabled && self.sampling {
            self.outstanding = self.outstanding.saturating_add(segments as i64);
        }
    }

    fn on_ack(&mut self, now: Instant, sender: &SenderState, sample: AckSample) {
        let rtt = match sample.rtt_micros() {
            Some(v) => v,
            None => return,
        };

        self.base_rtt = Some(self.base_rtt.map_or(rtt, |base| base.min(rtt)));

        if !self.enabled {
            return;
        }

        if self.sampling {
            self.outstanding = self.outstanding.saturating_sub(sample.acked as i64);
            self.samples.put(now, sample.acked as u64);
        } else if seq::after(sender.snd_una, self.start_seq) {
            // The first ACK for data sent after activation.
            self.sampling = true;
            self.period_start = Some(now);
            self.samples.put(now, sample.acked as u64);

            trace!(
                "{}. sampling starts, snd_una={} start_seq={}",
                self.name(),
                sender.snd_una,
                self.start_seq
            );
        }
    }

    fn cong_avoid(&mut self, now: Instant, sender: &mut SenderState, ack: u32, in_flight: u32) {
        if !self.enabled {
            reno::reno_cong_avoid(sender, in_flight);
            return;
        }

        let due = self.period_start.map_or(true, |start| {
            now.saturating_duration_since(start) >= self.config.control_period
        });
        if due {
            self.control_tick(now, sender);
        }

        let wanted = sender.cwnd;
        if sender.bound_cwnd(MIN_CWND) {
            self.overshoot_count = self.overshoot_count.saturating_add(1);
            warn!(
                "{}. cwnd overshoot {} clamped to {}",
                self.name(),
                wanted,
                sender.cwnd
            );
        }

        if due {
            self.trace_tick(now, sender, ack);
        }
    }

    fn ssthresh(&self, sender: &SenderState) -> u32 {
        // No multiplicative decrease, the queue estimate drives the window.
        sender.cwnd
    }

    fn is_active(&self) -> bool {
        self.enabled
    }

    fn diagnostics(&self) -> ControllerInfo {
        ControllerInfo {
            enabled: self.enabled,
            base_rtt: self.base_rtt,
            min_rtt: None,
            rtt_count: 0,
            queue_len: self.queue_len,
            target_queue_len: self.target_queue_len,
            estimated_bandwidth: Some(self.estimated_bandwidth),
            overshoot_count: self.overshoot_count,
        }
    }

    fn set_trace(&mut self, trace: TraceWriter) {
        self.trace = Some(trace);
    }

    fn flush_trace(&mut self) -> Result<()> {
        match self.trace.as_mut() {
            Some(trace) => trace.flush(),
            None => Ok(()),
        }
    }
}
