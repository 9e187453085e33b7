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

//! QA-TCP is a queue-length adaptive, delay-based congestion control library
//! for TCP-like senders.
//!
//! Instead of reacting to loss, the controllers estimate how many packets
//! the flow keeps in the bottleneck queue and steer the congestion window so
//! that the queue stays at a small target length.
//!
//! ## Algorithms
//!
//! * **Window-Rate** (`sod`): estimates the delivery rate from a sliding
//!   window of ACK samples and derives the queue length as the data in
//!   flight beyond the bandwidth-delay product. The window is moved by the
//!   distance between the estimated and the target queue length on a fixed
//!   control period.
//! * **RTT-Histogram** (`sod_delay`): converts the queuing delay of each RTT
//!   sample into a queue length using the histogram of recent ACK
//!   inter-arrival gaps, and adjusts the window once per RTT in the Vegas
//!   manner.
//!
//! Both controllers hand the window back to Reno whenever the sender leaves
//! the Open congestion state.
//!
//! ## Get started
//!
//! The host owns a [`SenderState`], builds a controller from a [`Config`]
//! and drives it through the [`CongestionController`] callbacks:
//!
//! ```
//! use std::time::Duration;
//! use std::time::Instant;
//! use qatcp::*;
//!
//! let mut config = Config::new()?;
//! config.set_congestion_control_algorithm(CongestionControlAlgorithm::QueueDelay);
//!
//! let mut cc = build_congestion_controller(&config);
//! let mut sender = SenderState::default();
//! let now = Instant::now();
//! cc.init(now, &mut sender);
//!
//! sender.snd_una = 1460;
//! cc.on_ack(now, &sender, AckSample::new(1, Duration::from_millis(20)));
//! let in_flight = sender.cwnd;
//! cc.cong_avoid(now, &mut sender, 1460, in_flight);
//! assert!(cc.is_active());
//! # Ok::<(), qatcp::Error>(())
//! ```

#![allow(unused_imports)]
#![allow(dead_code)]

use std::time::Duration;

/// Default initial congestion window in segments.
pub const DEFAULT_INITIAL_CWND: u32 = 150;

/// The rate estimate needs at least this much history.
const MIN_ESTIMATION_PERIOD: Duration = Duration::from_millis(1);

/// A specialized [`Result`] type for qatcp operations.
///
/// [`Result`]: https://doc.rust-lang.org/std/result/enum.Result.html
pub type Result<T> = std::result::Result<T, Error>;

/// Configurations about congestion control.
#[derive(Debug, Clone)]
pub struct Config {
    /// The congestion control algorithm used for a connection.
    pub(crate) congestion_control_algorithm: CongestionControlAlgorithm,

    /// The initial congestion window in segments.
    pub(crate) initial_congestion_window: u32,

    /// Whether the initial congestion window overrides the host's window.
    pub(crate) initial_congestion_window_enabled: bool,

    /// Window-Rate target queue length in segments.
    pub(crate) target_queue_len: i64,

    /// RTT-Histogram target queue length.
    pub(crate) delay_target_queue_len: u32,

    /// Interval between two Window-Rate window updates.
    pub(crate) control_period: Duration,

    /// Length of history used for the Window-Rate rate estimate.
    pub(crate) estimation_period: Duration,

    /// Max number of ACK samples kept by Window-Rate.
    pub(crate) sample_window_capacity: usize,

    /// Constant added to the estimated rate, in segments per second.
    pub(crate) bandwidth_deviation: f64,
}

impl Config {
    /// Create default configuration.
    pub fn new() -> Result<Self> {
        Ok(Self {
            congestion_control_algorithm: CongestionControlAlgorithm::WindowRate,
            initial_congestion_window: DEFAULT_INITIAL_CWND,
            initial_congestion_window_enabled: true,
            target_queue_len: congestion_control::DEFAULT_TARGET_QUEUE_LEN,
            delay_target_queue_len: congestion_control::DEFAULT_DELAY_TARGET_QUEUE_LEN,
            control_period: congestion_control::DEFAULT_CONTROL_PERIOD,
            estimation_period: congestion_control::DEFAULT_ESTIMATION_PERIOD,
            sample_window_capacity: congestion_control::DEFAULT_SAMPLE_WINDOW_CAPACITY,
            bandwidth_deviation: 0.0,
        })
    }

    /// Set congestion control algorithm that the connection would use.
    /// The default value is WindowRate.
    pub fn set_congestion_control_algorithm(&mut self, cca: CongestionControlAlgorithm) {
        self.congestion_control_algorithm = cca;
    }

    /// Set the initial congestion window in segments.
    /// The default value is 150.
    pub fn set_initial_congestion_window(&mut self, packets: u32) {
        self.initial_congestion_window = packets;
    }

    /// Set whether the initial congestion window is installed when a
    /// connection starts. If disabled, the host's window is kept, but the
    /// Window-Rate controller still uses the initial congestion window as
    /// the amount of data in flight when sampling starts.
    /// The default value is true.
    pub fn enable_initial_congestion_window(&mut self, v: bool) {
        self.initial_congestion_window_enabled = v;
    }

    /// Set the Window-Rate target queue length in segments.
    /// The default value is 10.
    pub fn set_target_queue_len(&mut self, packets: i64) {
        self.target_queue_len = packets;
    }

    /// Set the RTT-Histogram target queue length.
    /// The default value is 8.
    pub fn set_delay_target_queue_len(&mut self, v: u32) {
        self.delay_target_queue_len = v;
    }

    /// Set the interval between two Window-Rate window updates in
    /// milliseconds. Zero means updating on every chance.
    /// The default value is 2 milliseconds.
    pub fn set_control_period(&mut self, millis: u64) {
        self.control_period = Duration::from_millis(millis);
    }

    /// Set the length of history used for the Window-Rate rate estimate in
    /// milliseconds.
    /// The default value is 1000 milliseconds.
    pub fn set_estimation_period(&mut self, millis: u64) {
        self.estimation_period = Duration::from_millis(millis).max(MIN_ESTIMATION_PERIOD);
    }

    /// Set the max number of ACK samples kept by Window-Rate.
    /// The default value is 1024.
    pub fn set_sample_window_capacity(&mut self, v: usize) {
        self.sample_window_capacity = v.max(1);
    }

    /// Set the constant added to the estimated rate, in segments per second.
    /// The default value is 0.
    pub fn set_bandwidth_deviation(&mut self, v: f64) {
        self.bandwidth_deviation = if v.is_finite() { v.max(0.0) } else { 0.0 };
    }
}


pub use crate::congestion_control::build_congestion_controller;
pub use crate::congestion_control::build_traced_congestion_controller;
pub use crate::congestion_control::AckSample;
pub use crate::congestion_control::CongestionControlAlgorithm;
pub use crate::congestion_control::CongestionController;
pub use crate::congestion_control::CongestionState;
pub use crate::congestion_control::ControllerInfo;
pub use crate::congestion_control::CwndEvent;
pub use crate::connection::RttHistogram;
pub use crate::connection::SenderState;
pub use crate::error::Error;
pub use crate::trace::TraceWriter;

#[path = "connection/connection.rs"]
pub mod connection;

#[path = "congestion_control/congestion_control.rs"]
pub mod congestion_control;

pub mod error;
pub mod seq;
pub mod trace;
