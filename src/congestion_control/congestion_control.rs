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

#![allow(unused_variables)]

use core::str::FromStr;
use std::fmt;
use std::io::Write;
use std::time::Duration;
use std::time::Instant;

use serde::Serialize;
use strum_macros::EnumIter;

use crate::connection::SenderState;
use crate::trace::TraceWriter;
use crate::Config;
use crate::Error;
use crate::Result;
pub use queue_delay::estimate_queue_len;
pub use queue_delay::QueueDelay;
pub use queue_delay::QueueDelayConfig;
pub use queue_delay::DEFAULT_DELAY_TARGET_QUEUE_LEN;
pub use sample_window::Aggregation;
pub use sample_window::SampleWindow;
pub use window_rate::WindowRate;
pub use window_rate::WindowRateConfig;
pub use window_rate::DEFAULT_CONTROL_PERIOD;
pub use window_rate::DEFAULT_ESTIMATION_PERIOD;
pub use window_rate::DEFAULT_SAMPLE_WINDOW_CAPACITY;
pub use window_rate::DEFAULT_TARGET_QUEUE_LEN;

/// The smallest congestion window a controller ever leaves behind, in
/// segments.
pub const MIN_CWND: u32 = 2;

/// Available congestion control algorithm
#[repr(C)]
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, EnumIter)]
pub enum CongestionControlAlgorithm {
    /// Window-rate queue adaptive control ("sod"). It estimates the delivery
    /// rate from a sliding window of ACK samples, derives the bottleneck
    /// queue length from the rate and the base RTT, and steers the window so
    /// that the queue stays at a target length.
    #[default]
    WindowRate,

    /// RTT-histogram queue adaptive control ("sod_delay"). It converts the
    /// queuing delay of each RTT sample into a queue length using the
    /// histogram of recent ACK inter-arrival gaps, and applies a Vegas style
    /// once-per-RTT window adjustment.
    QueueDelay,
}

impl FromStr for CongestionControlAlgorithm {
    type Err = Error;

    fn from_str(algor: &str) -> Result<CongestionControlAlgorithm> {
        if algor.eq_ignore_ascii_case("sod") || algor.eq_ignore_ascii_case("window_rate") {
            Ok(CongestionControlAlgorithm::WindowRate)
        } else if algor.eq_ignore_ascii_case("sod_delay")
            || algor.eq_ignore_ascii_case("rtt_histogram")
        {
            Ok(CongestionControlAlgorithm::QueueDelay)
        } else {
            Err(Error::InvalidConfig("unknown".into()))
        }
    }
}

/// Congestion state of a TCP sender.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, EnumIter)]
pub enum CongestionState {
    /// Normal state, no dubious events.
    #[default]
    Open,

    /// Dubious ACKs (duplicate or selective) were received.
    Disorder,

    /// The window was reduced because of a congestion notification.
    Cwr,

    /// Fast retransmit is in progress.
    Recovery,

    /// A retransmission timeout fired and the window was reset.
    Loss,
}

/// Window events reported by the host.
#[derive(Eq, PartialEq, Debug, Clone, Copy, EnumIter)]
pub enum CwndEvent {
    /// First transmission when no packet is in flight.
    TxStart,

    /// The connection restarts after being idle.
    CwndRestart,

    /// A complete window of data was acknowledged after recovery.
    CompleteCwr,

    /// A retransmission timeout fired.
    Loss,
}

/// Information carried by one acknowledgment.
#[derive(Debug, Clone, Copy, Default)]
pub struct AckSample {
    /// Newly acknowledged data, in segments.
    pub acked: u32,

    /// Round trip time measured for the acknowledgment. `None` means the
    /// host has no valid sample, e.g. the acked segment was retransmitted.
    pub rtt: Option<Duration>,
}

impl AckSample {
    pub fn new(acked: u32, rtt: Duration) -> Self {
        Self {
            acked,
            rtt: Some(rtt),
        }
    }

    /// An acknowledgment without a usable RTT sample.
    pub fn without_rtt(acked: u32) -> Self {
        Self { acked, rtt: None }
    }

    /// Convert the RTT sample into microseconds. The result is never zero.
    pub(crate) fn rtt_micros(&self) -> Option<u64> {
        self.rtt
            .map(|rtt| (rtt.as_micros().min(u64::MAX as u128 - 1) as u64) + 1)
    }
}

/// Read-only snapshot of controller internals, for telemetry.
#[serde_with::skip_serializing_none]
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ControllerInfo {
    /// Whether the delay based algorithm currently governs the window.
    pub enabled: bool,

    /// Minimum RTT since activation, in microseconds.
    pub base_rtt: Option<u64>,

    /// Minimum RTT of the current round, in microseconds.
    pub min_rtt: Option<u64>,

    /// Number of RTT samples taken in the current round.
    pub rtt_count: u32,

    /// Latest queue length estimate.
    pub queue_len: i64,

    /// Queue length the controller steers toward.
    pub target_queue_len: i64,

    /// Estimated delivery rate, in segments per second.
    pub estimated_bandwidth: Option<f64>,

    /// Number of control steps that computed a window above the clamp.
    pub overshoot_count: u64,
}

/// Congestion control interfaces shared by different algorithms.
pub trait CongestionController {
    /// Name of congestion control algorithm.
    fn name(&self) -> &str;

    /// Callback when the connection is established.
    fn init(&mut self, now: Instant, sender: &mut SenderState);

    /// Hand the window over to the delay based algorithm.
    fn on_activate(&mut self, sender: &SenderState);

    /// Hand the window back to the loss based fallback.
    fn on_deactivate(&mut self);

    /// Callback for congestion state transitions.
    fn set_state(&mut self, sender: &SenderState, state: CongestionState) {
        if state == CongestionState::Open {
            self.on_activate(sender);
        } else {
            self.on_deactivate();
        }
    }

    /// Callback for window events. Restarting from idle resets all state,
    /// so that no decision is made on stale samples.
    fn cwnd_event(&mut self, now: Instant, sender: &mut SenderState, event: CwndEvent) {
        if event == CwndEvent::CwndRestart || event == CwndEvent::TxStart {
            self.init(now, sender);
        }
    }

    /// Callback after segments were sent out.
    fn on_sent(&mut self, now: Instant, segments: u32) {}

    /// Callback for each acknowledgment.
    fn on_ack(&mut self, now: Instant, sender: &SenderState, sample: AckSample);

    /// Callback on every chance to grow or shrink the window.
    fn cong_avoid(&mut self, now: Instant, sender: &mut SenderState, ack: u32, in_flight: u32);

    /// Slow start threshold to use when loss recovery starts.
    fn ssthresh(&self, sender: &SenderState) -> u32;

    /// Lower bound of the window while in fast recovery.
    fn min_cwnd(&self, sender: &SenderState) -> u32 {
        reno::reno_min_cwnd(sender)
    }

    /// Check if the delay based algorithm governs the window.
    fn is_active(&self) -> bool;

    /// Snapshot of internal estimates.
    fn diagnostics(&self) -> ControllerInfo;

    /// Set a sink for the per-tick diagnostic stream.
    fn set_trace(&mut self, trace: TraceWriter) {}

    /// Flush the diagnostic stream, if any.
    fn flush_trace(&mut self) -> Result<()> {
        Ok(())
    }
}

impl fmt::Debug for dyn CongestionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "congestion controller {}.", self.name())
    }
}

/// Build a congestion controller.
pub fn build_congestion_controller(conf: &Config) -> Box<dyn CongestionController> {
    match conf.congestion_control_algorithm {
        CongestionControlAlgorithm::WindowRate => {
            Box::new(WindowRate::new(WindowRateConfig::from(conf)))
        }
        CongestionControlAlgorithm::QueueDelay => {
            Box::new(QueueDelay::new(QueueDelayConfig::from(conf)))
        }
    }
}

/// Build a congestion controller whose diagnostic stream goes to `writer`.
pub fn build_traced_congestion_controller(
    conf: &Config,
    writer: Box<dyn Write + Send + Sync>,
    now: Instant,
) -> Result<Box<dyn CongestionController>> {
    let mut cc = build_congestion_controller(conf);
    let mut trace = TraceWriter::new(Some(cc.name().to_string()), writer, now);
    trace.start()?;
    cc.set_trace(trace);
    Ok(cc)
}


mod queue_delay;
pub mod reno;
mod sample_window;
mod window_rate;
