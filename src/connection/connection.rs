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

//! Host-owned sender state shared with congestion controllers.

use std::time::Duration;

use crate::congestion_control::CongestionState;

pub use histogram::RttHistogram;
pub use histogram::DEFAULT_HISTOGRAM_LEN;

/// Slow start threshold meaning "not yet set".
pub const INFINITE_SSTHRESH: u32 = 0x7fff_ffff;

/// Default maximum segment size in bytes.
pub const DEFAULT_MSS: u32 = 1460;

/// The window related part of a TCP sender, as seen by a congestion
/// controller.
///
/// Controllers receive `&SenderState` when they only sample, and
/// `&mut SenderState` when they are allowed to move the window. All window
/// values are counted in segments.
#[derive(Debug, Clone)]
pub struct SenderState {
    /// Next sequence number to be sent.
    pub snd_nxt: u32,

    /// Oldest unacknowledged sequence number.
    pub snd_una: u32,

    /// Maximum segment size in bytes.
    pub mss: u32,

    /// Congestion window in segments.
    pub cwnd: u32,

    /// Upper bound of the congestion window in segments.
    pub cwnd_clamp: u32,

    /// Linear increase counter used during congestion avoidance.
    pub cwnd_cnt: u32,

    /// Slow start threshold in segments.
    pub ssthresh: u32,

    /// Current congestion state.
    pub ca_state: CongestionState,

    /// Extra delay variance measured by the host, added to the base delay
    /// when a controller converts a rate into a window.
    pub ack_var: Duration,

    /// Recent ACK inter-arrival deltas.
    pub rtt_histogram: RttHistogram,
}

impl SenderState {
    pub fn new(mss: u32, initial_cwnd: u32) -> Self {
        Self {
            snd_nxt: 0,
            snd_una: 0,
            mss: mss.max(1),
            cwnd: initial_cwnd,
            cwnd_clamp: u32::MAX,
            cwnd_cnt: 0,
            ssthresh: INFINITE_SSTHRESH,
            ca_state: CongestionState::Open,
            ack_var: Duration::ZERO,
            rtt_histogram: RttHistogram::default(),
        }
    }

    /// Check if the window is still growing exponentially.
    pub fn in_slow_start(&self) -> bool {
        self.cwnd <= self.ssthresh
    }

    /// Check if the sender is limited by the congestion window rather than
    /// by the application.
    pub fn is_cwnd_limited(&self, in_flight: u32) -> bool {
        in_flight >= self.cwnd
    }

    /// Saturate the congestion window to `[min_cwnd, cwnd_clamp]`.
    ///
    /// Return true if the window was above the clamp.
    pub fn bound_cwnd(&mut self, min_cwnd: u32) -> bool {
        let max_cwnd = self.cwnd_clamp.max(min_cwnd);
        let overshoot = self.cwnd > max_cwnd;
        self.cwnd = self.cwnd.clamp(min_cwnd, max_cwnd);
        overshoot
    }
}

impl Default for SenderState {
    fn default() -> Self {
        Self::new(DEFAULT_MSS, crate::DEFAULT_INITIAL_CWND)
    }
}

mod histogram;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_defaults() {
        let s = SenderState::default();
        assert_eq!(s.mss, DEFAULT_MSS);
        assert_eq!(s.cwnd, crate::DEFAULT_INITIAL_CWND);
        assert_eq!(s.ssthresh, INFINITE_SSTHRESH);
        assert_eq!(s.ca_state, CongestionState::Open);
        assert!(s.in_slow_start());
    }

    #[test]
    fn sender_cwnd_limited() {
        let s = SenderState::new(1000, 10);
        assert!(s.is_cwnd_limited(10));
        assert!(s.is_cwnd_limited(12));
        assert!(!s.is_cwnd_limited(9));
    }

    #[test]
    fn sender_bound_cwnd() {
        let mut s = SenderState::new(1000, 0);
        s.cwnd_clamp = 100;

        assert!(!s.bound_cwnd(2));
        assert_eq!(s.cwnd, 2);

        s.cwnd = 150;
        assert!(s.bound_cwnd(2));
        assert_eq!(s.cwnd, 100);

        // A clamp below the floor never wins over the floor.
        s.cwnd_clamp = 1;
        s.cwnd = 0;
        s.bound_cwnd(2);
        assert_eq!(s.cwnd, 2);
    }
}
