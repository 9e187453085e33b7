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

//! RTT-histogram queue adaptive congestion control.
//!
//! Each RTT sample above the base RTT carries some queuing delay. Walking the
//! host's histogram of recent ACK inter-arrival gaps backward, the queuing
//! delay is converted into the number of packets that drained from the
//! bottleneck during that time, which is the queue length seen by the
//! sample.
//!
//! The window follows the Vegas round structure: once per RTT, using the
//! smallest queue length seen in the round, the window either drops to match
//! the measured rate (leaving slow start), or moves one segment toward a
//! target queue length.

use std::time::Instant;

use log::*;

use super::reno;
use super::AckSample;
use super::CongestionController;
use super::ControllerInfo;
use super::MIN_CWND;
use crate::connection::RttHistogram;
use crate::connection::SenderState;
use crate::seq;
use crate::Config;

/// Fixed point shift used by the Vegas window arithmetic.
const V_PARAM_SHIFT: u32 = 1;

/// Default target queue length.
pub const DEFAULT_DELAY_TARGET_QUEUE_LEN: u32 = 4 << V_PARAM_SHIFT;

/// Rounds with no more RTT samples than this are left to Reno, since they
/// most likely carried delayed ACKs only.
const MIN_RTT_SAMPLES: u32 = 2;

/// Queue adaptive configurable parameters.
#[derive(Debug, Clone)]
pub struct QueueDelayConfig {
    /// Queue length to steer toward.
    target_queue_len: u32,
}

impl QueueDelayConfig {
    pub fn from(conf: &Config) -> Self {
        Self {
            target_queue_len: conf.delay_target_queue_len,
        }
    }
}

impl Default for QueueDelayConfig {
    fn default() -> Self {
        Self {
            target_queue_len: DEFAULT_DELAY_TARGET_QUEUE_LEN,
        }
    }
}

/// Translate a queuing delay into a queue length, using the ACK
/// inter-arrival gaps recorded in `histogram`.
///
/// The walk starts at the newest gap and moves backward, one packet per gap
/// consumed, until the delay is covered or the oldest gap is reached.
pub fn estimate_queue_len(histogram: &RttHistogram, queuing_us: u64) -> u32 {
    if queuing_us == 0 {
        return 0;
    }

    let newest = match histogram.newest() {
        Some(v) => v,
        None => return 0,
    };

    let newest_delta = histogram.get(newest);
    if queuing_us < newest_delta {
        return 1;
    }

    let mut remain = queuing_us - newest_delta;
    let mut index = newest;
    let mut queue_len: u32 = 0;
    while remain > 0 && index != histogram.head() {
        index = histogram.prev(index);
        let delta = histogram.get(index);

        queue_len += 1;
        if remain > delta {
            remain -= delta;
        } else {
            break;
        }
    }

    // The newest gap.
    queue_len + 1
}

/// RTT-histogram queue adaptive congestion controller.
#[derive(Debug)]
pub struct QueueDelay {
    /// Configuration.
    config: QueueDelayConfig,

    /// Whether the algorithm governs the window.
    enabled: bool,

    /// Minimum RTT since init, in microseconds.
    base_rtt: Option<u64>,

    /// Minimum RTT of the current round, in microseconds.
    min_rtt: Option<u64>,

    /// Number of RTT samples in the current round.
    rtt_count: u32,

    /// Queue length of the latest sample.
    cur_queue_len: u32,

    /// Minimum queue length of the current round.
    min_queue_len: Option<u32>,

    /// Minimum queue length of the previous round.
    prev_queue_len: u32,

    /// Left edge of the previous round.
    beg_snd_una: u32,

    /// Right edge of the current round.
    beg_snd_nxt: u32,

    /// Congestion window when the current round started.
    beg_snd_cwnd: u32,

    /// Number of window updates that hit the clamp.
    overshoot_count: u64,
}

impl QueueDelay {
    pub fn new(config: QueueDelayConfig) -> Self {
        Self {
            config,
            enabled: true,
            base_rtt: None,
            min_rtt: None,
            rtt_count: 0,
            cur_queue_len: 0,
            min_queue_len: None,
            prev_queue_len: 0,
            beg_snd_una: 0,
            beg_snd_nxt: 0,
            beg_snd_cwnd: 0,
            overshoot_count: 0,
        }
    }

    /// The once per RTT window adjustment.
    fn end_of_round(&mut self, sender: &mut SenderState, in_flight: u32) {
        // Window of data sent during the previous round, all acked by now.
        let old_wnd = self.beg_snd_nxt.wrapping_sub(self.beg_snd_una) / sender.mss;
        let old_snd_cwnd = self.beg_snd_cwnd;

        self.beg_snd_una = self.beg_snd_nxt;
        self.beg_snd_nxt = sender.snd_nxt;
        self.beg_snd_cwnd = sender.cwnd;

        match (self.base_rtt, self.min_rtt, self.min_queue_len) {
            (Some(base_rtt), Some(min_rtt), Some(min_queue_len))
                if self.rtt_count > MIN_RTT_SAMPLES =>
            {
                self.adjust_cwnd(sender, old_wnd, old_snd_cwnd, base_rtt, min_rtt, min_queue_len);
            }
            _ => reno::reno_cong_avoid(sender, in_flight),
        }

        trace!(
            "{}. round end rtt_count={} min_rtt={:?} min_queue_len={:?} cwnd={} ssthresh={}",
            self.name(),
            self.rtt_count,
            self.min_rtt,
            self.min_queue_len,
            sender.cwnd,
            sender.ssthresh
        );

        self.prev_queue_len = self.min_queue_len.unwrap_or(u32::MAX);
        self.rtt_count = 0;
        self.min_rtt = None;
        self.min_queue_len = None;
    }

    fn adjust_cwnd(
        &mut self,
        sender: &mut SenderState,
        old_wnd: u32,
        old_snd_cwnd: u32,
        base_rtt: u64,
        min_rtt: u64,
        min_queue_len: u32,
    ) {
        // Window matching the actual rate over the base RTT, with
        // V_PARAM_SHIFT fractional bits.
        let target_cwnd = ((old_wnd as u64 * base_rtt) << V_PARAM_SHIFT) / min_rtt;
        let target_cwnd = (target_cwnd >> V_PARAM_SHIFT).min(u32::MAX as u64 - 1) as u32;

        if min_queue_len > 1 && sender.ssthresh > MIN_CWND {
            // Queue building up in slow start, match the actual rate.
            sender.ssthresh = MIN_CWND;
            sender.cwnd = sender.cwnd.min(target_cwnd + 1);
            debug!(
                "{}. leave slow start, queue_len={} cwnd={}",
                self.name(),
                min_queue_len,
                sender.cwnd
            );
        } else if sender.in_slow_start() {
            reno::slow_start(sender);
        } else {
            let next_snd_cwnd = if min_queue_len > self.config.target_queue_len {
                old_snd_cwnd.saturating_sub(1)
            } else {
                old_snd_cwnd.saturating_add(1)
            };

            if next_snd_cwnd > sender.cwnd {
                sender.cwnd += 1;
            } else if next_snd_cwnd < sender.cwnd {
                sender.cwnd -= 1;
            }
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
    }
}

impl CongestionController for QueueDelay {
    fn name(&self) -> &str {
        "SOD_DELAY"
    }

    fn init(&mut self, now: Instant, sender: &mut SenderState) {
        self.base_rtt = None;
        self.on_activate(sender);
    }

    fn on_activate(&mut self, sender: &SenderState) {
        self.enabled = true;
        self.beg_snd_una = sender.snd_una;
        self.beg_snd_nxt = sender.snd_nxt;
        self.beg_snd_cwnd = sender.cwnd;
        self.rtt_count = 0;
        self.min_rtt = None;
        self.min_queue_len = None;
    }

    fn on_deactivate(&mut self) {
        self.enabled = false;
    }

    fn on_ack(&mut self, now: Instant, sender: &SenderState, sample: AckSample) {
        let rtt = match sample.rtt_micros() {
            Some(v) => v,
            None => return,
        };

        let base_rtt = self.base_rtt.map_or(rtt, |base| base.min(rtt));
        self.base_rtt = Some(base_rtt);

        let queue_len = estimate_queue_len(&sender.rtt_histogram, rtt - base_rtt);
        self.cur_queue_len = queue_len;
        self.min_queue_len = Some(self.min_queue_len.map_or(queue_len, |q| q.min(queue_len)));
        self.min_rtt = Some(self.min_rtt.map_or(rtt, |r| r.min(rtt)));
        self.rtt_count = self.rtt_count.saturating_add(1);
    }

    fn cong_avoid(&mut self, now: Instant, sender: &mut SenderState, ack: u32, in_flight: u32) {
        if !self.enabled {
            reno::reno_cong_avoid(sender, in_flight);
            return;
        }

        if seq::after(ack, self.beg_snd_nxt) {
            self.end_of_round(sender, in_flight);
        } else if sender.in_slow_start() {
            reno::slow_start(sender);
        }
    }

    fn ssthresh(&self, sender: &SenderState) -> u32 {
        if self.prev_queue_len <= self.config.target_queue_len {
            // Not congested, cut by one fifth.
            ((sender.cwnd as u64 * 4 / 5) as u32).max(MIN_CWND)
        } else {
            reno::reno_ssthresh(sender)
        }
    }

    fn is_active(&self) -> bool {
        self.enabled
    }

    fn diagnostics(&self) -> ControllerInfo {
        ControllerInfo {
            enabled: self.enabled,
            base_rtt: self.base_rtt,
            min_rtt: self.min_rtt,
            rtt_count: self.rtt_count,
            queue_len: self.cur_queue_len as i64,
            target_queue_len: self.config.target_queue_len as i64,
            estimated_bandwidth: None,
            overshoot_count: self.overshoot_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion_control::CongestionState;
    use rand::rngs::StdRng;
    use rand::Rng;
    use rand::SeedableRng;
    use std::time::Duration;

    fn us(n: u64) -> Duration {
        Duration::from_micros(n)
    }

    fn histogram(len: usize, deltas: &[u64]) -> RttHistogram {
        let mut h = RttHistogram::new(len);
        for d in deltas {
            h.record(us(*d));
        }
        h
    }

    #[test]
    fn queue_len_trivial() {
        let empty = RttHistogram::new(8);
        assert_eq!(estimate_queue_len(&empty, 5000), 0);

        let h = histogram(8, &[100, 200, 300]);
        assert_eq!(estimate_queue_len(&h, 0), 0);
        assert_eq!(estimate_queue_len(&h, 250), 1);
        assert_eq!(estimate_queue_len(&h, 300), 1);
    }

    #[test]
    fn queue_len_walk() {
        let h = histogram(8, &[100, 200, 300]);

        // 300 from the newest gap, the remaining 150 fits in the next one.
        assert_eq!(estimate_queue_len(&h, 450), 2);
        assert_eq!(estimate_queue_len(&h, 500), 2);

        // Every gap consumed.
        assert_eq!(estimate_queue_len(&h, 700), 3);

        // The walk stops at the oldest gap.
        assert_eq!(estimate_queue_len(&h, 10_000), 3);
    }

    #[test]
    fn queue_len_wrap_around() {
        // Only 300, 400 and 500 survive, the oldest one sits at the end of
        // the buffer.
        let h = histogram(3, &[100, 200, 300, 400, 500]);

        assert_eq!(estimate_queue_len(&h, 850), 2);
        assert_eq!(estimate_queue_len(&h, 1150), 3);
        assert_eq!(estimate_queue_len(&h, 2200), 3);
    }

    #[test]
    fn queue_len_single_entry() {
        let h = histogram(4, &[100]);
        assert_eq!(estimate_queue_len(&h, 99), 1);
        assert_eq!(estimate_queue_len(&h, 5000), 1);
    }

    /// A sender with 32 gaps of 1ms in the histogram, and a controller just
    /// initialized on it.
    fn new_sod_delay() -> (QueueDelay, SenderState) {
        let mut sender = SenderState::new(1000, 20);
        sender.snd_una = 0;
        sender.snd_nxt = 20_000;
        for _ in 0..32 {
            sender.rtt_histogram.record(us(1000));
        }

        let mut sod = QueueDelay::new(QueueDelayConfig::default());
        sod.init(Instant::now(), &mut sender);
        (sod, sender)
    }

    fn ack_n(sod: &mut QueueDelay, sender: &SenderState, n: usize, rtt: Duration) {
        let now = Instant::now();
        for _ in 0..n {
            sod.on_ack(now, sender, AckSample::new(1, rtt));
        }
    }

    #[test]
    fn sod_delay_on_ack() {
        let (mut sod, sender) = new_sod_delay();
        assert_eq!(sod.name(), "SOD_DELAY");

        sod.on_ack(Instant::now(), &sender, AckSample::without_rtt(1));
        assert_eq!(sod.rtt_count, 0);
        assert_eq!(sod.base_rtt, None);

        ack_n(&mut sod, &sender, 1, us(9_999));
        assert_eq!(sod.base_rtt, Some(10_000));
        assert_eq!(sod.cur_queue_len, 0);

        // 5ms of queuing over 1ms gaps.
        ack_n(&mut sod, &sender, 1, us(14_999));
        assert_eq!(sod.cur_queue_len, 5);
        assert_eq!(sod.min_queue_len, Some(0));
        assert_eq!(sod.min_rtt, Some(10_000));
        assert_eq!(sod.rtt_count, 2);

        let info = sod.diagnostics();
        assert_eq!(info.base_rtt, Some(10_000));
        assert_eq!(info.queue_len, 5);
        assert_eq!(info.target_queue_len, 8);
        assert_eq!(info.estimated_bandwidth, None);
    }

    #[test]
    fn sod_delay_round_gating() {
        let (mut sod, mut sender) = new_sod_delay();
        let now = Instant::now();
        ack_n(&mut sod, &sender, 5, us(9_999));

        // Round not complete, slow start goes on.
        sod.cong_avoid(now, &mut sender, 20_000, 20);
        assert_eq!(sender.cwnd, 21);
        assert_eq!(sod.rtt_count, 5);

        // Out of slow start nothing moves until the round completes.
        sender.ssthresh = 10;
        sod.cong_avoid(now, &mut sender, 15_000, 21);
        assert_eq!(sender.cwnd, 21);
        assert_eq!(sod.rtt_count, 5);
        assert_eq!(sod.beg_snd_nxt, 20_000);
    }

    #[test]
    fn sod_delay_few_samples_falls_back_to_reno() {
        let (mut sod, mut sender) = new_sod_delay();
        let now = Instant::now();
        ack_n(&mut sod, &sender, 2, us(14_999));

        sender.snd_nxt = 40_000;
        sod.cong_avoid(now, &mut sender, 20_001, 20);

        // Reno slow start for this round.
        assert_eq!(sender.cwnd, 21);
        assert_eq!(sender.ssthresh, crate::connection::INFINITE_SSTHRESH);

        // Round boundaries roll and the minima are reset.
        assert_eq!(sod.beg_snd_una, 20_000);
        assert_eq!(sod.beg_snd_nxt, 40_000);
        assert_eq!(sod.beg_snd_cwnd, 20);
        assert_eq!(sod.rtt_count, 0);
        assert_eq!(sod.min_rtt, None);
        assert_eq!(sod.min_queue_len, None);
        assert_eq!(sod.prev_queue_len, 0);
        assert_eq!(sod.base_rtt, Some(15_000));
    }

    #[test]
    fn sod_delay_rounds() {
        let (mut sod, mut sender) = new_sod_delay();
        let now = Instant::now();

        // First round only learns the base RTT.
        ack_n(&mut sod, &sender, 1, us(9_999));
        sender.snd_nxt = 40_000;
        sod.cong_avoid(now, &mut sender, 20_001, 20);
        assert_eq!(sender.cwnd, 21);

        // A queue of 5 builds up: leave slow start at the actual rate.
        // target = (20 * 10ms << 1) / 15ms = 26, halved plus one is 14.
        ack_n(&mut sod, &sender, 3, us(14_999));
        sender.snd_nxt = 60_000;
        sod.cong_avoid(now, &mut sender, 40_001, 21);
        assert_eq!(sender.ssthresh, 2);
        assert_eq!(sender.cwnd, 14);
        assert_eq!(sod.prev_queue_len, 5);
        assert_eq!(sod.beg_snd_cwnd, 21);

        // No queue: one segment up, toward the previous window plus one.
        ack_n(&mut sod, &sender, 3, us(9_999));
        sender.snd_nxt = 80_000;
        sod.cong_avoid(now, &mut sender, 60_001, 14);
        assert_eq!(sender.cwnd, 15);
        assert_eq!(sod.prev_queue_len, 0);

        // A queue of 15 above the target of 8: one segment down.
        ack_n(&mut sod, &sender, 3, us(24_999));
        sender.snd_nxt = 100_000;
        sod.cong_avoid(now, &mut sender, 80_001, 15);
        assert_eq!(sender.cwnd, 14);
        assert_eq!(sod.prev_queue_len, 15);
    }

    #[test]
    fn sod_delay_cwnd_floor() {
        let (mut sod, mut sender) = new_sod_delay();
        let now = Instant::now();
        ack_n(&mut sod, &sender, 1, us(9_999));
        sender.snd_nxt = 40_000;
        sod.cong_avoid(now, &mut sender, 20_001, 20);

        // A queue of 21 asks for one segment less than 2.
        sender.cwnd = 2;
        sender.ssthresh = 1;
        sod.beg_snd_cwnd = 2;
        ack_n(&mut sod, &sender, 3, us(30_000));
        sender.snd_nxt = 60_000;
        sod.cong_avoid(now, &mut sender, 40_001, 2);
        assert_eq!(sod.prev_queue_len, 21);
        assert_eq!(sender.cwnd, 2);
    }

    #[test]
    fn sod_delay_ssthresh() {
        let (mut sod, mut sender) = new_sod_delay();
        sender.cwnd = 20;

        sod.prev_queue_len = 8;
        assert_eq!(sod.ssthresh(&sender), 16);

        sod.prev_queue_len = 9;
        assert_eq!(sod.ssthresh(&sender), 10);

        sender.cwnd = 2;
        assert_eq!(sod.ssthresh(&sender), 2);
        sod.prev_queue_len = 0;
        assert_eq!(sod.ssthresh(&sender), 2);

        sender.ssthresh = 30;
        assert_eq!(sod.min_cwnd(&sender), 15);
    }

    #[test]
    fn sod_delay_init_and_activate() {
        let (mut sod, mut sender) = new_sod_delay();
        let now = Instant::now();
        ack_n(&mut sod, &sender, 3, us(9_999));

        // Activation keeps the base RTT, init drops it.
        sender.snd_nxt = 50_000;
        sod.set_state(&sender, CongestionState::Loss);
        sod.set_state(&sender, CongestionState::Open);
        assert_eq!(sod.base_rtt, Some(10_000));
        assert_eq!(sod.rtt_count, 0);
        assert_eq!(sod.beg_snd_nxt, 50_000);

        sod.cwnd_event(now, &mut sender, crate::congestion_control::CwndEvent::TxStart);
        assert_eq!(sod.base_rtt, None);
        assert!(sod.is_active());
    }

    #[test]
    fn sod_delay_fallback_when_disabled() {
        let (mut sod, mut sender) = new_sod_delay();
        let now = Instant::now();
        sod.set_state(&sender, CongestionState::Disorder);

        sender.ssthresh = 10;
        sender.cwnd = 3;
        sender.cwnd_cnt = 3;
        sod.cong_avoid(now, &mut sender, 20_001, 3);
        assert_eq!(sender.cwnd, 4);
        assert_eq!(sod.beg_snd_nxt, 20_000);
    }

    #[test]
    fn sod_delay_cwnd_bounds_random() {
        let mut rng = StdRng::seed_from_u64(11);
        let (mut sod, mut sender) = new_sod_delay();
        sender.cwnd_clamp = 300;
        let now = Instant::now();

        for _ in 0..5000 {
            match rng.gen_range(0..10) {
                0 => {
                    let state = if rng.gen_bool(0.8) {
                        CongestionState::Open
                    } else {
                        CongestionState::Recovery
                    };
                    sod.set_state(&sender, state);
                }
                1 => sender.ssthresh = sod.ssthresh(&sender),
                2..=5 => {
                    sender
                        .rtt_histogram
                        .record(us(rng.gen_range(0..3000)));
                    let rtt = us(rng.gen_range(0..100_000));
                    sod.on_ack(now, &sender, AckSample::new(1, rtt));
                }
                _ => {
                    sender.snd_nxt = sender.snd_nxt.wrapping_add(rng.gen_range(0..5000));
                    let ack = sender.snd_nxt.wrapping_sub(rng.gen_range(0..3000));
                    let was_round = sod.is_active()
                        && seq::after(ack, sod.beg_snd_nxt)
                        && sod.rtt_count > MIN_RTT_SAMPLES
                        && sod.base_rtt.is_some();
                    let in_flight = sender.cwnd;
                    sod.cong_avoid(now, &mut sender, ack, in_flight);
                    if was_round {
                        assert!(sender.cwnd >= MIN_CWND);
                        assert!(sender.cwnd <= sender.cwnd_clamp);
                    }
                }
            }
        }
    }
}
