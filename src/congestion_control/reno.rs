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

//! Loss based Reno window rules.
//!
//! The delay based controllers fall back to these rules whenever they are
//! disabled (any congestion state other than Open) or do not have enough
//! RTT samples to trust their own estimates.
//!
//! See <https://www.rfc-editor.org/rfc/rfc5681>.

use super::MIN_CWND;
use crate::connection::SenderState;

/// Slow start: grow the window by one segment per acknowledgment.
pub fn slow_start(sender: &mut SenderState) {
    if sender.cwnd < sender.cwnd_clamp {
        sender.cwnd += 1;
    }
}

/// Additive increase: grow the window by one segment per window of
/// acknowledgments, and only while the sender is window limited.
pub fn reno_cong_avoid(sender: &mut SenderState, in_flight: u32) {
    if !sender.is_cwnd_limited(in_flight) {
        return;
    }

    if sender.in_slow_start() {
        slow_start(sender);
        return;
    }

    if sender.cwnd_cnt >= sender.cwnd {
        if sender.cwnd < sender.cwnd_clamp {
            sender.cwnd += 1;
        }
        sender.cwnd_cnt = 0;
    } else {
        sender.cwnd_cnt += 1;
    }
}

/// Multiplicative decrease: halve the window.
pub fn reno_ssthresh(sender: &SenderState) -> u32 {
    (sender.cwnd >> 1).max(MIN_CWND)
}

/// Lower bound of the window during fast recovery.
pub fn reno_min_cwnd(sender: &SenderState) -> u32 {
    sender.ssthresh / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reno_slow_start() {
        let mut s = SenderState::new(1000, 10);
        s.cwnd_clamp = 11;

        slow_start(&mut s);
        assert_eq!(s.cwnd, 11);

        // Never beyond the clamp.
        slow_start(&mut s);
        assert_eq!(s.cwnd, 11);
    }

    #[test]
    fn reno_app_limited() {
        let mut s = SenderState::new(1000, 10);
        reno_cong_avoid(&mut s, 5);
        assert_eq!(s.cwnd, 10);

        reno_cong_avoid(&mut s, 10);
        assert_eq!(s.cwnd, 11);
    }

    #[test]
    fn reno_additive_increase() {
        let mut s = SenderState::new(1000, 4);
        s.ssthresh = 2;

        // One segment per window of ACKs: cwnd_cnt counts 0..=cwnd.
        for _ in 0..4 {
            reno_cong_avoid(&mut s, 4);
            assert_eq!(s.cwnd, 4);
        }
        reno_cong_avoid(&mut s, 4);
        assert_eq!(s.cwnd, 5);
        assert_eq!(s.cwnd_cnt, 0);
    }

    #[test]
    fn reno_decrease() {
        let mut s = SenderState::new(1000, 20);
        assert_eq!(reno_ssthresh(&s), 10);

        s.cwnd = 3;
        assert_eq!(reno_ssthresh(&s), 2);

        s.ssthresh = 10;
        assert_eq!(reno_min_cwnd(&s), 5);
    }
}
