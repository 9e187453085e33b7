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

#![no_main]

use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use lazy_static::lazy_static;
use libfuzzer_sys::fuzz_target;

use qatcp::build_congestion_controller;
use qatcp::AckSample;
use qatcp::Config;
use qatcp::CongestionControlAlgorithm;
use qatcp::CongestionState;
use qatcp::CwndEvent;
use qatcp::SenderState;

const CWND_CLAMP: u32 = 1000;

lazy_static! {
    static ref CONFIGS: Mutex<Vec<Config>> = {
        let mut confs = Vec::new();
        for algor in [
            CongestionControlAlgorithm::WindowRate,
            CongestionControlAlgorithm::QueueDelay,
        ] {
            let mut conf = Config::new().unwrap();
            conf.set_congestion_control_algorithm(algor);
            conf.set_estimation_period(50);
            confs.push(conf);
        }
        Mutex::new(confs)
    };
}

// Each 4-byte chunk is one host event: kind, time step and a 16-bit argument.
fuzz_target!(|data: &[u8]| {
    let confs = CONFIGS.lock().unwrap();

    for conf in confs.iter() {
        let mut cc = build_congestion_controller(conf);
        let mut sender = SenderState::new(1460, 10);
        sender.cwnd_clamp = CWND_CLAMP;
        let mut now = Instant::now();
        cc.init(now, &mut sender);

        for chunk in data.chunks_exact(4) {
            let arg = u16::from_le_bytes([chunk[2], chunk[3]]) as u32;
            now += Duration::from_micros(chunk[1] as u64 * 100);

            match chunk[0] % 6 {
                0 => {
                    sender.snd_nxt = sender.snd_nxt.wrapping_add(arg * 16);
                    cc.on_sent(now, arg % 64);
                }
                1 => {
                    sender.snd_una = sender.snd_una.wrapping_add(arg * 16);
                    sender
                        .rtt_histogram
                        .record(Duration::from_micros(chunk[1] as u64 * 10));
                    let sample = if arg & 1 == 0 {
                        AckSample::new(arg % 16, Duration::from_micros(arg as u64 * 10))
                    } else {
                        AckSample::without_rtt(arg % 16)
                    };
                    cc.on_ack(now, &sender, sample);
                }
                2 => {
                    let ack = sender.snd_una;
                    cc.cong_avoid(now, &mut sender, ack, arg);
                    assert!(sender.cwnd >= 2);
                    assert!(sender.cwnd <= CWND_CLAMP);
                }
                3 => {
                    sender.ssthresh = cc.ssthresh(&sender);
                    sender.cwnd = sender.ssthresh.max(cc.min_cwnd(&sender)).max(2);
                    cc.set_state(&sender, CongestionState::Recovery);
                }
                4 => cc.set_state(&sender, CongestionState::Open),
                _ => {
                    let event = match arg % 4 {
                        0 => CwndEvent::TxStart,
                        1 => CwndEvent::CwndRestart,
                        2 => CwndEvent::CompleteCwr,
                        _ => CwndEvent::Loss,
                    };
                    cc.cwnd_event(now, &mut sender, event);
                }
            }
        }

        let _ = cc.diagnostics();
    }
});
