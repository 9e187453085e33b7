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

//! A single bottleneck link simulation driving a qatcp congestion controller.
//!
//! The sender always has data to send. Segments go through a drop-tail FIFO
//! served at a fixed rate, and each ACK comes back one propagation RTT after
//! its segment left the bottleneck. Time is virtual, so a simulation of many
//! seconds runs in a fraction of that.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::time::Duration;
use std::time::Instant;

use log::debug;
use log::info;
use log::warn;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use qatcp::congestion_control::MIN_CWND;
use qatcp::seq;
use qatcp::AckSample;
use qatcp::CongestionController;
use qatcp::CongestionState;
use qatcp::ControllerInfo;
use qatcp::CwndEvent;
use qatcp::SenderState;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Interval between two progress logs, in virtual time.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Return the log target for the given log file, `stderr` if none.
pub fn log_target(log_file: &Option<String>) -> Result<env_logger::Target> {
    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Ok(env_logger::Target::Pipe(Box::new(file)))
        }
        None => Ok(env_logger::Target::Stderr),
    }
}

/// Bottleneck link parameters.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Service rate of the bottleneck, in segments per second.
    pub rate: f64,

    /// Round trip propagation delay.
    pub base_rtt: Duration,

    /// Bottleneck buffer size, in segments.
    pub buffer: usize,

    /// Max random delay added to each ACK.
    pub jitter: Duration,
}

impl LinkConfig {
    /// Time the bottleneck takes to serve one segment.
    fn service_time(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate.max(1.0))
    }

    /// Bandwidth-delay product, in segments.
    pub fn bdp(&self) -> f64 {
        self.rate * self.base_rtt.as_secs_f64()
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            rate: 1000.0,
            base_rtt: Duration::from_millis(50),
            buffer: 100,
            jitter: Duration::ZERO,
        }
    }
}

/// A segment sent and not yet acknowledged.
#[derive(Debug)]
struct Packet {
    /// First byte of the segment.
    seq: u32,

    /// Time the segment was sent.
    sent_time: Instant,

    /// Time the ACK (or the loss signal) reaches the sender.
    ack_time: Instant,

    /// Whether the bottleneck dropped the segment.
    lost: bool,
}

/// Result of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// Virtual time simulated.
    pub elapsed: Duration,

    /// Segments sent.
    pub sent: u64,

    /// Segments acknowledged.
    pub delivered: u64,

    /// Segments dropped by the bottleneck.
    pub lost: u64,

    /// RTT of every acknowledged segment, in milliseconds.
    pub rtt_samples: Vec<f64>,

    /// Bottleneck queue occupancy seen by every ACK, in segments.
    pub queue_samples: Vec<f64>,

    /// Congestion window at the end of the run.
    pub cwnd: u32,

    /// Controller state at the end of the run.
    pub info: ControllerInfo,
}

impl SimulationReport {
    /// Delivered segments per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.delivered as f64 / secs
    }
}

pub struct Simulation {
    /// Link parameters.
    link: LinkConfig,

    /// Controller under test.
    cc: Box<dyn CongestionController>,

    /// Sender window state.
    sender: SenderState,

    /// Virtual time origin.
    start: Instant,

    /// Current virtual time.
    now: Instant,

    /// Segments in flight, in sending order.
    in_flight: VecDeque<Packet>,

    /// Departure times of the segments held by the bottleneck.
    queue: VecDeque<Instant>,

    /// Time the bottleneck finishes serving its backlog.
    link_free: Instant,

    /// Arrival time of the previous ACK.
    last_ack: Option<Instant>,

    /// `snd_nxt` when loss recovery started.
    recovery_point: Option<u32>,

    /// Time of the latest progress log.
    last_progress: Instant,

    rng: StdRng,

    report: SimulationReport,
}

impl Simulation {
    pub fn new(
        link: LinkConfig,
        cc: Box<dyn CongestionController>,
        sender: SenderState,
        start: Instant,
        seed: u64,
    ) -> Self {
        let info = cc.diagnostics();
        Simulation {
            link,
            cc,
            sender,
            start,
            now: start,
            in_flight: VecDeque::new(),
            queue: VecDeque::new(),
            link_free: start,
            last_ack: None,
            recovery_point: None,
            last_progress: start,
            rng: StdRng::seed_from_u64(seed),
            report: SimulationReport {
                elapsed: Duration::ZERO,
                sent: 0,
                delivered: 0,
                lost: 0,
                rtt_samples: Vec::new(),
                queue_samples: Vec::new(),
                cwnd: 0,
                info,
            },
        }
    }

    /// Run the simulation for `duration` of virtual time.
    pub fn run(mut self, duration: Duration) -> SimulationReport {
        info!(
            "{} simulation starts, rate {} seg/s, rtt {:?}, buffer {}, bdp {:.1}",
            self.cc.name(),
            self.link.rate,
            self.link.base_rtt,
            self.link.buffer,
            self.link.bdp()
        );

        let end = self.start + duration;
        self.cc.init(self.now, &mut self.sender);

        while self.now < end {
            self.send_allowed();

            let ack_time = match self.in_flight.front() {
                Some(p) => p.ack_time,
                None => break,
            };
            self.now = ack_time.max(self.now);
            self.process_ack();
            self.log_progress();
        }

        if let Err(e) = self.cc.flush_trace() {
            warn!("{} flush trace failed: {:?}", self.cc.name(), e);
        }

        self.report.elapsed = self.now.saturating_duration_since(self.start);
        self.report.cwnd = self.sender.cwnd;
        self.report.info = self.cc.diagnostics();
        self.report
    }

    /// Fill the congestion window.
    fn send_allowed(&mut self) {
        // Restart after idle, not the very first flight.
        if self.in_flight.is_empty() && self.report.sent > 0 {
            self.cc
                .cwnd_event(self.now, &mut self.sender, CwndEvent::TxStart);
        }

        while (self.in_flight.len() as u32) < self.sender.cwnd {
            self.send_packet();
        }
    }

    fn send_packet(&mut self) {
        let seq = self.sender.snd_nxt;
        self.sender.snd_nxt = seq.wrapping_add(self.sender.mss);
        self.drain_queue();

        let lost = self.queue.len() >= self.link.buffer;
        let departure = if lost {
            self.now
        } else {
            let departure = self.link_free.max(self.now) + self.link.service_time();
            self.link_free = departure;
            self.queue.push_back(departure);
            departure
        };

        let mut ack_time = departure + self.link.base_rtt + self.jitter();
        if let Some(last) = self.in_flight.back() {
            // ACKs keep the sending order.
            ack_time = ack_time.max(last.ack_time);
        }

        self.in_flight.push_back(Packet {
            seq,
            sent_time: self.now,
            ack_time,
            lost,
        });
        self.cc.on_sent(self.now, 1);
        self.report.sent += 1;
    }

    fn jitter(&mut self) -> Duration {
        let max = self.link.jitter.as_micros() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.rng.gen_range(0..=max))
    }

    /// Forget the segments the bottleneck has finished serving.
    fn drain_queue(&mut self) {
        while let Some(departure) = self.queue.front() {
            if *departure > self.now {
                break;
            }
            self.queue.pop_front();
        }
    }

    fn process_ack(&mut self) {
        let in_flight = self.in_flight.len() as u32;
        let pkt = match self.in_flight.pop_front() {
            Some(p) => p,
            None => return,
        };
        self.sender.snd_una = pkt.seq.wrapping_add(self.sender.mss);

        if pkt.lost {
            self.on_loss();
            return;
        }

        if let Some(last) = self.last_ack {
            self.sender
                .rtt_histogram
                .record(self.now.saturating_duration_since(last));
        }
        self.last_ack = Some(self.now);

        let rtt = self.now.saturating_duration_since(pkt.sent_time);
        self.drain_queue();
        self.report.delivered += 1;
        self.report.rtt_samples.push(rtt.as_secs_f64() * 1000.0);
        self.report.queue_samples.push(self.queue.len() as f64);

        self.cc
            .on_ack(self.now, &self.sender, AckSample::new(1, rtt));

        if let Some(point) = self.recovery_point {
            if seq::after(self.sender.snd_una, point) {
                debug!("{} recovery ends, cwnd {}", self.cc.name(), self.sender.cwnd);
                self.recovery_point = None;
                self.sender.ca_state = CongestionState::Open;
                self.cc.set_state(&self.sender, CongestionState::Open);
            }
        }

        if self.sender.ca_state == CongestionState::Open {
            let ack = self.sender.snd_una;
            self.cc
                .cong_avoid(self.now, &mut self.sender, ack, in_flight);
        }
    }

    fn on_loss(&mut self) {
        self.report.lost += 1;
        if self.recovery_point.is_some() {
            return;
        }

        self.sender.ssthresh = self.cc.ssthresh(&self.sender);
        self.sender.cwnd = self
            .sender
            .ssthresh
            .max(self.cc.min_cwnd(&self.sender))
            .max(MIN_CWND);
        self.sender.ca_state = CongestionState::Recovery;
        self.cc.set_state(&self.sender, CongestionState::Recovery);
        self.recovery_point = Some(self.sender.snd_nxt);

        debug!(
            "{} loss detected, ssthresh {} cwnd {}",
            self.cc.name(),
            self.sender.ssthresh,
            self.sender.cwnd
        );
    }

    fn log_progress(&mut self) {
        if self.now.saturating_duration_since(self.last_progress) < PROGRESS_INTERVAL {
            return;
        }
        self.last_progress = self.now;

        let info = self.cc.diagnostics();
        debug!(
            "{} t={:.3}s cwnd={} queue={} est_queue={} delivered={} lost={}",
            self.cc.name(),
            self.now.saturating_duration_since(self.start).as_secs_f64(),
            self.sender.cwnd,
            self.queue.len(),
            info.queue_len,
            self.report.delivered,
            self.report.lost
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qatcp::build_congestion_controller;
    use qatcp::CongestionControlAlgorithm;
    use qatcp::Config;

    fn simulate(algor: CongestionControlAlgorithm, link: LinkConfig) -> SimulationReport {
        let mut config = Config::new().unwrap();
        config.set_congestion_control_algorithm(algor);
        config.set_initial_congestion_window(10);

        let cc = build_congestion_controller(&config);
        let mut sender = SenderState::new(1460, 10);
        sender.cwnd_clamp = 2000;
        let sim = Simulation::new(link, cc, sender, Instant::now(), 1);
        sim.run(Duration::from_secs(5))
    }

    #[test]
    fn simulation_runs() {
        let link = LinkConfig {
            jitter: Duration::from_micros(200),
            ..LinkConfig::default()
        };

        for algor in [
            CongestionControlAlgorithm::WindowRate,
            CongestionControlAlgorithm::QueueDelay,
        ] {
            let report = simulate(algor, link.clone());
            assert!(report.elapsed >= Duration::from_secs(5));
            assert!(report.delivered > 0);
            assert!(report.delivered + report.lost <= report.sent);
            assert!(report.cwnd >= MIN_CWND);
            assert!(report.throughput() <= link.rate * 1.01);
            assert!(report
                .queue_samples
                .iter()
                .all(|q| *q <= link.buffer as f64));
            assert!(report
                .rtt_samples
                .iter()
                .all(|rtt| *rtt >= link.base_rtt.as_secs_f64() * 1000.0));
        }
    }

    #[test]
    fn link_bdp() {
        let link = LinkConfig::default();
        assert_eq!(link.bdp(), 50.0);
        assert_eq!(link.service_time(), Duration::from_millis(1));
    }
}
