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

use std::fs::File;
use std::io::BufWriter;
use std::time::Duration;
use std::time::Instant;

use clap::error::ErrorKind;
use clap::CommandFactory;
use clap::Parser;
use log::info;
use statrs::statistics::Data;
use statrs::statistics::Distribution;
use statrs::statistics::Max;
use statrs::statistics::Min;
use statrs::statistics::OrderStatistics;

use qatcp::build_congestion_controller;
use qatcp::build_traced_congestion_controller;
use qatcp::Config;
use qatcp::CongestionControlAlgorithm;
use qatcp::CongestionController;
use qatcp::SenderState;
use qatcp_tools::LinkConfig;
use qatcp_tools::Result;
use qatcp_tools::Simulation;
use qatcp_tools::SimulationReport;

#[cfg(unix)]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[derive(Parser, Debug, Clone)]
#[clap(name = "qatcp_sim")]
pub struct SimOpt {
    /// Congestion control algorithm, support SOD/SOD_DELAY.
    #[clap(long, default_value = "SOD")]
    pub congestion_control_algor: CongestionControlAlgorithm,

    /// Bottleneck service rate in segments per second.
    #[clap(long, default_value = "1000", value_name = "NUM")]
    pub rate: f64,

    /// Round trip propagation delay in milliseconds.
    #[clap(long, default_value = "50", value_name = "TIME")]
    pub rtt: u64,

    /// Bottleneck buffer size in segments.
    #[clap(long, default_value = "100", value_name = "NUM")]
    pub buffer: usize,

    /// Max random delay added to each ACK in microseconds.
    #[clap(long, default_value = "0", value_name = "TIME")]
    pub jitter: u64,

    /// Simulated time in seconds.
    #[clap(short, long, default_value = "10", value_name = "TIME")]
    pub duration: u64,

    /// Maximum segment size in bytes.
    #[clap(long, default_value = "1460", value_name = "NUM")]
    pub mss: u32,

    /// Initial congestion window in segments.
    #[clap(long, default_value = "150", value_name = "NUM")]
    pub initial_congestion_window: u32,

    /// Keep the sender's own window at start instead of the initial
    /// congestion window.
    #[clap(long)]
    pub disable_initial_congestion_window: bool,

    /// Upper bound of the congestion window in segments.
    #[clap(long, default_value = "10000", value_name = "NUM")]
    pub cwnd_clamp: u32,

    /// Target queue length for SOD in segments.
    #[clap(long, default_value = "10", value_name = "NUM")]
    pub target_queue_len: i64,

    /// Target queue length for SOD_DELAY.
    #[clap(long, default_value = "8", value_name = "NUM")]
    pub delay_target_queue_len: u32,

    /// Interval between two SOD window updates in milliseconds.
    #[clap(long, default_value = "2", value_name = "TIME")]
    pub control_period: u64,

    /// History used for the SOD rate estimate in milliseconds.
    #[clap(long, default_value = "1000", value_name = "TIME")]
    pub estimation_period: u64,

    /// Max number of ACK samples kept by SOD.
    #[clap(long, default_value = "1024", value_name = "NUM")]
    pub sample_window_capacity: usize,

    /// Constant added to the SOD rate estimate in segments per second.
    #[clap(long, default_value = "0", value_name = "NUM")]
    pub bandwidth_deviation: f64,

    /// Seed of the ACK jitter generator.
    #[clap(long, default_value = "0", value_name = "NUM")]
    pub seed: u64,

    /// Save the per-tick congestion control trace to the file.
    #[clap(short, long, value_name = "FILE")]
    pub trace_file: Option<String>,

    /// Log level, support OFF/ERROR/WARN/INFO/DEBUG/TRACE.
    #[clap(long, default_value = "INFO", value_name = "STR")]
    pub log_level: log::LevelFilter,

    /// Log file path. If no file is specified, logs will be written to `stderr`.
    #[clap(long, value_name = "FILE")]
    pub log_file: Option<String>,
}

fn parse_option() -> std::result::Result<SimOpt, clap::error::Error> {
    let option = SimOpt::parse();

    if !(option.rate.is_finite() && option.rate >= 1.0) {
        return Err(SimOpt::command().error(
            ErrorKind::InvalidValue,
            "Bottleneck rate should be at least 1 segment per second",
        ));
    }

    if option.buffer == 0 {
        return Err(SimOpt::command().error(
            ErrorKind::InvalidValue,
            "Bottleneck buffer should hold at least 1 segment",
        ));
    }

    Ok(option)
}

fn build_config(option: &SimOpt) -> Result<Config> {
    let mut config = Config::new()?;
    config.set_congestion_control_algorithm(option.congestion_control_algor);
    config.set_initial_congestion_window(option.initial_congestion_window);
    config.enable_initial_congestion_window(!option.disable_initial_congestion_window);
    config.set_target_queue_len(option.target_queue_len);
    config.set_delay_target_queue_len(option.delay_target_queue_len);
    config.set_control_period(option.control_period);
    config.set_estimation_period(option.estimation_period);
    config.set_sample_window_capacity(option.sample_window_capacity);
    config.set_bandwidth_deviation(option.bandwidth_deviation);
    Ok(config)
}

fn print_stats(title: &str, samples: &[f64]) {
    if samples.is_empty() {
        return;
    }

    let mut s = Data::new(samples.to_vec());
    println!("{}:", title);
    println!(
        "\tmin: {:.2}, max: {:.2}, mean: {:.2}, sd: {:.2}",
        s.min(),
        s.max(),
        s.mean().unwrap_or(0.0),
        s.std_dev().unwrap_or(0.0),
    );
    println!(
        "\tmedian: {:.2}, p80: {:.2}, p90: {:.2}, p99: {:.2}",
        s.median(),
        s.percentile(80),
        s.percentile(90),
        s.percentile(99),
    );
}

fn print_report(name: &str, link: &LinkConfig, report: &SimulationReport) {
    println!(
        "{}: {:.2}s simulated, {} segments sent, {} delivered, {} lost",
        name,
        report.elapsed.as_secs_f64(),
        report.sent,
        report.delivered,
        report.lost
    );
    println!(
        "throughput: {:.2} seg/s, link utilization: {:.2}%, final cwnd: {}",
        report.throughput(),
        report.throughput() / link.rate * 100.0,
        report.cwnd
    );

    print_stats("rtt(ms)", &report.rtt_samples);
    print_stats("bottleneck queue(segments)", &report.queue_samples);

    match serde_json::to_string(&report.info) {
        Ok(info) => println!("controller: {}", info),
        Err(e) => println!("controller: {:?}", e),
    }
}

fn main() -> Result<()> {
    // Parse simulation option.
    let option = match parse_option() {
        Ok(option) => option,
        Err(e) => e.exit(),
    };

    env_logger::builder()
        .target(qatcp_tools::log_target(&option.log_file)?)
        .filter_level(option.log_level)
        .format_timestamp_millis()
        .init();

    let config = build_config(&option)?;
    let now = Instant::now();
    let cc: Box<dyn CongestionController> = match &option.trace_file {
        Some(path) => {
            let file = File::create(path)?;
            build_traced_congestion_controller(&config, Box::new(BufWriter::new(file)), now)?
        }
        None => build_congestion_controller(&config),
    };
    let name = cc.name().to_string();
    info!("{} trace file {:?}", name, option.trace_file);

    let mut sender = SenderState::new(option.mss, option.initial_congestion_window);
    sender.cwnd_clamp = option.cwnd_clamp;

    let link = LinkConfig {
        rate: option.rate,
        base_rtt: Duration::from_millis(option.rtt),
        buffer: option.buffer,
        jitter: Duration::from_micros(option.jitter),
    };

    let sim = Simulation::new(link.clone(), cc, sender, now, option.seed);
    let report = sim.run(Duration::from_secs(option.duration));
    print_report(&name, &link, &report);

    Ok(())
}
