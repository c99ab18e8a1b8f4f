use crate::config::cli::{ExperimentOpt, ParkingLotOpt};
use crate::error::ConfigError;
use crate::experiment::ExperimentConfig;
use crate::params::{TopologyTargets, TrafficParameters};
use crate::stats::{QueueSampling, SamplerSettings};
use crate::topology::TopologyKind;
use crate::traffic::TrafficSettings;
use sim_network::apps::bulk_send::TcpVariant;
use std::path::PathBuf;
use std::time::Duration;

pub mod cli;
pub mod json;

const DEFAULT_FLOWS: usize = 5;

/// The defaults that differ between topologies
struct TopologyDefaults {
    use_aqm: bool,
    simulation_time: Duration,
    file_name: &'static str,
    bottleneck_count: usize,
    cross_ftp_flows: usize,
}

impl TopologyDefaults {
    fn of(kind: TopologyKind) -> Self {
        match kind {
            TopologyKind::Dumbbell => Self {
                use_aqm: true,
                simulation_time: Duration::from_secs(10),
                file_name: "TcpEvalDumbbell",
                bottleneck_count: 1,
                cross_ftp_flows: 0,
            },
            TopologyKind::ParkingLot => Self {
                use_aqm: false,
                simulation_time: Duration::from_secs(100),
                file_name: "TcpEvalParkingLot",
                bottleneck_count: 3,
                cross_ftp_flows: 5,
            },
        }
    }
}

/// Combines the options of one run with the defaults of its topology
pub fn resolve(
    kind: TopologyKind,
    opt: &ExperimentOpt,
    parking_lot: &ParkingLotOpt,
    seed: u64,
    json_summary: Option<PathBuf>,
) -> Result<ExperimentConfig, ConfigError> {
    let defaults = TopologyDefaults::of(kind);

    // A dumbbell is a single hop without cross traffic, whatever the options say
    let (bottleneck_count, cross_ftp_flows) = match kind {
        TopologyKind::Dumbbell => (defaults.bottleneck_count, defaults.cross_ftp_flows),
        TopologyKind::ParkingLot => (
            parking_lot
                .bottleneck_count
                .unwrap_or(defaults.bottleneck_count),
            parking_lot
                .cross_ftp_flows
                .unwrap_or(defaults.cross_ftp_flows),
        ),
    };

    let sampling = match opt.queue_sample_interval_ms {
        None => QueueSampling::OnEnqueue,
        Some(0) => {
            return Err(ConfigError::InvalidDuration {
                name: "queue-sample-interval-ms",
                value: 0.0,
            });
        }
        Some(ms) => QueueSampling::Periodic(Duration::from_millis(ms)),
    };

    Ok(ExperimentConfig {
        topology: kind,
        targets: TopologyTargets {
            bottleneck_bandwidth_mbps: opt.bottleneck_bandwidth.unwrap_or(10.0),
            rttp: opt.rttp.unwrap_or(0.08),
            rtt_difference: opt.rtt_difference.unwrap_or(0.0),
            bottleneck_count,
            cross_link_delay: parking_lot
                .cross_link_delay
                .unwrap_or(Duration::from_millis(10)),
        },
        traffic: TrafficParameters {
            fwd_ftp_flows: opt.fwd_ftp_flows.unwrap_or(DEFAULT_FLOWS),
            rev_ftp_flows: opt.rev_ftp_flows.unwrap_or(DEFAULT_FLOWS),
            voice_flows: opt.voice_flows.unwrap_or(DEFAULT_FLOWS),
            fwd_streaming_flows: opt.fwd_streaming_flows.unwrap_or(DEFAULT_FLOWS),
            rev_streaming_flows: opt.rev_streaming_flows.unwrap_or(DEFAULT_FLOWS),
            cross_ftp_flows,
            streaming_rate_kbps: opt.streaming_rate.unwrap_or(640.0),
            streaming_packet_size: opt.streaming_packet_size.unwrap_or(840),
            use_aqm: opt.use_aqm.unwrap_or(defaults.use_aqm),
            simulation_time: opt.simulation_time.unwrap_or(defaults.simulation_time),
        },
        traffic_settings: TrafficSettings {
            tcp_variant: opt.tcp_variant.unwrap_or(TcpVariant::NewReno),
            stop_policy: opt.stop_policy.unwrap_or_default(),
        },
        access_buffer_policy: opt.access_buffer_policy.unwrap_or_default(),
        sampler: SamplerSettings {
            sampling,
            metric: opt.queue_metric.unwrap_or_default(),
        },
        file_name: opt
            .file_name
            .clone()
            .unwrap_or_else(|| PathBuf::from(defaults.file_name)),
        json_summary,
        seed,
    })
}
