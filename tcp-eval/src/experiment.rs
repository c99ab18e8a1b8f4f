use crate::params::{
    AccessBufferPolicy, LinkParameters, TopologyTargets, TrafficParameters, derive_link_parameters,
};
use crate::stats::{self, DropCounters, EvalRecord, EvalStats, SamplerSettings};
use crate::topology::{LinkSettings, Topology, TopologyKind};
use crate::traffic::{TrafficClass, TrafficOrchestrator, TrafficPlan, TrafficSettings};
use anyhow::Context;
use fastrand::Rng;
use serde::Serialize;
use sim_network::Network;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Extra simulated time after the horizon, so in-flight packets can settle
const DRAIN_AFTER_HORIZON: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct ExperimentConfig {
    pub topology: TopologyKind,
    pub targets: TopologyTargets,
    pub traffic: TrafficParameters,
    pub traffic_settings: TrafficSettings,
    pub access_buffer_policy: AccessBufferPolicy,
    pub sampler: SamplerSettings,
    pub file_name: PathBuf,
    pub json_summary: Option<PathBuf>,
    pub seed: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct TopologyShape {
    pub routers: usize,
    pub left_leaves: usize,
    pub right_leaves: usize,
    pub bottleneck_links: usize,
    pub cross_sources: usize,
    pub cross_sinks: usize,
    pub addresses: usize,
}

impl TopologyShape {
    fn of(topology: &Topology) -> Self {
        let (sources, sinks) = topology.cross_leaves();
        Self {
            routers: topology.router_count(),
            left_leaves: topology.left().len(),
            right_leaves: topology.right().len(),
            bottleneck_links: topology.bottleneck_links().len(),
            cross_sources: sources.iter().map(Vec::len).sum(),
            cross_sinks: sinks.iter().map(Vec::len).sum(),
            addresses: topology.plan().assignments().len(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ClassSummary {
    pub class: TrafficClass,
    pub flows: usize,
    pub sent_bytes: usize,
    pub received_bytes: usize,
    /// Payload handed to the sinks in order, without duplicates
    pub delivered_bytes: usize,
    pub retransmissions: u64,
    pub goodput_mbps: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ExperimentReport {
    pub topology: TopologyKind,
    pub seed: u64,
    pub parameters: LinkParameters,
    pub shape: TopologyShape,
    pub classes: Vec<ClassSummary>,
    pub record: EvalRecord,
    pub simulated_time: Duration,
    pub executed_events: u64,
}

impl ExperimentReport {
    pub fn class(&self, class: TrafficClass) -> Option<&ClassSummary> {
        self.classes.iter().find(|c| c.class == class)
    }

    pub fn append_json(&self, path: &Path) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(self).context("failed to serialize report")?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open JSON summary `{}`", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append to JSON summary `{}`", path.display()))?;
        Ok(())
    }
}

/// Runs a single experiment to completion, appending its record to the configured output file
pub fn run_experiment(config: &ExperimentConfig) -> anyhow::Result<ExperimentReport> {
    // Invalid parameters abort the run before anything gets built
    let parameters =
        derive_link_parameters(&config.targets, &config.traffic, config.access_buffer_policy)?;
    info!(
        "bottleneck buffer: {} packets, mean RTT: {} ms",
        parameters.bottleneck_buffer, parameters.mean_rtt_ms
    );

    let mut rng = Rng::with_seed(config.seed);
    let mut network = Network::new(rng.fork());
    let links = LinkSettings::new(&parameters, config.targets.cross_link_delay);
    let topology = Topology::build(
        &mut network,
        config.topology,
        config.targets.bottleneck_count,
        &config.traffic,
        &links,
    )
    .context("failed to build topology")?;

    let mut traffic_rng = rng.fork();
    let plan = TrafficOrchestrator::new(
        &mut network,
        &topology,
        &config.traffic_settings,
        &mut traffic_rng,
    )
    .install(&config.traffic)
    .context("failed to install traffic")?;

    network.populate_routing_tables();

    let interface = topology.bottleneck_interface();
    let eval_stats = EvalStats::new(
        config.targets.bottleneck_bandwidth_mbps,
        config.targets.rttp,
        config.traffic.fwd_ftp_flows,
        network.queue_capacity(interface),
        &config.sampler,
    );
    let horizon = config.traffic.simulation_time;
    let eval_stats = stats::attach(&mut network, interface, eval_stats, horizon);

    network.stop_at(horizon + DRAIN_AFTER_HORIZON);
    info!("running {} simulation until {:?}", config.topology, horizon);
    network.run();
    info!("simulation finished after {} events", network.executed_events());

    let record = eval_stats
        .lock()
        .finish(&DropCounters::read(&network, interface));
    record.append_to(&config.file_name)?;

    let report = ExperimentReport {
        topology: config.topology,
        seed: config.seed,
        parameters,
        shape: TopologyShape::of(&topology),
        classes: summarize_classes(&network, &plan, horizon),
        record,
        simulated_time: network.now(),
        executed_events: network.executed_events(),
    };

    if let Some(path) = &config.json_summary {
        report.append_json(path)?;
    }

    Ok(report)
}

fn summarize_classes(network: &Network, plan: &TrafficPlan, horizon: Duration) -> Vec<ClassSummary> {
    TrafficClass::ALL
        .into_iter()
        .map(|class| {
            let mut summary = ClassSummary {
                class,
                flows: 0,
                sent_bytes: 0,
                received_bytes: 0,
                delivered_bytes: 0,
                retransmissions: 0,
                goodput_mbps: 0.0,
            };

            for flow in plan.flows.iter().filter(|f| f.class == class) {
                let source = network.app_stats(flow.source);
                let sink = network.app_stats(flow.sink);
                summary.flows += 1;
                summary.sent_bytes += source.sent.bytes;
                summary.received_bytes += sink.received.bytes;
                summary.delivered_bytes += sink.delivered.bytes;
                summary.retransmissions += source.retransmissions;
            }

            let seconds = horizon.as_secs_f64();
            if seconds > 0.0 {
                summary.goodput_mbps = summary.delivered_bytes as f64 * 8.0 / seconds / 1_000_000.0;
            }

            summary
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::stats::QueueMetric;
    use crate::traffic::StopPolicy;
    use bon::builder;
    use sim_network::apps::bulk_send::TcpVariant;

    fn output_path(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("tcp-eval-{}-{name}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[builder]
    fn config(
        file_name: PathBuf,
        topology: Option<TopologyKind>,
        fwd_ftp_flows: Option<usize>,
        cross_ftp_flows: Option<usize>,
        hops: Option<usize>,
        bandwidth_mbps: Option<f64>,
        simulation_time: Option<Duration>,
    ) -> ExperimentConfig {
        ExperimentConfig {
            topology: topology.unwrap_or(TopologyKind::Dumbbell),
            targets: TopologyTargets {
                bottleneck_bandwidth_mbps: bandwidth_mbps.unwrap_or(10.0),
                rttp: 0.08,
                rtt_difference: 0.0,
                bottleneck_count: hops.unwrap_or(1),
                cross_link_delay: Duration::from_millis(10),
            },
            traffic: TrafficParameters {
                fwd_ftp_flows: fwd_ftp_flows.unwrap_or(5),
                rev_ftp_flows: 0,
                voice_flows: 0,
                fwd_streaming_flows: 0,
                rev_streaming_flows: 0,
                cross_ftp_flows: cross_ftp_flows.unwrap_or(0),
                streaming_rate_kbps: 640.0,
                streaming_packet_size: 840,
                use_aqm: false,
                simulation_time: simulation_time.unwrap_or(Duration::from_secs(10)),
            },
            traffic_settings: TrafficSettings {
                tcp_variant: TcpVariant::NewReno,
                stop_policy: StopPolicy::DrainSinks,
            },
            access_buffer_policy: AccessBufferPolicy::MirrorBottleneck,
            sampler: SamplerSettings {
                sampling: Default::default(),
                metric: QueueMetric::Packets,
            },
            file_name,
            json_summary: None,
            seed: 42,
        }
    }

    fn rows(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_dumbbell_forward_bulk() {
        let path = output_path("dumbbell-forward-bulk");
        let report = run_experiment(&config().file_name(path.clone()).call()).unwrap();

        assert_eq!(report.shape.routers, 2);
        assert_eq!(report.shape.left_leaves, 5);
        assert_eq!(report.shape.right_leaves, 5);
        assert_eq!(report.shape.bottleneck_links, 1);
        assert_eq!(report.shape.cross_sources, 0);

        for summary in &report.classes {
            let expected = if summary.class == TrafficClass::ForwardBulk { 5 } else { 0 };
            assert_eq!(summary.flows, expected, "{}", summary.class);
        }

        let bulk = report.class(TrafficClass::ForwardBulk).unwrap();
        assert!(bulk.received_bytes > 0);
        // Goodput only counts payload delivered in order
        assert!(bulk.delivered_bytes > 0);
        assert!(bulk.delivered_bytes < bulk.received_bytes);
        let expected_goodput = bulk.delivered_bytes as f64 * 8.0 / 10.0 / 1_000_000.0;
        assert!((bulk.goodput_mbps - expected_goodput).abs() < 1e-9);
        assert!(report.record.utilization_percent > 0.0);
        assert!(report.record.utilization_percent < 101.0);
        assert!(report.simulated_time <= Duration::from_secs(15));

        let rows = rows(&path);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].starts_with("10           0.08              5"));

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_records_are_appended() {
        let path = output_path("appended");
        let config = config()
            .file_name(path.clone())
            .fwd_ftp_flows(1)
            .simulation_time(Duration::from_secs(4))
            .call();

        let first = run_experiment(&config).unwrap();
        let second = run_experiment(&config).unwrap();

        // Same seed, same outcome
        assert_eq!(first.record, second.record);
        assert_eq!(first.executed_events, second.executed_events);

        let rows = rows(&path);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], rows[1]);

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_parking_lot_cross_traffic() {
        let path = output_path("parking-lot");
        let config = config()
            .file_name(path.clone())
            .topology(TopologyKind::ParkingLot)
            .hops(3)
            .fwd_ftp_flows(1)
            .cross_ftp_flows(2)
            .simulation_time(Duration::from_secs(5))
            .call();
        let report = run_experiment(&config).unwrap();

        assert_eq!(report.shape.routers, 4);
        assert_eq!(report.shape.bottleneck_links, 3);
        assert_eq!(report.shape.cross_sources, 6);
        assert_eq!(report.shape.cross_sinks, 6);

        let cross = report.class(TrafficClass::CrossBulk).unwrap();
        assert_eq!(cross.flows, 6);
        assert!(cross.received_bytes > 0);
        assert_eq!(rows(&path).len(), 1);

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_invalid_parameters_build_nothing() {
        let path = output_path("invalid");
        let config = config()
            .file_name(path.clone())
            .bandwidth_mbps(0.0)
            .call();

        assert!(run_experiment(&config).is_err());
        assert!(!path.exists());
    }
}
