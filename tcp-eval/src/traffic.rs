//! Installation of the flow endpoints of every traffic class
//!
//! Every flow is a (source, sink) pair of applications sharing a random start offset. Sources and
//! sinks stop according to the configured [`StopPolicy`], except for cross traffic, which always
//! stops early at both ends.

use crate::error::ConfigError;
use crate::params::TrafficParameters;
use crate::topology::{Topology, leaf_ranges};
use fastrand::Rng;
use serde::Serialize;
use sim_network::Network;
use sim_network::apps::AppId;
use sim_network::apps::bulk_send::{BulkSend, BulkSendConfig, DEFAULT_SEGMENT_SIZE, TcpVariant};
use sim_network::apps::on_off::{OnOff, OnOffConfig};
use sim_network::apps::sink::PacketSink;
use sim_network::network::{NetworkError, NodeId};
use std::fmt::{Display, Formatter};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::ops::Range;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub const FORWARD_BULK_PORT: u16 = 50000;
pub const REVERSE_BULK_PORT: u16 = 50001;
pub const TWO_WAY_FORWARD_PORT: u16 = 50002;
pub const TWO_WAY_REVERSE_PORT: u16 = 50003;
pub const FORWARD_RATE_PORT: u16 = 50004;
pub const REVERSE_RATE_PORT: u16 = 50005;
pub const CROSS_BULK_PORT: u16 = 50006;

const VOICE_PACKET_SIZE: usize = 172;
const VOICE_RATE_BPS: u64 = 64_000;
const VOICE_ON_TIME: Duration = Duration::from_secs(1);
const VOICE_OFF_TIME: Duration = Duration::from_millis(1350);
const STREAMING_ON_TIME: Duration = Duration::from_secs(10);

/// How long before the horizon sources stop, so in-flight data can drain
const DRAIN_TIME: Duration = Duration::from_secs(3);
const START_WINDOW_MICROS: Range<u64> = 1_000..300_000;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TrafficClass {
    ForwardBulk,
    ReverseBulk,
    CrossBulk,
    TwoWay,
    ForwardRate,
    ReverseRate,
}

impl TrafficClass {
    pub const ALL: [TrafficClass; 6] = [
        TrafficClass::ForwardBulk,
        TrafficClass::ReverseBulk,
        TrafficClass::CrossBulk,
        TrafficClass::TwoWay,
        TrafficClass::ForwardRate,
        TrafficClass::ReverseRate,
    ];
}

impl Display for TrafficClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TrafficClass::ForwardBulk => "forward-bulk",
            TrafficClass::ReverseBulk => "reverse-bulk",
            TrafficClass::CrossBulk => "cross-bulk",
            TrafficClass::TwoWay => "two-way-low-rate",
            TrafficClass::ForwardRate => "forward-constant-rate",
            TrafficClass::ReverseRate => "reverse-constant-rate",
        };
        f.write_str(name)
    }
}

/// The classes whose flows run between a left and a right leaf
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LeafClass {
    ForwardBulk,
    ReverseBulk,
    TwoWay,
    ForwardRate,
    ReverseRate,
}

impl From<LeafClass> for TrafficClass {
    fn from(class: LeafClass) -> Self {
        match class {
            LeafClass::ForwardBulk => TrafficClass::ForwardBulk,
            LeafClass::ReverseBulk => TrafficClass::ReverseBulk,
            LeafClass::TwoWay => TrafficClass::TwoWay,
            LeafClass::ForwardRate => TrafficClass::ForwardRate,
            LeafClass::ReverseRate => TrafficClass::ReverseRate,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub enum StopPolicy {
    /// Sources stop 3 seconds before the horizon, sinks at the horizon
    #[default]
    DrainSinks,
    /// Sources and sinks stop at the horizon
    SharedHorizon,
}

impl StopPolicy {
    const NAMES: &'static str = "drain-sinks, shared-horizon";

    /// Stop times of a flow's source and sink
    fn stop_times(self, horizon: Duration) -> (Duration, Duration) {
        match self {
            StopPolicy::DrainSinks => (horizon.saturating_sub(DRAIN_TIME), horizon),
            StopPolicy::SharedHorizon => (horizon, horizon),
        }
    }
}

impl FromStr for StopPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drain-sinks" => Ok(StopPolicy::DrainSinks),
            "shared-horizon" => Ok(StopPolicy::SharedHorizon),
            _ => Err(ConfigError::UnknownVariant {
                kind: "stop policy",
                name: s.to_string(),
                expected: Self::NAMES,
            }),
        }
    }
}

impl Display for StopPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StopPolicy::DrainSinks => f.write_str("drain-sinks"),
            StopPolicy::SharedHorizon => f.write_str("shared-horizon"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FlowPair {
    pub class: TrafficClass,
    /// Leaf index, or cross-flow slot within the hop for cross traffic
    pub index: usize,
    /// Only set for cross traffic
    pub hop: Option<usize>,
    pub source: AppId,
    pub sink: AppId,
    pub port: u16,
    pub start: Duration,
    pub source_stop: Duration,
    pub sink_stop: Duration,
}

#[derive(Clone, Debug, Default)]
pub struct TrafficPlan {
    pub flows: Vec<FlowPair>,
    pub ranges: Vec<(LeafClass, Range<usize>)>,
}

impl TrafficPlan {
    pub fn flow_count(&self, class: TrafficClass) -> usize {
        self.flows.iter().filter(|f| f.class == class).count()
    }
}

/// Knobs of the orchestrator that are not part of the traffic mix itself
#[derive(Clone, Debug)]
pub struct TrafficSettings {
    pub tcp_variant: TcpVariant,
    pub stop_policy: StopPolicy,
}

struct Endpoints {
    source: NodeId,
    sink: NodeId,
    sink_addr: Ipv4Addr,
}

#[derive(Clone, Copy)]
struct Schedule {
    start: Duration,
    source_stop: Duration,
    sink_stop: Duration,
}

pub struct TrafficOrchestrator<'a> {
    network: &'a mut Network,
    topology: &'a Topology,
    settings: &'a TrafficSettings,
    rng: &'a mut Rng,
    plan: TrafficPlan,
}

impl<'a> TrafficOrchestrator<'a> {
    pub fn new(
        network: &'a mut Network,
        topology: &'a Topology,
        settings: &'a TrafficSettings,
        rng: &'a mut Rng,
    ) -> Self {
        Self {
            network,
            topology,
            settings,
            rng,
            plan: TrafficPlan::default(),
        }
    }

    pub fn install(mut self, traffic: &TrafficParameters) -> Result<TrafficPlan, NetworkError> {
        let horizon = traffic.simulation_time;
        let (source_stop, sink_stop) = self.settings.stop_policy.stop_times(horizon);
        let ranges = leaf_ranges(traffic);

        for (class, range) in &ranges {
            for index in range.clone() {
                let start = self.start_offset();
                let schedule = Schedule {
                    start,
                    source_stop: source_stop.max(start),
                    sink_stop: sink_stop.max(start),
                };
                self.install_leaf_flow(*class, index, schedule, traffic)?;
            }
        }

        self.install_cross_flows(horizon)?;
        self.plan.ranges = ranges;

        debug!(
            "installed {} flows ({} applications)",
            self.plan.flows.len(),
            self.plan.flows.len() * 2
        );
        Ok(self.plan)
    }

    fn start_offset(&mut self) -> Duration {
        Duration::from_micros(self.rng.u64(START_WINDOW_MICROS))
    }

    fn forward(&self, index: usize) -> Result<Endpoints, NetworkError> {
        self.endpoints(self.topology.left()[index], self.topology.right()[index])
    }

    fn reverse(&self, index: usize) -> Result<Endpoints, NetworkError> {
        self.endpoints(self.topology.right()[index], self.topology.left()[index])
    }

    fn endpoints(&self, source: NodeId, sink: NodeId) -> Result<Endpoints, NetworkError> {
        let sink_addr = self
            .network
            .node_address(sink)
            .ok_or_else(|| NetworkError::NodeWithoutAddress(self.network.node(sink).id().clone()))?;
        Ok(Endpoints {
            source,
            sink,
            sink_addr,
        })
    }

    fn install_leaf_flow(
        &mut self,
        leaf_class: LeafClass,
        index: usize,
        schedule: Schedule,
        traffic: &TrafficParameters,
    ) -> Result<(), NetworkError> {
        let class = TrafficClass::from(leaf_class);
        match leaf_class {
            LeafClass::ForwardBulk => {
                let endpoints = self.forward(index)?;
                self.install_bulk(class, index, None, endpoints, FORWARD_BULK_PORT, schedule)
            }
            LeafClass::ReverseBulk => {
                let endpoints = self.reverse(index)?;
                self.install_bulk(class, index, None, endpoints, REVERSE_BULK_PORT, schedule)
            }
            LeafClass::TwoWay => {
                let voice = |remote| OnOffConfig {
                    remote,
                    data_rate_bps: VOICE_RATE_BPS,
                    packet_size: VOICE_PACKET_SIZE,
                    on_time: VOICE_ON_TIME,
                    off_time: VOICE_OFF_TIME,
                };
                let endpoints = self.forward(index)?;
                self.install_on_off(class, index, endpoints, TWO_WAY_FORWARD_PORT, schedule, voice)?;
                let endpoints = self.reverse(index)?;
                self.install_on_off(class, index, endpoints, TWO_WAY_REVERSE_PORT, schedule, voice)
            }
            LeafClass::ForwardRate | LeafClass::ReverseRate => {
                let data_rate_bps = (traffic.streaming_rate_kbps * 1000.0).round() as u64;
                let packet_size = traffic.streaming_packet_size;
                let streaming = |remote| OnOffConfig {
                    remote,
                    data_rate_bps,
                    packet_size,
                    on_time: STREAMING_ON_TIME,
                    off_time: Duration::ZERO,
                };
                let (endpoints, port) = if leaf_class == LeafClass::ForwardRate {
                    (self.forward(index)?, FORWARD_RATE_PORT)
                } else {
                    (self.reverse(index)?, REVERSE_RATE_PORT)
                };
                self.install_on_off(class, index, endpoints, port, schedule, streaming)
            }
        }
    }

    fn install_cross_flows(&mut self, horizon: Duration) -> Result<(), NetworkError> {
        let stop = horizon.saturating_sub(DRAIN_TIME);
        let topology = self.topology;
        let (sources, sinks) = topology.cross_leaves();

        for (hop, (sources, sinks)) in sources.iter().zip(sinks).enumerate() {
            for (slot, (&source, &sink)) in sources.iter().zip(sinks).enumerate() {
                let start = self.start_offset();
                let schedule = Schedule {
                    start,
                    source_stop: stop.max(start),
                    sink_stop: stop.max(start),
                };
                let sink_addr = topology.cross_sink_address(hop, slot).ok_or_else(|| {
                    NetworkError::NodeWithoutAddress(self.network.node(sink).id().clone())
                })?;
                let endpoints = Endpoints {
                    source,
                    sink,
                    sink_addr,
                };
                self.install_bulk(
                    TrafficClass::CrossBulk,
                    slot,
                    Some(hop),
                    endpoints,
                    CROSS_BULK_PORT,
                    schedule,
                )?;
            }
        }

        Ok(())
    }

    fn install_bulk(
        &mut self,
        class: TrafficClass,
        index: usize,
        hop: Option<usize>,
        endpoints: Endpoints,
        port: u16,
        schedule: Schedule,
    ) -> Result<(), NetworkError> {
        let sender = BulkSend::new(BulkSendConfig {
            remote: SocketAddrV4::new(endpoints.sink_addr, port),
            max_bytes: 0,
            segment_size: DEFAULT_SEGMENT_SIZE,
            variant: self.settings.tcp_variant,
        });
        self.install_pair(class, index, hop, endpoints, port, schedule, sender)
    }

    fn install_on_off(
        &mut self,
        class: TrafficClass,
        index: usize,
        endpoints: Endpoints,
        port: u16,
        schedule: Schedule,
        config: impl Fn(SocketAddrV4) -> OnOffConfig,
    ) -> Result<(), NetworkError> {
        let sender = OnOff::new(config(SocketAddrV4::new(endpoints.sink_addr, port)));
        self.install_pair(class, index, None, endpoints, port, schedule, sender)
    }

    #[allow(clippy::too_many_arguments)]
    fn install_pair(
        &mut self,
        class: TrafficClass,
        index: usize,
        hop: Option<usize>,
        endpoints: Endpoints,
        port: u16,
        schedule: Schedule,
        sender: impl Into<sim_network::apps::Application>,
    ) -> Result<(), NetworkError> {
        let sink = self
            .network
            .install_app(endpoints.sink, PacketSink::new(port))?;
        let source = self.network.install_app(endpoints.source, sender)?;

        self.network.start_app(sink, schedule.start);
        self.network.start_app(source, schedule.start);
        self.network.stop_app(source, schedule.source_stop);
        self.network.stop_app(sink, schedule.sink_stop);

        self.plan.flows.push(FlowPair {
            class,
            index,
            hop,
            source,
            sink,
            port,
            start: schedule.start,
            source_stop: schedule.source_stop,
            sink_stop: schedule.sink_stop,
        });
        Ok(())
    }
}
