//! Construction of the dumbbell and parking-lot topologies
//!
//! Both variants share the same conventions: `left-<i>` leaves attach to the first router and
//! `right-<i>` leaves to the last one, one pair per flow, and the measured interface is the one of
//! router 0 on the first bottleneck link.

pub mod address;
pub mod dumbbell;
pub mod parking_lot;

use crate::error::{ConfigError, TopologyError};
use crate::params::{LinkParameters, TrafficParameters};
use crate::topology::address::AddressPlan;
use crate::traffic::LeafClass;
use self::dumbbell::DumbbellTopology;
use self::parking_lot::ParkingLotTopology;
use serde::Serialize;
use sim_network::Network;
use sim_network::network::spec::{LinkSpec, QueueSpec};
use sim_network::network::{InterfaceId, LinkEnds, NodeId};
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;
use std::ops::Range;
use std::str::FromStr;
use std::time::Duration;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum TopologyKind {
    Dumbbell,
    ParkingLot,
}

impl TopologyKind {
    const NAMES: &'static str = "dumbbell, parking-lot";
}

impl FromStr for TopologyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dumbbell" => Ok(TopologyKind::Dumbbell),
            "parking-lot" => Ok(TopologyKind::ParkingLot),
            _ => Err(ConfigError::UnknownVariant {
                kind: "topology",
                name: s.to_string(),
                expected: Self::NAMES,
            }),
        }
    }
}

impl Display for TopologyKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyKind::Dumbbell => f.write_str("dumbbell"),
            TopologyKind::ParkingLot => f.write_str("parking-lot"),
        }
    }
}

/// Link specs for each class of link
#[derive(Clone, Debug)]
pub struct LinkSettings {
    pub bottleneck: LinkSpec,
    pub access: LinkSpec,
    pub cross: LinkSpec,
}

impl LinkSettings {
    pub fn new(params: &LinkParameters, cross_link_delay: Duration) -> Self {
        let bottleneck_queue = match &params.red {
            Some(red) => QueueSpec::Red(red.to_config(params.bottleneck_bandwidth_bps)),
            None => QueueSpec::DropTail {
                max_packets: params.bottleneck_buffer,
            },
        };
        let access_queue = QueueSpec::DropTail {
            max_packets: params.access_buffer,
        };

        Self {
            bottleneck: LinkSpec {
                bandwidth_bps: params.bottleneck_bandwidth_bps,
                delay: params.bottleneck_delay,
                queue: bottleneck_queue,
            },
            access: LinkSpec {
                bandwidth_bps: params.access_bandwidth_bps,
                delay: params.access_delay,
                queue: access_queue.clone(),
            },
            cross: LinkSpec {
                bandwidth_bps: params.access_bandwidth_bps,
                delay: cross_link_delay,
                queue: access_queue,
            },
        }
    }
}

/// Assigns every traffic class with flows a contiguous block of leaf indices, in a fixed order
pub fn leaf_ranges(traffic: &TrafficParameters) -> Vec<(LeafClass, Range<usize>)> {
    let counts = [
        (LeafClass::ForwardBulk, traffic.fwd_ftp_flows),
        (LeafClass::ReverseBulk, traffic.rev_ftp_flows),
        (LeafClass::TwoWay, traffic.voice_flows),
        (LeafClass::ForwardRate, traffic.fwd_streaming_flows),
        (LeafClass::ReverseRate, traffic.rev_streaming_flows),
    ];

    let mut offset = 0;
    let mut ranges = Vec::new();
    for (class, count) in counts {
        if count == 0 {
            continue;
        }

        ranges.push((class, offset..offset + count));
        offset += count;
    }

    ranges
}

/// Leaves needed on each side of the topology
pub fn leaf_count(traffic: &TrafficParameters) -> usize {
    leaf_ranges(traffic)
        .last()
        .map(|(_, range)| range.end)
        .unwrap_or(0)
}

pub enum Topology {
    Dumbbell(DumbbellTopology),
    ParkingLot(ParkingLotTopology),
}

impl Topology {
    pub fn build(
        network: &mut Network,
        kind: TopologyKind,
        hops: usize,
        traffic: &TrafficParameters,
        links: &LinkSettings,
    ) -> Result<Self, TopologyError> {
        let leaves = leaf_count(traffic);
        let topology = match kind {
            TopologyKind::Dumbbell => {
                Topology::Dumbbell(DumbbellTopology::build(network, leaves, links)?)
            }
            TopologyKind::ParkingLot => Topology::ParkingLot(ParkingLotTopology::build(
                network,
                hops,
                leaves,
                traffic.cross_ftp_flows,
                links,
            )?),
        };

        Ok(topology)
    }

    pub fn kind(&self) -> TopologyKind {
        match self {
            Topology::Dumbbell(_) => TopologyKind::Dumbbell,
            Topology::ParkingLot(_) => TopologyKind::ParkingLot,
        }
    }

    pub fn left(&self) -> &[NodeId] {
        match self {
            Topology::Dumbbell(t) => &t.left,
            Topology::ParkingLot(t) => &t.left,
        }
    }

    pub fn right(&self) -> &[NodeId] {
        match self {
            Topology::Dumbbell(t) => &t.right,
            Topology::ParkingLot(t) => &t.right,
        }
    }

    pub fn left_address(&self, index: usize) -> Option<Ipv4Addr> {
        let (interfaces, plan) = match self {
            Topology::Dumbbell(t) => (&t.left_interfaces, &t.plan),
            Topology::ParkingLot(t) => (&t.left_interfaces, &t.plan),
        };
        plan.address_of(*interfaces.get(index)?)
    }

    pub fn right_address(&self, index: usize) -> Option<Ipv4Addr> {
        let (interfaces, plan) = match self {
            Topology::Dumbbell(t) => (&t.right_interfaces, &t.plan),
            Topology::ParkingLot(t) => (&t.right_interfaces, &t.plan),
        };
        plan.address_of(*interfaces.get(index)?)
    }

    pub fn router_count(&self) -> usize {
        match self {
            Topology::Dumbbell(t) => t.routers.len(),
            Topology::ParkingLot(t) => t.routers.len(),
        }
    }

    pub fn bottleneck_links(&self) -> &[LinkEnds] {
        match self {
            Topology::Dumbbell(t) => std::slice::from_ref(&t.bottleneck),
            Topology::ParkingLot(t) => &t.bottlenecks,
        }
    }

    /// The device of router 0 on the first bottleneck link
    pub fn bottleneck_interface(&self) -> InterfaceId {
        match self {
            Topology::Dumbbell(t) => t.bottleneck.a,
            Topology::ParkingLot(t) => t.bottlenecks[0].a,
        }
    }

    /// Cross-source and cross-sink leaves, per hop (empty for a dumbbell)
    pub fn cross_leaves(&self) -> (&[Vec<NodeId>], &[Vec<NodeId>]) {
        match self {
            Topology::Dumbbell(_) => {
                let none: &[Vec<NodeId>] = &[];
                (none, none)
            }
            Topology::ParkingLot(t) => (&t.cross_sources, &t.cross_sinks),
        }
    }

    pub fn cross_sink_address(&self, hop: usize, index: usize) -> Option<Ipv4Addr> {
        match self {
            Topology::Dumbbell(_) => None,
            Topology::ParkingLot(t) => t.cross_sink_address(hop, index),
        }
    }

    pub fn plan(&self) -> &AddressPlan {
        match self {
            Topology::Dumbbell(t) => &t.plan,
            Topology::ParkingLot(t) => &t.plan,
        }
    }
}

#[cfg(test)]
pub(crate) fn link_settings_for_tests(use_aqm: bool) -> LinkSettings {
    use crate::params::{AccessBufferPolicy, TopologyTargets, derive_link_parameters};

    let targets = TopologyTargets {
        bottleneck_bandwidth_mbps: 10.0,
        rttp: 0.08,
        rtt_difference: 0.0,
        bottleneck_count: 1,
        cross_link_delay: Duration::from_millis(10),
    };
    let traffic = TrafficParameters {
        fwd_ftp_flows: 5,
        rev_ftp_flows: 0,
        voice_flows: 0,
        fwd_streaming_flows: 0,
        rev_streaming_flows: 0,
        cross_ftp_flows: 0,
        streaming_rate_kbps: 640.0,
        streaming_packet_size: 840,
        use_aqm,
        simulation_time: Duration::from_secs(10),
    };
    let params = derive_link_parameters(&targets, &traffic, AccessBufferPolicy::MirrorBottleneck)
        .expect("valid parameters");
    LinkSettings::new(&params, targets.cross_link_delay)
}
