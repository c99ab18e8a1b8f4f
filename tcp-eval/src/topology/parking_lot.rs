use crate::error::TopologyError;
use crate::topology::LinkSettings;
use crate::topology::address::{AddressPlan, CrossSegmentBases, SegmentBases};
use sim_network::Network;
use sim_network::network::address::Ipv4AddressAllocator;
use sim_network::network::spec::NodeKind;
use sim_network::network::{InterfaceId, LinkEnds, NodeId};
use std::net::Ipv4Addr;

/// A chain of `hops + 1` routers, with left leaves behind the first router, right leaves behind
/// the last one, and cross traffic entering and leaving at every hop
pub struct ParkingLotTopology {
    pub routers: Vec<NodeId>,
    pub left: Vec<NodeId>,
    pub right: Vec<NodeId>,
    pub left_interfaces: Vec<InterfaceId>,
    pub right_interfaces: Vec<InterfaceId>,
    /// Cross sources attached to router `hop`, per hop
    pub cross_sources: Vec<Vec<NodeId>>,
    /// Cross sinks attached to router `hop + 1`, per hop
    pub cross_sinks: Vec<Vec<NodeId>>,
    /// The leaf-side device of every cross sink link, per hop
    pub cross_sink_interfaces: Vec<Vec<InterfaceId>>,
    /// One link per hop, never empty
    pub bottlenecks: Vec<LinkEnds>,
    // Two devices per hop: the upstream router's, then the downstream router's
    router_interfaces: Vec<InterfaceId>,
    pub plan: AddressPlan,
}

impl ParkingLotTopology {
    pub fn build(
        network: &mut Network,
        hops: usize,
        leaves: usize,
        cross_flows_per_hop: usize,
        links: &LinkSettings,
    ) -> Result<Self, TopologyError> {
        if hops == 0 {
            return Err(TopologyError::NoHops);
        }

        let bases = SegmentBases::parking_lot();
        let mut plan = AddressPlan::new();

        let routers: Vec<_> = (0..=hops)
            .map(|i| network.add_node(format!("router-{i}"), NodeKind::Router))
            .collect();
        let first_router = routers[0];
        let last_router = routers[hops];

        let left: Vec<_> = (0..leaves)
            .map(|i| network.add_node(format!("left-{i}"), NodeKind::Host))
            .collect();
        let right: Vec<_> = (0..leaves)
            .map(|i| network.add_node(format!("right-{i}"), NodeKind::Host))
            .collect();
        let cross_sources: Vec<Vec<_>> = (0..hops)
            .map(|hop| {
                (0..cross_flows_per_hop)
                    .map(|j| network.add_node(format!("cross-source-{hop}-{j}"), NodeKind::Host))
                    .collect()
            })
            .collect();
        let cross_sinks: Vec<Vec<_>> = (0..hops)
            .map(|hop| {
                (0..cross_flows_per_hop)
                    .map(|j| network.add_node(format!("cross-sink-{hop}-{j}"), NodeKind::Host))
                    .collect()
            })
            .collect();

        let mut left_segment = Ipv4AddressAllocator::new(bases.left);
        let mut left_interfaces = Vec::with_capacity(leaves);
        for &leaf in &left {
            let ends = network.add_link(leaf, first_router, &links.access)?;
            plan.address_link(network, &mut left_segment, ends.a, ends.b)?;
            left_interfaces.push(ends.a);
        }

        let mut right_segment = Ipv4AddressAllocator::new(bases.right);
        let mut right_interfaces = Vec::with_capacity(leaves);
        for &leaf in &right {
            let ends = network.add_link(leaf, last_router, &links.access)?;
            plan.address_link(network, &mut right_segment, ends.a, ends.b)?;
            right_interfaces.push(ends.a);
        }

        let mut router_segment = Ipv4AddressAllocator::new(bases.router);
        let mut bottlenecks = Vec::with_capacity(hops);
        let mut router_interfaces = Vec::with_capacity(2 * hops);
        for pair in routers.windows(2) {
            let ends = network.add_link(pair[0], pair[1], &links.bottleneck)?;
            plan.address_link(network, &mut router_segment, ends.a, ends.b)?;
            router_interfaces.extend([ends.a, ends.b]);
            bottlenecks.push(ends);
        }

        // The cross-source and cross-sink cursors each span every hop
        let cross_bases = CrossSegmentBases::parking_lot();
        let mut cross_source_segment = Ipv4AddressAllocator::new(cross_bases.source);
        let mut cross_sink_segment = Ipv4AddressAllocator::new(cross_bases.sink);
        let mut cross_sink_interfaces = Vec::with_capacity(hops);
        for hop in 0..hops {
            for &source in &cross_sources[hop] {
                let ends = network.add_link(routers[hop], source, &links.cross)?;
                plan.address_link(network, &mut cross_source_segment, ends.a, ends.b)?;
            }

            let mut sink_interfaces = Vec::with_capacity(cross_flows_per_hop);
            for &sink in &cross_sinks[hop] {
                let ends = network.add_link(routers[hop + 1], sink, &links.cross)?;
                plan.address_link(network, &mut cross_sink_segment, ends.a, ends.b)?;
                sink_interfaces.push(ends.b);
            }
            cross_sink_interfaces.push(sink_interfaces);
        }

        Ok(Self {
            routers,
            left,
            right,
            left_interfaces,
            right_interfaces,
            cross_sources,
            cross_sinks,
            cross_sink_interfaces,
            bottlenecks,
            router_interfaces,
            plan,
        })
    }

    pub fn hops(&self) -> usize {
        self.bottlenecks.len()
    }

    /// The device of router `from` facing the adjacent router `to`
    pub fn router_to_router_interface(&self, from: usize, to: usize) -> Option<InterfaceId> {
        if to >= self.routers.len() || from.abs_diff(to) != 1 {
            return None;
        }

        let index = if from < to { 2 * from } else { 2 * from - 1 };
        self.router_interfaces.get(index).copied()
    }

    /// The address of router `from` on the link towards the adjacent router `to`
    pub fn router_to_router_address(&self, from: usize, to: usize) -> Option<Ipv4Addr> {
        self.plan
            .address_of(self.router_to_router_interface(from, to)?)
    }

    pub fn cross_sink_address(&self, hop: usize, index: usize) -> Option<Ipv4Addr> {
        let interface = *self.cross_sink_interfaces.get(hop)?.get(index)?;
        self.plan.address_of(interface)
    }
}
