use crate::error::TopologyError;
use crate::topology::LinkSettings;
use crate::topology::address::{AddressPlan, SegmentBases};
use sim_network::Network;
use sim_network::network::address::Ipv4AddressAllocator;
use sim_network::network::spec::NodeKind;
use sim_network::network::{InterfaceId, LinkEnds, NodeId};

/// Two routers joined by a single bottleneck link, with `left` leaves behind the first router
/// and `right` leaves behind the second one
pub struct DumbbellTopology {
    pub routers: [NodeId; 2],
    pub left: Vec<NodeId>,
    pub right: Vec<NodeId>,
    /// The leaf-side device of every left access link
    pub left_interfaces: Vec<InterfaceId>,
    /// The leaf-side device of every right access link
    pub right_interfaces: Vec<InterfaceId>,
    pub bottleneck: LinkEnds,
    pub plan: AddressPlan,
}

impl DumbbellTopology {
    pub fn build(
        network: &mut Network,
        leaves: usize,
        links: &LinkSettings,
    ) -> Result<Self, TopologyError> {
        let bases = SegmentBases::dumbbell();
        let mut plan = AddressPlan::new();

        let routers = [
            network.add_node("router-0", NodeKind::Router),
            network.add_node("router-1", NodeKind::Router),
        ];
        let left: Vec<_> = (0..leaves)
            .map(|i| network.add_node(format!("left-{i}"), NodeKind::Host))
            .collect();
        let right: Vec<_> = (0..leaves)
            .map(|i| network.add_node(format!("right-{i}"), NodeKind::Host))
            .collect();

        let mut left_segment = Ipv4AddressAllocator::new(bases.left);
        let mut left_interfaces = Vec::with_capacity(leaves);
        for &leaf in &left {
            let ends = network.add_link(leaf, routers[0], &links.access)?;
            plan.address_link(network, &mut left_segment, ends.a, ends.b)?;
            left_interfaces.push(ends.a);
        }

        let mut right_segment = Ipv4AddressAllocator::new(bases.right);
        let mut right_interfaces = Vec::with_capacity(leaves);
        for &leaf in &right {
            let ends = network.add_link(leaf, routers[1], &links.access)?;
            plan.address_link(network, &mut right_segment, ends.a, ends.b)?;
            right_interfaces.push(ends.a);
        }

        let mut router_segment = Ipv4AddressAllocator::new(bases.router);
        let bottleneck = network.add_link(routers[0], routers[1], &links.bottleneck)?;
        plan.address_link(network, &mut router_segment, bottleneck.a, bottleneck.b)?;

        Ok(Self {
            routers,
            left,
            right,
            left_interfaces,
            right_interfaces,
            bottleneck,
            plan,
        })
    }
}
