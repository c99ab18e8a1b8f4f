use crate::error::TopologyError;
use sim_network::Network;
use sim_network::network::InterfaceId;
use sim_network::network::address::Ipv4AddressAllocator;
use sim_network::network::ip::Ipv4Cidr;
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// The first network of every addressing segment shared by both topologies
#[derive(Clone, Debug)]
pub struct SegmentBases {
    pub left: Ipv4Cidr,
    pub right: Ipv4Cidr,
    pub router: Ipv4Cidr,
}

impl SegmentBases {
    pub fn dumbbell() -> Self {
        Self {
            left: cidr([10, 1, 1, 0]),
            right: cidr([10, 10, 1, 0]),
            router: cidr([10, 100, 1, 0]),
        }
    }

    pub fn parking_lot() -> Self {
        Self {
            left: cidr([10, 1, 1, 0]),
            right: cidr([10, 10, 1, 0]),
            router: cidr([10, 50, 1, 0]),
        }
    }
}

/// The segments of the cross-traffic leaves, which only parking lots have
#[derive(Clone, Debug)]
pub struct CrossSegmentBases {
    pub source: Ipv4Cidr,
    pub sink: Ipv4Cidr,
}

impl CrossSegmentBases {
    pub fn parking_lot() -> Self {
        Self {
            source: cidr([10, 100, 1, 0]),
            sink: cidr([10, 150, 1, 0]),
        }
    }
}

fn cidr(octets: [u8; 4]) -> Ipv4Cidr {
    Ipv4Cidr::from_octets(octets, 24)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AddressAssignment {
    pub interface: InterfaceId,
    pub address: Ipv4Cidr,
}

/// Every address handed out while building a topology, in assignment order
#[derive(Clone, Debug, Default)]
pub struct AddressPlan {
    assignments: Vec<AddressAssignment>,
    used: HashSet<Ipv4Addr>,
}

impl AddressPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Addresses both ends of a point-to-point link, `first` getting the lowest address, and
    /// moves the segment on to a fresh network
    pub fn address_link(
        &mut self,
        network: &mut Network,
        segment: &mut Ipv4AddressAllocator,
        first: InterfaceId,
        second: InterfaceId,
    ) -> Result<(), TopologyError> {
        for interface in [first, second] {
            let address = segment.next_address()?;
            if !self.used.insert(address.address()) {
                return Err(TopologyError::DuplicateAddress {
                    address: address.address(),
                });
            }

            network.assign_address(interface, address);
            self.assignments.push(AddressAssignment { interface, address });
        }

        segment.new_network();
        Ok(())
    }

    pub fn assignments(&self) -> &[AddressAssignment] {
        &self.assignments
    }

    pub fn address_of(&self, interface: InterfaceId) -> Option<Ipv4Addr> {
        self.assignments
            .iter()
            .find(|a| a.interface == interface)
            .map(|a| a.address.address())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_segment_bases_do_not_overlap() {
        let bases = SegmentBases::parking_lot();
        let cross = CrossSegmentBases::parking_lot();
        let mut seen = HashSet::new();
        for base in [bases.left, bases.right, bases.router, cross.source, cross.sink] {
            assert!(seen.insert(base.address()), "{base}");
        }

        assert_eq!(SegmentBases::dumbbell().router.to_string(), "10.100.1.0/24");
    }
}
