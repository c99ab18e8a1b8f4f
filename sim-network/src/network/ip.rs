use crate::network::route::IpRange;
use std::fmt::{Display, Formatter};
use std::net::{IpAddr, Ipv4Addr};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ipv4Cidr {
    pub(crate) address: Ipv4Addr,
    pub(crate) network_prefix: u8,
}

impl Ipv4Cidr {
    /// Builds an address with its prefix length, clamped into `1..=32`
    pub fn from_octets(octets: [u8; 4], network_prefix: u8) -> Self {
        Self {
            address: Ipv4Addr::from(octets),
            network_prefix: network_prefix.clamp(1, 32),
        }
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn network_prefix(&self) -> u8 {
        self.network_prefix
    }

    pub(crate) fn as_ip_addr(&self) -> IpAddr {
        IpAddr::V4(self.address)
    }

    pub(crate) fn mask(&self) -> u32 {
        u32::MAX << (32 - self.network_prefix)
    }

    /// The range of addresses in the same subnet as this address
    pub fn subnet(&self) -> IpRange {
        let bits = self.address.to_bits();
        let mask = self.mask();
        IpRange {
            start: IpAddr::V4(Ipv4Addr::from_bits(bits & mask)),
            end_inclusive: IpAddr::V4(Ipv4Addr::from_bits(bits | !mask)),
        }
    }
}

impl Display for Ipv4Cidr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.network_prefix)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_subnet_of_host_address() {
        let cidr = Ipv4Cidr::from_octets([10, 50, 3, 2], 24);
        let subnet = cidr.subnet();
        assert_eq!(subnet.start.to_string(), "10.50.3.0");
        assert_eq!(subnet.end_inclusive.to_string(), "10.50.3.255");
        assert_eq!(cidr.to_string(), "10.50.3.2/24");
    }

    #[test]
    fn test_subnets_of_other_prefixes() {
        let cases = [
            ([10, 0, 0, 9], 8, "10.0.0.0", "10.255.255.255"),
            ([20, 3, 0, 1], 12, "20.0.0.0", "20.15.255.255"),
            ([10, 50, 1, 1], 32, "10.50.1.1", "10.50.1.1"),
        ];

        for (octets, prefix, start, end_inclusive) in cases {
            let subnet = Ipv4Cidr::from_octets(octets, prefix).subnet();
            assert_eq!(subnet.start.to_string(), start);
            assert_eq!(subnet.end_inclusive.to_string(), end_inclusive);
        }
    }

    #[test]
    fn test_prefix_is_clamped() {
        assert_eq!(Ipv4Cidr::from_octets([10, 0, 0, 1], 0).network_prefix(), 1);
        assert_eq!(Ipv4Cidr::from_octets([10, 0, 0, 1], 40).network_prefix(), 32);
    }
}
