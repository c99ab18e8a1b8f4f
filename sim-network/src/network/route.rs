use crate::network::InterfaceId;
use std::net::IpAddr;

#[derive(Clone, Debug)]
pub struct Route {
    pub destination: IpRange,
    pub interface: InterfaceId,
}

impl Route {
    pub(crate) fn interface_towards_destination(&self, ip: IpAddr) -> Option<InterfaceId> {
        if self.destination.contains(ip) {
            Some(self.interface)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IpRange {
    pub start: IpAddr,
    pub end_inclusive: IpAddr,
}

impl IpRange {
    pub fn contains(&self, ip: IpAddr) -> bool {
        (self.start..=self.end_inclusive).contains(&ip)
    }
}

#[test]
fn test_route_matches_only_its_subnet() {
    let route = Route {
        destination: crate::network::ip::Ipv4Cidr::from_octets([10, 10, 3, 0], 24).subnet(),
        interface: InterfaceId(7),
    };

    let inside: IpAddr = "10.10.3.1".parse().unwrap();
    let outside: IpAddr = "10.10.4.1".parse().unwrap();
    assert_eq!(
        route.interface_towards_destination(inside),
        Some(InterfaceId(7))
    );
    assert_eq!(route.interface_towards_destination(outside), None);
}
