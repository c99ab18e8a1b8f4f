use crate::network::NetworkError;
use crate::network::ip::Ipv4Cidr;
use std::net::Ipv4Addr;

/// Hands out consecutive host addresses within a subnet and moves on to the next subnet of the
/// same size on demand
#[derive(Clone, Debug)]
pub struct Ipv4AddressAllocator {
    network_bits: u32,
    network_prefix: u8,
    next_host: u64,
}

impl Ipv4AddressAllocator {
    pub fn new(base: Ipv4Cidr) -> Self {
        Self {
            network_bits: base.address.to_bits() & base.mask(),
            network_prefix: base.network_prefix,
            next_host: 1,
        }
    }

    pub fn network(&self) -> Ipv4Cidr {
        Ipv4Cidr {
            address: Ipv4Addr::from_bits(self.network_bits),
            network_prefix: self.network_prefix,
        }
    }

    fn host_bits(&self) -> u32 {
        32 - self.network_prefix as u32
    }

    pub fn next_address(&mut self) -> Result<Ipv4Cidr, NetworkError> {
        // The all-zeros and all-ones host parts are reserved
        let usable_hosts = (1u64 << self.host_bits()).saturating_sub(2).max(1);
        if self.next_host > usable_hosts {
            return Err(NetworkError::AddressesExhausted(self.network()));
        }

        let address = Ipv4Addr::from_bits(self.network_bits | self.next_host as u32);
        self.next_host += 1;

        Ok(Ipv4Cidr {
            address,
            network_prefix: self.network_prefix,
        })
    }

    pub fn new_network(&mut self) {
        let step = 1u64 << self.host_bits();
        self.network_bits = (self.network_bits as u64 + step) as u32;
        self.next_host = 1;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_addresses_advance_per_network() {
        let mut allocator = Ipv4AddressAllocator::new(Ipv4Cidr::from_octets([10, 1, 1, 0], 24));
        assert_eq!(allocator.next_address().unwrap().to_string(), "10.1.1.1/24");
        assert_eq!(allocator.next_address().unwrap().to_string(), "10.1.1.2/24");

        allocator.new_network();
        assert_eq!(allocator.network().to_string(), "10.1.2.0/24");
        assert_eq!(allocator.next_address().unwrap().to_string(), "10.1.2.1/24");
    }

    #[test]
    fn test_network_cursor_carries_into_next_octet() {
        let mut allocator = Ipv4AddressAllocator::new(Ipv4Cidr::from_octets([10, 1, 255, 0], 24));
        allocator.new_network();
        assert_eq!(allocator.network().to_string(), "10.2.0.0/24");
    }

    #[test]
    fn test_base_address_is_masked() {
        let allocator = Ipv4AddressAllocator::new(Ipv4Cidr::from_octets([10, 50, 1, 77], 24));
        assert_eq!(allocator.network().to_string(), "10.50.1.0/24");
    }

    #[test]
    fn test_exhausted_subnet_is_an_error() {
        let mut allocator = Ipv4AddressAllocator::new(Ipv4Cidr::from_octets([10, 0, 0, 0], 30));
        assert!(allocator.next_address().is_ok());
        assert!(allocator.next_address().is_ok());
        assert!(matches!(
            allocator.next_address(),
            Err(NetworkError::AddressesExhausted(_))
        ));
    }
}
