use sim_network::network::NetworkError;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Invalid experiment parameters, detected before anything gets built
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("bottleneck bandwidth must be a positive number of Mbps (got {0})")]
    NonPositiveBandwidth(f64),
    #[error("the number of bottleneck hops must be at least 1")]
    ZeroHops,
    #[error("streaming flows need a positive rate (got {0} Kbps)")]
    NonPositiveStreamingRate(f64),
    #[error("streaming flows need a non-zero packet size")]
    ZeroStreamingPacketSize,
    #[error("`{name}` must be a non-negative number of seconds (got {value})")]
    InvalidDuration { name: &'static str, value: f64 },
    #[error("unknown {kind} `{name}` (expected one of: {expected})")]
    UnknownVariant {
        kind: &'static str,
        name: String,
        expected: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("a parking lot needs at least one bottleneck hop")]
    NoHops,
    #[error("address {address} was handed out twice")]
    DuplicateAddress { address: Ipv4Addr },
}
