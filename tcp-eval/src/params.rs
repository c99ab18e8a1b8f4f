//! Derivation of per-link parameters from the aggregate targets of an experiment
//!
//! Delays are split between the bottleneck chain and the access links, access links get twice the
//! bottleneck bandwidth, and buffers are sized after the bandwidth-delay product of the mean RTT
//! seen by the forward flows.

use crate::error::ConfigError;
use serde::Serialize;
use sim_network::apps::bulk_send::{DEFAULT_SEGMENT_SIZE, SEGMENT_HEADER_BYTES};
use sim_network::network::spec::RedConfig;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

/// Share of the round-trip propagation delay spent on the bottleneck chain
const BOTTLENECK_DELAY_SHARE: f64 = 0.8;
/// Share of the round-trip propagation delay spent on the two access links of a path
const ACCESS_DELAY_SHARE: f64 = 0.2;
const BDP_FACTOR: f64 = 1.0;

/// Targets describing the network as a whole
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TopologyTargets {
    pub bottleneck_bandwidth_mbps: f64,
    /// Round-trip propagation delay, in seconds
    pub rttp: f64,
    /// Difference between the round-trip propagation delays of consecutive forward flows, in
    /// seconds
    pub rtt_difference: f64,
    /// Number of bottleneck hops (1 for a dumbbell)
    pub bottleneck_count: usize,
    /// Propagation delay of the links carrying cross traffic
    pub cross_link_delay: Duration,
}

/// The traffic an experiment offers to the network
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrafficParameters {
    pub fwd_ftp_flows: usize,
    pub rev_ftp_flows: usize,
    pub voice_flows: usize,
    pub fwd_streaming_flows: usize,
    pub rev_streaming_flows: usize,
    /// Cross flows per bottleneck hop (parking-lot only)
    pub cross_ftp_flows: usize,
    pub streaming_rate_kbps: f64,
    /// Payload size of streaming datagrams, in bytes
    pub streaming_packet_size: usize,
    pub use_aqm: bool,
    pub simulation_time: Duration,
}

impl TrafficParameters {
    pub fn streaming_flows(&self) -> usize {
        self.fwd_streaming_flows + self.rev_streaming_flows
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub enum AccessBufferPolicy {
    /// Access links get the same buffer as the bottleneck
    #[default]
    MirrorBottleneck,
    /// Access links are sized after their own bandwidth-delay product
    OwnBdp,
}

impl AccessBufferPolicy {
    const NAMES: &'static str = "mirror-bottleneck, own-bdp";
}

impl FromStr for AccessBufferPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mirror-bottleneck" => Ok(AccessBufferPolicy::MirrorBottleneck),
            "own-bdp" => Ok(AccessBufferPolicy::OwnBdp),
            _ => Err(ConfigError::UnknownVariant {
                kind: "access buffer policy",
                name: s.to_string(),
                expected: Self::NAMES,
            }),
        }
    }
}

impl Display for AccessBufferPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessBufferPolicy::MirrorBottleneck => f.write_str("mirror-bottleneck"),
            AccessBufferPolicy::OwnBdp => f.write_str("own-bdp"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RedParameters {
    pub min_th: f64,
    pub max_th: f64,
    pub qw: f64,
    pub l_interm: f64,
    pub gentle: bool,
    pub queue_limit: usize,
}

impl RedParameters {
    fn for_buffer(buffer: usize) -> Self {
        Self {
            min_th: 0.6 * buffer as f64,
            max_th: 0.8 * buffer as f64,
            qw: 0.001,
            l_interm: 10.0,
            gentle: true,
            queue_limit: buffer,
        }
    }

    pub fn to_config(&self, link_bandwidth_bps: u64) -> RedConfig {
        RedConfig {
            min_th: self.min_th,
            max_th: self.max_th,
            queue_limit: self.queue_limit,
            qw: self.qw,
            l_interm: self.l_interm,
            gentle: self.gentle,
            mean_packet_size: DEFAULT_SEGMENT_SIZE + SEGMENT_HEADER_BYTES,
            link_bandwidth_bps,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LinkParameters {
    pub bottleneck_bandwidth_bps: u64,
    /// Propagation delay of each bottleneck hop
    pub bottleneck_delay: Duration,
    pub access_bandwidth_bps: u64,
    pub access_delay: Duration,
    pub delay_skew: Duration,
    pub mean_rtt_ms: f64,
    pub bdp_factor: f64,
    /// In packets
    pub bottleneck_buffer: usize,
    /// In packets
    pub access_buffer: usize,
    /// Only present when active queue management is enabled
    pub red: Option<RedParameters>,
}

pub fn validate(targets: &TopologyTargets, traffic: &TrafficParameters) -> Result<(), ConfigError> {
    let bandwidth = targets.bottleneck_bandwidth_mbps;
    if !(bandwidth > 0.0 && bandwidth.is_finite()) {
        return Err(ConfigError::NonPositiveBandwidth(bandwidth));
    }

    if targets.bottleneck_count == 0 {
        return Err(ConfigError::ZeroHops);
    }

    for (name, value) in [
        ("rttp", targets.rttp),
        ("rtt-difference", targets.rtt_difference),
    ] {
        if !(value >= 0.0 && value.is_finite()) {
            return Err(ConfigError::InvalidDuration { name, value });
        }
    }

    if traffic.streaming_flows() > 0 {
        let rate = traffic.streaming_rate_kbps;
        if !(rate > 0.0 && rate.is_finite()) {
            return Err(ConfigError::NonPositiveStreamingRate(rate));
        }
        if traffic.streaming_packet_size == 0 {
            return Err(ConfigError::ZeroStreamingPacketSize);
        }
    }

    Ok(())
}

pub fn derive_link_parameters(
    targets: &TopologyTargets,
    traffic: &TrafficParameters,
    access_buffer_policy: AccessBufferPolicy,
) -> Result<LinkParameters, ConfigError> {
    validate(targets, traffic)?;

    let bandwidth_mbps = targets.bottleneck_bandwidth_mbps;
    let rttp = targets.rttp;
    let hops = targets.bottleneck_count as f64;

    let bottleneck_delay = rttp * 0.5 * BOTTLENECK_DELAY_SHARE / hops;
    let access_delay = rttp * 0.5 * ACCESS_DELAY_SHARE / 2.0;
    let access_bandwidth_mbps = 2.0 * bandwidth_mbps;
    let delay_skew = targets.rtt_difference / 4.0;

    let spread_flows = traffic.fwd_ftp_flows.saturating_sub(1) as f64;
    let mean_rtt_ms = (rttp + targets.rtt_difference * spread_flows / 2.0) * 1000.0;

    let bulk_flows = traffic.fwd_ftp_flows + traffic.rev_ftp_flows;
    let bottleneck_buffer = buffer_size(bandwidth_mbps, mean_rtt_ms, bulk_flows);
    let access_buffer = match access_buffer_policy {
        AccessBufferPolicy::MirrorBottleneck => bottleneck_buffer,
        AccessBufferPolicy::OwnBdp => buffer_size(access_bandwidth_mbps, mean_rtt_ms, bulk_flows),
    };

    Ok(LinkParameters {
        bottleneck_bandwidth_bps: mbps_to_bps(bandwidth_mbps),
        bottleneck_delay: Duration::from_secs_f64(bottleneck_delay),
        access_bandwidth_bps: mbps_to_bps(access_bandwidth_mbps),
        access_delay: Duration::from_secs_f64(access_delay),
        delay_skew: Duration::from_secs_f64(delay_skew),
        mean_rtt_ms,
        bdp_factor: BDP_FACTOR,
        bottleneck_buffer,
        access_buffer,
        red: traffic
            .use_aqm
            .then(|| RedParameters::for_buffer(bottleneck_buffer)),
    })
}

/// Buffer size in packets, never below two packets per bulk flow
fn buffer_size(bandwidth_mbps: f64, mean_rtt_ms: f64, bulk_flows: usize) -> usize {
    // Mbps * ms / 8 is a kilobyte count, i.e. roughly the number of 1 KB packets
    let bdp_packets = (BDP_FACTOR * bandwidth_mbps * mean_rtt_ms / 8.0) as usize;
    bdp_packets.max(2 * bulk_flows)
}

fn mbps_to_bps(mbps: f64) -> u64 {
    (mbps * 1_000_000.0).round() as u64
}

#[cfg(test)]
mod test {
    use super::*;
    use bon::builder;

    #[builder]
    fn targets(
        bandwidth_mbps: Option<f64>,
        rttp: Option<f64>,
        rtt_difference: Option<f64>,
        hops: Option<usize>,
    ) -> TopologyTargets {
        TopologyTargets {
            bottleneck_bandwidth_mbps: bandwidth_mbps.unwrap_or(10.0),
            rttp: rttp.unwrap_or(0.08),
            rtt_difference: rtt_difference.unwrap_or(0.0),
            bottleneck_count: hops.unwrap_or(1),
            cross_link_delay: Duration::from_millis(10),
        }
    }

    #[builder]
    fn traffic(
        fwd_ftp_flows: Option<usize>,
        rev_ftp_flows: Option<usize>,
        streaming_flows: Option<usize>,
        streaming_rate_kbps: Option<f64>,
        streaming_packet_size: Option<usize>,
        use_aqm: Option<bool>,
    ) -> TrafficParameters {
        TrafficParameters {
            fwd_ftp_flows: fwd_ftp_flows.unwrap_or(5),
            rev_ftp_flows: rev_ftp_flows.unwrap_or(5),
            voice_flows: 0,
            fwd_streaming_flows: streaming_flows.unwrap_or(0),
            rev_streaming_flows: 0,
            cross_ftp_flows: 0,
            streaming_rate_kbps: streaming_rate_kbps.unwrap_or(640.0),
            streaming_packet_size: streaming_packet_size.unwrap_or(840),
            use_aqm: use_aqm.unwrap_or(false),
            simulation_time: Duration::from_secs(10),
        }
    }

    fn assert_secs(actual: Duration, expected: f64) {
        assert!(
            (actual.as_secs_f64() - expected).abs() < 1e-9,
            "{actual:?} != {expected}s"
        );
    }

    #[test]
    fn test_default_dumbbell_parameters() {
        let params = derive_link_parameters(
            &targets().call(),
            &traffic().call(),
            AccessBufferPolicy::MirrorBottleneck,
        )
        .unwrap();

        assert_eq!(params.bottleneck_bandwidth_bps, 10_000_000);
        assert_eq!(params.access_bandwidth_bps, 20_000_000);
        assert_secs(params.bottleneck_delay, 0.032);
        assert_secs(params.access_delay, 0.004);
        assert_secs(params.delay_skew, 0.0);
        assert_eq!(params.mean_rtt_ms, 80.0);
        assert_eq!(params.bottleneck_buffer, 100);
        assert_eq!(params.access_buffer, 100);
        assert_eq!(params.red, None);
    }

    #[test]
    fn test_bottleneck_delay_is_split_across_hops() {
        let params = derive_link_parameters(
            &targets().hops(4).call(),
            &traffic().call(),
            AccessBufferPolicy::MirrorBottleneck,
        )
        .unwrap();

        assert_secs(params.bottleneck_delay, 0.008);
        assert_secs(params.access_delay, 0.004);
    }

    #[test]
    fn test_rtt_difference_stretches_mean_rtt() {
        let params = derive_link_parameters(
            &targets().rttp(0.5).rtt_difference(0.25).call(),
            &traffic().fwd_ftp_flows(5).call(),
            AccessBufferPolicy::MirrorBottleneck,
        )
        .unwrap();

        assert_secs(params.delay_skew, 0.0625);
        // (0.5 + 0.25 * 4 / 2) * 1000
        assert_eq!(params.mean_rtt_ms, 1000.0);
        assert_eq!(params.bottleneck_buffer, 1250);
    }

    #[test]
    fn test_no_forward_flows_does_not_underflow() {
        let params = derive_link_parameters(
            &targets().rtt_difference(0.02).call(),
            &traffic().fwd_ftp_flows(0).rev_ftp_flows(0).call(),
            AccessBufferPolicy::MirrorBottleneck,
        )
        .unwrap();

        assert_eq!(params.mean_rtt_ms, 80.0);
    }

    #[test]
    fn test_buffer_never_below_two_packets_per_bulk_flow() {
        for (bandwidth_mbps, fwd, rev) in [(0.01, 5, 5), (0.5, 40, 10), (1.0, 0, 0), (100.0, 3, 2)]
        {
            let params = derive_link_parameters(
                &targets().bandwidth_mbps(bandwidth_mbps).call(),
                &traffic().fwd_ftp_flows(fwd).rev_ftp_flows(rev).call(),
                AccessBufferPolicy::MirrorBottleneck,
            )
            .unwrap();

            assert!(params.bottleneck_buffer >= 2 * (fwd + rev));
        }

        // The BDP term is 0.1 * 80 / 8 = 1 packet
        let params = derive_link_parameters(
            &targets().bandwidth_mbps(0.1).call(),
            &traffic().call(),
            AccessBufferPolicy::MirrorBottleneck,
        )
        .unwrap();
        assert_eq!(params.bottleneck_buffer, 20);
    }

    #[test]
    fn test_red_thresholds_follow_buffer() {
        let params = derive_link_parameters(
            &targets().call(),
            &traffic().use_aqm(true).call(),
            AccessBufferPolicy::MirrorBottleneck,
        )
        .unwrap();

        let red = params.red.unwrap();
        assert_eq!(red.min_th, 60.0);
        assert_eq!(red.max_th, 80.0);
        assert_eq!(red.queue_limit, 100);
        assert_eq!(red.qw, 0.001);
        assert_eq!(red.l_interm, 10.0);
        assert!(red.gentle);
    }

    #[test]
    fn test_access_buffer_from_own_bdp() {
        let params = derive_link_parameters(
            &targets().call(),
            &traffic().call(),
            AccessBufferPolicy::OwnBdp,
        )
        .unwrap();

        assert_eq!(params.bottleneck_buffer, 100);
        assert_eq!(params.access_buffer, 200);
    }

    #[test]
    fn test_invalid_targets_are_rejected() {
        let traffic = traffic().call();
        for bandwidth_mbps in [0.0, -1.0, f64::NAN] {
            let result = derive_link_parameters(
                &targets().bandwidth_mbps(bandwidth_mbps).call(),
                &traffic,
                AccessBufferPolicy::MirrorBottleneck,
            );
            assert!(matches!(result, Err(ConfigError::NonPositiveBandwidth(_))));
        }

        let result = derive_link_parameters(
            &targets().hops(0).call(),
            &traffic,
            AccessBufferPolicy::MirrorBottleneck,
        );
        assert_eq!(result, Err(ConfigError::ZeroHops));

        let result = derive_link_parameters(
            &targets().rttp(-0.1).call(),
            &traffic,
            AccessBufferPolicy::MirrorBottleneck,
        );
        assert!(matches!(result, Err(ConfigError::InvalidDuration { .. })));
    }

    #[test]
    fn test_streaming_settings_are_validated_only_when_used() {
        let result = derive_link_parameters(
            &targets().call(),
            &traffic().streaming_flows(2).streaming_rate_kbps(0.0).call(),
            AccessBufferPolicy::MirrorBottleneck,
        );
        assert_eq!(result, Err(ConfigError::NonPositiveStreamingRate(0.0)));

        let result = derive_link_parameters(
            &targets().call(),
            &traffic().streaming_flows(2).streaming_packet_size(0).call(),
            AccessBufferPolicy::MirrorBottleneck,
        );
        assert_eq!(result, Err(ConfigError::ZeroStreamingPacketSize));

        let result = derive_link_parameters(
            &targets().call(),
            &traffic().streaming_flows(0).streaming_rate_kbps(0.0).call(),
            AccessBufferPolicy::MirrorBottleneck,
        );
        assert!(result.is_ok());
    }
}
