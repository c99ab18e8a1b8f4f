use std::time::Duration;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Host,
    Router,
}

/// A point-to-point link; both devices share the bandwidth and delay, and each gets its own
/// queue built from `queue`
#[derive(Clone, Debug, PartialEq)]
pub struct LinkSpec {
    pub bandwidth_bps: u64,
    pub delay: Duration,
    pub queue: QueueSpec,
}

#[derive(Clone, Debug, PartialEq)]
pub enum QueueSpec {
    DropTail { max_packets: usize },
    Red(RedConfig),
}

impl QueueSpec {
    pub fn capacity_packets(&self) -> usize {
        match self {
            QueueSpec::DropTail { max_packets } => *max_packets,
            QueueSpec::Red(red) => red.queue_limit,
        }
    }
}

/// Random early detection, as described by Floyd and Jacobson, with the "gentle" extension
#[derive(Clone, Debug, PartialEq)]
pub struct RedConfig {
    /// Average queue size (in packets) below which nothing is dropped
    pub min_th: f64,
    /// Average queue size (in packets) at which the drop probability reaches `1 / l_interm`
    pub max_th: f64,
    /// Hard limit on the number of queued packets
    pub queue_limit: usize,
    /// Weight of the instantaneous queue size in the moving average
    pub qw: f64,
    /// Inverse of the maximum drop probability between the thresholds
    pub l_interm: f64,
    /// Ramp the drop probability from `1 / l_interm` to 1 between `max_th` and `2 * max_th`,
    /// instead of dropping everything above `max_th`
    pub gentle: bool,
    /// Packet size used to estimate how many packets could have been sent while idle
    pub mean_packet_size: usize,
    pub link_bandwidth_bps: u64,
}
