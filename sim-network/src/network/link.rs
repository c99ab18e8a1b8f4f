use crate::network::ip::Ipv4Cidr;
use crate::network::observer::InterfaceObserver;
use crate::network::queue::PacketQueue;
use crate::network::spec::LinkSpec;
use crate::network::{InterfaceId, LinkId, NodeId};
use crate::stats::InterfaceStats;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub struct Link {
    pub(crate) id: Arc<str>,
    pub(crate) ends: [InterfaceId; 2],
    pub(crate) bandwidth_bps: u64,
    pub(crate) delay: Duration,
}

impl Link {
    pub fn id(&self) -> &Arc<str> {
        &self.id
    }

    pub fn ends(&self) -> [InterfaceId; 2] {
        self.ends
    }

    pub fn bandwidth_bps(&self) -> u64 {
        self.bandwidth_bps
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// One end of a point-to-point link, together with its transmit queue
pub struct Interface {
    pub(crate) node: NodeId,
    pub(crate) link: LinkId,
    pub(crate) peer: InterfaceId,
    pub(crate) address: Option<Ipv4Cidr>,
    pub(crate) delay: Duration,
    pub(crate) queue: PacketQueue,
    pub(crate) pacer: PacketPacer,
    pub(crate) observers: Vec<Arc<Mutex<dyn InterfaceObserver>>>,
    pub(crate) stats: InterfaceStats,
    pub(crate) already_warned_about_drops: bool,
}

impl Interface {
    pub(crate) fn new(node: NodeId, link: LinkId, peer: InterfaceId, spec: &LinkSpec) -> Self {
        Self {
            node,
            link,
            peer,
            address: None,
            delay: spec.delay,
            queue: PacketQueue::new(&spec.queue),
            pacer: PacketPacer::new(spec.bandwidth_bps),
            observers: Vec::new(),
            stats: InterfaceStats::default(),
            already_warned_about_drops: false,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn link(&self) -> LinkId {
        self.link
    }

    pub fn peer(&self) -> InterfaceId {
        self.peer
    }

    pub fn address(&self) -> Option<Ipv4Cidr> {
        self.address
    }

    pub fn queue(&self) -> &PacketQueue {
        &self.queue
    }

    pub fn stats(&self) -> &InterfaceStats {
        &self.stats
    }
}

// Ensures that only a single packet at a time is being sent
pub(crate) struct PacketPacer {
    bandwidth_bps: u64,
    busy: bool,
}

impl PacketPacer {
    fn new(bandwidth_bps: u64) -> Self {
        Self {
            bandwidth_bps,
            busy: false,
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        !self.busy
    }

    /// Marks the pacer as busy and returns how long it takes to serialize the packet
    pub(crate) fn track_send(&mut self, packet_size_bytes: usize) -> Duration {
        self.busy = true;
        transmission_time(packet_size_bytes, self.bandwidth_bps)
    }

    pub(crate) fn track_send_done(&mut self) {
        self.busy = false;
    }
}

pub fn transmission_time(packet_size_bytes: usize, bandwidth_bps: u64) -> Duration {
    let bits = packet_size_bytes as u128 * 8;
    let bandwidth_bps = bandwidth_bps.max(1) as u128;
    let nanos = (bits * 1_000_000_000).div_ceil(bandwidth_bps);
    Duration::from_nanos(nanos as u64)
}
