use serde::Serialize;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PacketStats {
    pub packets: u64,
    pub bytes: usize,
}

impl PacketStats {
    pub fn track_one(&mut self, size_bytes: usize) {
        self.packets += 1;
        self.bytes += size_bytes;
    }
}

/// Counters of a single queueing layer
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounters {
    /// Every packet offered to the queue, including the ones that got dropped
    pub received: u64,
    pub dropped: u64,
    /// Packets handed back to this layer by the layer below it (never lost)
    pub requeued: u64,
    pub max_depth: usize,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct InterfaceStats {
    pub transmitted: PacketStats,
    pub received: PacketStats,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct NodeStats {
    pub dropped_no_route: PacketStats,
    pub dropped_no_listener: PacketStats,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct AppStats {
    pub sent: PacketStats,
    /// Everything that arrived, duplicates and headers included
    pub received: PacketStats,
    /// Application payload handed over in order, each byte counted once
    pub delivered: PacketStats,
    pub retransmissions: u64,
}
