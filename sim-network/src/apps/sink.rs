use crate::apps::bulk_send::SEGMENT_HEADER_BYTES;
use crate::apps::on_off::DATAGRAM_HEADER_BYTES;
use crate::apps::{AppAction, Outgoing};
use crate::stats::AppStats;
use crate::{Packet, Payload};
use std::collections::BTreeMap;

pub const ACK_SIZE_BYTES: usize = 40;

/// Consumes traffic sent to a port, acknowledging segments cumulatively
pub struct PacketSink {
    port: u16,
    running: bool,
    next_expected: u64,
    /// Payload bytes of segments received ahead of `next_expected`, by sequence number
    out_of_order: BTreeMap<u64, usize>,
    stats: AppStats,
}

impl PacketSink {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            running: false,
            next_expected: 0,
            out_of_order: BTreeMap::new(),
            stats: AppStats::default(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn stats(&self) -> &AppStats {
        &self.stats
    }

    pub fn delivered_segments(&self) -> u64 {
        self.next_expected
    }

    pub(crate) fn start(&mut self) -> Vec<AppAction> {
        self.running = true;
        Vec::new()
    }

    pub(crate) fn stop(&mut self) {
        self.running = false;
    }

    pub(crate) fn on_packet(&mut self, packet: &Packet) -> Vec<AppAction> {
        if !self.running {
            return Vec::new();
        }

        self.stats.received.track_one(packet.size_bytes);

        let seq = match packet.payload {
            Payload::Segment { seq } => seq,
            Payload::Datagram => {
                let payload = packet.size_bytes.saturating_sub(DATAGRAM_HEADER_BYTES);
                self.stats.delivered.track_one(payload);
                return Vec::new();
            }
            Payload::Ack { .. } => return Vec::new(),
        };

        // Only data extending the in-order prefix counts as delivered
        let payload = packet.size_bytes.saturating_sub(SEGMENT_HEADER_BYTES);
        if seq == self.next_expected {
            self.stats.delivered.track_one(payload);
            self.next_expected += 1;
            while let Some(buffered) = self.out_of_order.remove(&self.next_expected) {
                self.stats.delivered.track_one(buffered);
                self.next_expected += 1;
            }
        } else if seq > self.next_expected {
            self.out_of_order.entry(seq).or_insert(payload);
        }

        self.stats.sent.track_one(ACK_SIZE_BYTES);
        vec![AppAction::Send(Outgoing {
            destination: packet.source,
            size_bytes: ACK_SIZE_BYTES,
            payload: Payload::Ack {
                next_expected: self.next_expected,
            },
        })]
    }
}
