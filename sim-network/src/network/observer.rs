use crate::Packet;

/// Hooks invoked synchronously by an interface as packets flow through it
pub trait InterfaceObserver {
    /// The interface starts serializing `packet` onto its link
    fn on_transmit_begin(&mut self, _packet: &Packet) {}

    /// A packet was accepted by the interface's queue, which now holds `queue_depth` packets
    fn on_enqueue(&mut self, _queue_depth: usize) {}
}
