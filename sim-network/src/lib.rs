pub mod apps;
pub mod network;
pub mod scheduler;
pub mod stats;

use std::net::SocketAddrV4;

pub use network::Network;

/// A packet travelling through the simulated network
#[derive(Clone, Debug)]
pub struct Packet {
    /// Unique within a network, in the order packets were created
    pub number: u64,
    pub source: SocketAddrV4,
    pub destination: SocketAddrV4,
    /// The size on the wire, headers included
    pub size_bytes: usize,
    pub payload: Payload,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Datagram,
    Segment { seq: u64 },
    Ack { next_expected: u64 },
}

#[cfg(test)]
mod test {
    use crate::apps::bulk_send::{BulkSend, BulkSendConfig, TcpVariant};
    use crate::apps::on_off::{OnOff, OnOffConfig};
    use crate::apps::sink::PacketSink;
    use crate::network::address::Ipv4AddressAllocator;
    use crate::network::ip::Ipv4Cidr;
    use crate::network::observer::InterfaceObserver;
    use crate::network::spec::{LinkSpec, NodeKind, QueueSpec};
    use crate::network::{InterfaceId, LinkEnds, Network, NodeId};
    use crate::Packet;
    use bon::builder;
    use fastrand::Rng;
    use parking_lot::Mutex;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::sync::Arc;
    use std::time::Duration;

    const BANDWIDTH_100_MBPS: u64 = 1000 * 1000 * 100;
    const BANDWIDTH_8_KBPS: u64 = 1000 * 8;
    const SINK_PORT: u16 = 50000;

    // client -- router1 -- router2 -- server
    struct DefaultNetwork {
        network: Network,
        client: NodeId,
        server: NodeId,
        server_addr: Ipv4Addr,
        bottleneck: LinkEnds,
    }

    #[builder]
    fn default_network(
        bandwidth_bps: Option<u64>,
        bottleneck_queue: Option<QueueSpec>,
    ) -> DefaultNetwork {
        let bandwidth_bps = bandwidth_bps.unwrap_or(BANDWIDTH_100_MBPS);
        let default_link_delay = Duration::from_millis(10);
        let access = LinkSpec {
            bandwidth_bps: BANDWIDTH_100_MBPS,
            delay: default_link_delay,
            queue: QueueSpec::DropTail { max_packets: 100 },
        };
        let bottleneck = LinkSpec {
            bandwidth_bps,
            delay: default_link_delay,
            queue: bottleneck_queue.unwrap_or(QueueSpec::DropTail { max_packets: 100 }),
        };

        let mut network = Network::new(Rng::with_seed(42));
        let client = network.add_node("client", NodeKind::Host);
        let router1 = network.add_node("router1", NodeKind::Router);
        let router2 = network.add_node("router2", NodeKind::Router);
        let server = network.add_node("server", NodeKind::Host);

        let mut allocator = Ipv4AddressAllocator::new(Ipv4Cidr::from_octets([10, 0, 1, 0], 24));
        let mut connect = |network: &mut Network, a: NodeId, b: NodeId, spec: &LinkSpec| {
            let ends = network.add_link(a, b, spec).unwrap();
            let a_address = allocator.next_address().unwrap();
            let b_address = allocator.next_address().unwrap();
            network.assign_address(ends.a, a_address);
            network.assign_address(ends.b, b_address);
            allocator.new_network();
            ends
        };

        connect(&mut network, client, router1, &access);
        let bottleneck = connect(&mut network, router1, router2, &bottleneck);
        connect(&mut network, router2, server, &access);
        network.populate_routing_tables();

        let server_addr = network.node_address(server).unwrap();
        DefaultNetwork {
            network,
            client,
            server,
            server_addr,
            bottleneck,
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        transmitted: Vec<u64>,
        depths: Vec<usize>,
    }

    impl InterfaceObserver for RecordingObserver {
        fn on_transmit_begin(&mut self, packet: &Packet) {
            self.transmitted.push(packet.number);
        }

        fn on_enqueue(&mut self, queue_depth: usize) {
            self.depths.push(queue_depth);
        }
    }

    fn recording_observer(
        network: &mut Network,
        interface: InterfaceId,
    ) -> Arc<Mutex<RecordingObserver>> {
        let observer = Arc::new(Mutex::new(RecordingObserver::default()));
        network.subscribe(interface, observer.clone());
        observer
    }

    #[test]
    fn test_routes_reach_every_subnet() {
        let default = default_network().call();
        let network = &default.network;

        for node in network.nodes() {
            assert_eq!(node.routes().len(), 3, "{}", node.id());
        }
    }

    #[test]
    fn test_datagram_reaches_sink() {
        let mut default = default_network().call();
        let network = &mut default.network;

        let sink = network
            .install_app(default.server, PacketSink::new(SINK_PORT))
            .unwrap();
        network.start_app(sink, Duration::ZERO);

        let sender = network
            .install_app(
                default.client,
                OnOff::new(OnOffConfig {
                    remote: SocketAddrV4::new(default.server_addr, SINK_PORT),
                    data_rate_bps: 8_000,
                    packet_size: 1000,
                    on_time: Duration::from_secs(10),
                    off_time: Duration::ZERO,
                }),
            )
            .unwrap();
        network.start_app(sender, Duration::ZERO);
        network.stop_app(sender, Duration::from_millis(500));
        network.stop_at(Duration::from_secs(1));
        network.run();

        // A single packet is sent before the sender stops
        let stats = network.app_stats(sink);
        assert_eq!(stats.received.packets, 1);
        assert_eq!(stats.received.bytes, 1028);
        assert_eq!(stats.delivered.bytes, 1000);
        assert_eq!(network.now(), Duration::from_secs(1));
    }

    #[test]
    fn test_on_off_timers_survive_several_periods() {
        let mut default = default_network().call();
        let network = &mut default.network;

        let sink = network
            .install_app(default.server, PacketSink::new(SINK_PORT))
            .unwrap();
        network.start_app(sink, Duration::ZERO);

        // One 172 byte packet every 21.5 ms while on
        let sender = network
            .install_app(
                default.client,
                OnOff::new(OnOffConfig {
                    remote: SocketAddrV4::new(default.server_addr, SINK_PORT),
                    data_rate_bps: 64_000,
                    packet_size: 172,
                    on_time: Duration::from_secs(1),
                    off_time: Duration::from_secs(1),
                }),
            )
            .unwrap();
        network.start_app(sender, Duration::ZERO);
        network.stop_app(sender, Duration::from_millis(2500));
        network.stop_at(Duration::from_secs(4));
        network.run();

        // 47 packets in the first on period, 24 in the second one before the stop
        assert_eq!(network.app_stats(sender).sent.packets, 71);
        assert_eq!(network.app_stats(sink).received.packets, 71);
        assert_eq!(network.app_stats(sink).delivered.bytes, 71 * 172);
    }

    #[test]
    fn test_packets_are_paced_by_bandwidth() {
        let mut default = default_network()
            .bandwidth_bps(BANDWIDTH_8_KBPS)
            .call();
        let network = &mut default.network;
        let observer = recording_observer(network, default.bottleneck.a);

        let sink = network
            .install_app(default.server, PacketSink::new(SINK_PORT))
            .unwrap();
        network.start_app(sink, Duration::ZERO);

        let sender = network
            .install_app(
                default.client,
                OnOff::new(OnOffConfig {
                    remote: SocketAddrV4::new(default.server_addr, SINK_PORT),
                    data_rate_bps: BANDWIDTH_100_MBPS,
                    packet_size: 972,
                    on_time: Duration::from_secs(10),
                    off_time: Duration::ZERO,
                }),
            )
            .unwrap();
        network.start_app(sender, Duration::ZERO);
        network.stop_app(sender, Duration::from_millis(1));
        network.stop_at(Duration::from_secs(10));
        network.run();

        // 1000 bytes on the wire take exactly one second at 8 kbps, so only the packet that
        // is still being serialized at the end is missing at the sink
        let received = network.app_stats(sink).received.packets;
        let transmitted = observer.lock().transmitted.len() as u64;
        assert_eq!(transmitted, 10);
        assert_eq!(received, 9);

        // The bottleneck queue builds up while the faster access link keeps delivering
        assert!(observer.lock().depths.iter().any(|&depth| depth > 1));
    }

    #[test]
    fn test_drop_tail_overflow_is_counted() {
        let mut default = default_network()
            .bandwidth_bps(BANDWIDTH_8_KBPS)
            .bottleneck_queue(QueueSpec::DropTail { max_packets: 2 })
            .call();
        let network = &mut default.network;

        let sink = network
            .install_app(default.server, PacketSink::new(SINK_PORT))
            .unwrap();
        network.start_app(sink, Duration::ZERO);

        let sender = network
            .install_app(
                default.client,
                OnOff::new(OnOffConfig {
                    remote: SocketAddrV4::new(default.server_addr, SINK_PORT),
                    data_rate_bps: BANDWIDTH_100_MBPS,
                    packet_size: 972,
                    on_time: Duration::from_secs(10),
                    off_time: Duration::ZERO,
                }),
            )
            .unwrap();
        network.start_app(sender, Duration::ZERO);
        network.stop_app(sender, Duration::from_millis(1));
        network.stop_at(Duration::from_secs(60));
        network.run();

        let sent = network.app_stats(sender).sent.packets;
        let counters = network.queue_counters(default.bottleneck.a);
        let received = network.app_stats(sink).received.packets;
        assert_eq!(counters.received, sent);
        assert!(counters.dropped > 0);
        assert_eq!(received + counters.dropped, sent);
    }

    #[test]
    fn test_bulk_transfer_completes_over_lossy_bottleneck() {
        for variant in [TcpVariant::Tahoe, TcpVariant::Reno, TcpVariant::NewReno] {
            let mut default = default_network()
                .bandwidth_bps(1_000_000)
                .bottleneck_queue(QueueSpec::DropTail { max_packets: 5 })
                .call();
            let network = &mut default.network;

            let sink = network
                .install_app(default.server, PacketSink::new(SINK_PORT))
                .unwrap();
            network.start_app(sink, Duration::ZERO);

            let sender = network
                .install_app(
                    default.client,
                    BulkSend::new(BulkSendConfig {
                        remote: SocketAddrV4::new(default.server_addr, SINK_PORT),
                        max_bytes: 500_000,
                        segment_size: 1000,
                        variant,
                    }),
                )
                .unwrap();
            network.start_app(sender, Duration::ZERO);
            network.stop_at(Duration::from_secs(120));
            network.run();

            // A tiny buffer forces losses, yet every byte makes it across
            let counters = network.queue_counters(default.bottleneck.a);
            assert!(counters.dropped > 0, "{variant:?}");
            assert!(network.app_stats(sender).retransmissions > 0, "{variant:?}");
            let sink_app = network.app(sink);
            assert_eq!(sink_app.delivered_segments(), Some(500), "{variant:?}");
        }
    }

    #[test]
    fn test_stopped_sink_ignores_traffic() {
        let mut default = default_network().call();
        let network = &mut default.network;

        let sink = network
            .install_app(default.server, PacketSink::new(SINK_PORT))
            .unwrap();
        network.start_app(sink, Duration::from_secs(2));

        let sender = network
            .install_app(
                default.client,
                OnOff::new(OnOffConfig {
                    remote: SocketAddrV4::new(default.server_addr, SINK_PORT),
                    data_rate_bps: 64_000,
                    packet_size: 172,
                    on_time: Duration::from_secs(1),
                    off_time: Duration::from_secs(1),
                }),
            )
            .unwrap();
        network.start_app(sender, Duration::ZERO);
        network.stop_app(sender, Duration::from_millis(900));
        network.stop_at(Duration::from_secs(5));
        network.run();

        assert!(network.app_stats(sender).sent.packets > 0);
        assert_eq!(network.app_stats(sink).received.packets, 0);
    }

    #[test]
    fn test_binding_a_port_twice_fails() {
        let mut default = default_network().call();
        let network = &mut default.network;

        network
            .install_app(default.server, PacketSink::new(SINK_PORT))
            .unwrap();
        assert!(
            network
                .install_app(default.server, PacketSink::new(SINK_PORT))
                .is_err()
        );
    }

    #[test]
    fn test_unrouted_packets_are_dropped() {
        let mut default = default_network().call();
        let network = &mut default.network;

        let sender = network
            .install_app(
                default.client,
                OnOff::new(OnOffConfig {
                    remote: SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 1), SINK_PORT),
                    data_rate_bps: 64_000,
                    packet_size: 172,
                    on_time: Duration::from_secs(1),
                    off_time: Duration::ZERO,
                }),
            )
            .unwrap();
        network.start_app(sender, Duration::ZERO);
        network.stop_app(sender, Duration::from_secs(1));
        network.stop_at(Duration::from_secs(2));
        network.run();

        let sent = network.app_stats(sender).sent.packets;
        assert!(sent > 0);
        assert_eq!(
            network.node(default.client).stats().dropped_no_route.packets,
            sent
        );
        assert_eq!(
            network.queue_counters(default.bottleneck.a).received,
            0,
            "nothing should reach the bottleneck"
        );
    }
}
