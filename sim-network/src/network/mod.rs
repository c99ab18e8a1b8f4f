pub mod address;
pub mod ip;
pub mod link;
pub mod node;
pub mod observer;
pub mod queue;
pub mod route;
pub mod spec;

use crate::apps::{AppAction, AppEvent, AppId, AppSlot, Application};
use crate::network::ip::Ipv4Cidr;
use crate::network::link::{Interface, Link};
use crate::network::node::Node;
use crate::network::observer::InterfaceObserver;
use crate::network::queue::EnqueueOutcome;
use crate::network::route::Route;
use crate::network::spec::{LinkSpec, NodeKind};
use crate::scheduler::{self, Scheduler};
use crate::stats::{AppStats, InterfaceStats, QueueCounters};
use crate::Packet;
use fastrand::Rng;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub(crate) usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterfaceId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl LinkId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl InterfaceId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// The interfaces created by [`Network::add_link`], one per connected node
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LinkEnds {
    pub link: LinkId,
    pub a: InterfaceId,
    pub b: InterfaceId,
}

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("link between `{a}` and `{b}` has zero bandwidth")]
    ZeroBandwidth { a: Arc<str>, b: Arc<str> },
    #[error("link endpoints must be distinct nodes (got `{0}` twice)")]
    SelfLink(Arc<str>),
    #[error("addresses in {0} are exhausted")]
    AddressesExhausted(Ipv4Cidr),
    #[error("node `{0}` has no address to bind applications to")]
    NodeWithoutAddress(Arc<str>),
    #[error("port {port} is already bound on node `{node}`")]
    PortInUse { node: Arc<str>, port: u16 },
    #[error("node `{0}` ran out of ephemeral ports")]
    EphemeralPortsExhausted(Arc<str>),
}

/// A simulated packet network, together with the clock that drives it
pub struct Network {
    scheduler: Scheduler<Network>,
    nodes: Vec<Node>,
    links: Vec<Link>,
    interfaces: Vec<Interface>,
    apps: Vec<AppSlot>,
    rng: Rng,
    next_packet_number: u64,
}

impl Network {
    pub fn new(rng: Rng) -> Self {
        Self {
            scheduler: Scheduler::new(),
            nodes: Vec::new(),
            links: Vec::new(),
            interfaces: Vec::new(),
            apps: Vec::new(),
            rng,
            next_packet_number: 0,
        }
    }

    pub fn now(&self) -> Duration {
        self.scheduler.now()
    }

    pub fn schedule(
        &mut self,
        delay: Duration,
        handler: impl FnOnce(&mut Network) + 'static,
    ) {
        self.scheduler.schedule(delay, handler);
    }

    pub fn schedule_at(
        &mut self,
        at: Duration,
        handler: impl FnOnce(&mut Network) + 'static,
    ) {
        self.scheduler.schedule_at(at, handler);
    }

    pub fn stop_at(&mut self, at: Duration) {
        self.scheduler.stop_at(at);
    }

    pub fn executed_events(&self) -> u64 {
        self.scheduler.executed_events()
    }

    pub fn run(&mut self) {
        scheduler::run(self, |network| &mut network.scheduler);
    }

    pub fn add_node(&mut self, id: impl Into<Arc<str>>, kind: NodeKind) -> NodeId {
        let node_id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(id.into(), kind));
        node_id
    }

    pub fn add_link(
        &mut self,
        a: NodeId,
        b: NodeId,
        spec: &LinkSpec,
    ) -> Result<LinkEnds, NetworkError> {
        if a == b {
            return Err(NetworkError::SelfLink(self.nodes[a.0].id.clone()));
        }
        if spec.bandwidth_bps == 0 {
            return Err(NetworkError::ZeroBandwidth {
                a: self.nodes[a.0].id.clone(),
                b: self.nodes[b.0].id.clone(),
            });
        }

        let link = LinkId(self.links.len());
        let a_interface = InterfaceId(self.interfaces.len());
        let b_interface = InterfaceId(self.interfaces.len() + 1);

        self.interfaces
            .push(Interface::new(a, link, b_interface, spec));
        self.interfaces
            .push(Interface::new(b, link, a_interface, spec));
        self.nodes[a.0].interfaces.push(a_interface);
        self.nodes[b.0].interfaces.push(b_interface);

        let id = format!("{}-{}", self.nodes[a.0].id, self.nodes[b.0].id);
        self.links.push(Link {
            id: id.into_boxed_str().into(),
            ends: [a_interface, b_interface],
            bandwidth_bps: spec.bandwidth_bps,
            delay: spec.delay,
        });

        Ok(LinkEnds {
            link,
            a: a_interface,
            b: b_interface,
        })
    }

    pub fn assign_address(&mut self, interface: InterfaceId, address: Ipv4Cidr) {
        self.interfaces[interface.0].address = Some(address);
    }

    pub fn node(&self, node: NodeId) -> &Node {
        &self.nodes[node.0]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn link(&self, link: LinkId) -> &Link {
        &self.links[link.0]
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn interface(&self, interface: InterfaceId) -> &Interface {
        &self.interfaces[interface.0]
    }

    pub fn interface_address(&self, interface: InterfaceId) -> Option<Ipv4Addr> {
        self.interfaces[interface.0].address.map(|a| a.address)
    }

    /// The address of the node's first addressed interface
    pub fn node_address(&self, node: NodeId) -> Option<Ipv4Addr> {
        self.nodes[node.0]
            .interfaces
            .iter()
            .find_map(|&i| self.interface_address(i))
    }

    pub fn subscribe(
        &mut self,
        interface: InterfaceId,
        observer: Arc<Mutex<dyn InterfaceObserver>>,
    ) {
        self.interfaces[interface.0].observers.push(observer);
    }

    pub fn queue_depth(&self, interface: InterfaceId) -> usize {
        self.interfaces[interface.0].queue.len()
    }

    pub fn queue_capacity(&self, interface: InterfaceId) -> usize {
        self.interfaces[interface.0].queue.capacity()
    }

    pub fn queue_counters(&self, interface: InterfaceId) -> QueueCounters {
        self.interfaces[interface.0].queue.counters().clone()
    }

    pub fn interface_stats(&self, interface: InterfaceId) -> &InterfaceStats {
        &self.interfaces[interface.0].stats
    }

    /// Computes shortest-path (hop count) routes from every node towards every addressed link
    ///
    /// Must be called after all links have been created and addressed.
    pub fn populate_routing_tables(&mut self) {
        let subnets: Vec<_> = self
            .links
            .iter()
            .filter_map(|link| {
                let [a, b] = link.ends;
                let address = self.interfaces[a.0]
                    .address
                    .or(self.interfaces[b.0].address)?;
                Some((address.subnet(), link.ends))
            })
            .collect();

        for origin in 0..self.nodes.len() {
            let first_hops = self.first_hops_from(NodeId(origin));

            let mut routes = Vec::with_capacity(subnets.len());
            for (subnet, ends) in &subnets {
                let attached = ends
                    .iter()
                    .find(|&&i| self.interfaces[i.0].node.0 == origin);
                if let Some(&interface) = attached {
                    routes.push(Route {
                        destination: subnet.clone(),
                        interface,
                    });
                    continue;
                }

                let closest = ends
                    .iter()
                    .filter_map(|&i| first_hops[self.interfaces[i.0].node.0])
                    .min_by_key(|&(distance, _)| distance);
                if let Some((_, interface)) = closest {
                    routes.push(Route {
                        destination: subnet.clone(),
                        interface,
                    });
                }
            }

            self.nodes[origin].routes = routes;
        }
    }

    // Breadth-first search returning, for every reachable node, its distance from `origin` and
    // the interface of `origin` through which it is reached
    fn first_hops_from(&self, origin: NodeId) -> Vec<Option<(usize, InterfaceId)>> {
        let mut first_hops = vec![None; self.nodes.len()];
        let mut visited = vec![false; self.nodes.len()];
        let mut queue = VecDeque::new();

        visited[origin.0] = true;
        for &interface in &self.nodes[origin.0].interfaces {
            let neighbor = self.interfaces[self.interfaces[interface.0].peer.0].node;
            if !visited[neighbor.0] {
                visited[neighbor.0] = true;
                first_hops[neighbor.0] = Some((1, interface));
                queue.push_back(neighbor);
            }
        }

        while let Some(current) = queue.pop_front() {
            let Some((distance, first_hop)) = first_hops[current.0] else {
                continue;
            };

            for &interface in &self.nodes[current.0].interfaces {
                let neighbor = self.interfaces[self.interfaces[interface.0].peer.0].node;
                if !visited[neighbor.0] {
                    visited[neighbor.0] = true;
                    first_hops[neighbor.0] = Some((distance + 1, first_hop));
                    queue.push_back(neighbor);
                }
            }
        }

        first_hops
    }

    pub fn install_app(
        &mut self,
        node: NodeId,
        app: impl Into<Application>,
    ) -> Result<AppId, NetworkError> {
        let app = app.into();
        let Some(ip) = self.node_address(node) else {
            return Err(NetworkError::NodeWithoutAddress(self.nodes[node.0].id.clone()));
        };

        let node_ref = &mut self.nodes[node.0];
        let port = match app.listening_port() {
            Some(port) => port,
            None => node_ref
                .allocate_ephemeral_port()
                .ok_or_else(|| NetworkError::EphemeralPortsExhausted(node_ref.id.clone()))?,
        };

        if node_ref.bound_ports.contains_key(&port) {
            return Err(NetworkError::PortInUse {
                node: node_ref.id.clone(),
                port,
            });
        }

        let app_id = AppId(self.apps.len());
        node_ref.bound_ports.insert(port, app_id);
        self.apps.push(AppSlot {
            node,
            local: SocketAddrV4::new(ip, port),
            app,
        });

        Ok(app_id)
    }

    pub fn start_app(&mut self, app: AppId, at: Duration) {
        self.schedule_at(at, move |network| {
            network.drive_app(app, AppEvent::Start);
        });
    }

    pub fn stop_app(&mut self, app: AppId, at: Duration) {
        self.schedule_at(at, move |network| {
            network.drive_app(app, AppEvent::Stop);
        });
    }

    pub fn app(&self, app: AppId) -> &Application {
        &self.apps[app.0].app
    }

    pub fn app_node(&self, app: AppId) -> NodeId {
        self.apps[app.0].node
    }

    pub fn app_local_addr(&self, app: AppId) -> SocketAddrV4 {
        self.apps[app.0].local
    }

    pub fn app_stats(&self, app: AppId) -> AppStats {
        self.apps[app.0].app.stats().clone()
    }

    fn drive_app(&mut self, app: AppId, event: AppEvent) {
        let now = self.now();
        let actions = self.apps[app.0].app.handle(now, event);
        for action in actions {
            match action {
                AppAction::Send(outgoing) => {
                    let slot = &self.apps[app.0];
                    let node = slot.node;
                    let packet = Packet {
                        number: self.next_packet_number,
                        source: slot.local,
                        destination: outgoing.destination,
                        size_bytes: outgoing.size_bytes,
                        payload: outgoing.payload,
                    };
                    self.next_packet_number += 1;
                    self.route_packet(node, packet);
                }
                AppAction::Timer { after, token } => {
                    self.schedule(after, move |network| {
                        network.drive_app(app, AppEvent::Timer(token));
                    });
                }
            }
        }
    }

    fn route_packet(&mut self, node: NodeId, packet: Packet) {
        let destination = IpAddr::V4(*packet.destination.ip());
        let is_local = self.nodes[node.0]
            .interfaces
            .iter()
            .any(|&i| self.interface_address(i).map(IpAddr::V4) == Some(destination));
        if is_local {
            self.deliver_locally(node, packet);
            return;
        }

        let node_ref = &mut self.nodes[node.0];
        let next = node_ref
            .routes
            .iter()
            .find_map(|route| route.interface_towards_destination(destination));
        let Some(interface) = next else {
            node_ref.stats.dropped_no_route.track_one(packet.size_bytes);
            if !node_ref.already_warned_no_route {
                node_ref.already_warned_no_route = true;
                warn!(
                    "{} has no route towards {destination}, dropping packet (further warnings for this node omitted)",
                    node_ref.id
                );
            }
            return;
        };

        self.enqueue(interface, packet);
    }

    fn deliver_locally(&mut self, node: NodeId, packet: Packet) {
        let node_ref = &mut self.nodes[node.0];
        let Some(&app) = node_ref.bound_ports.get(&packet.destination.port()) else {
            node_ref
                .stats
                .dropped_no_listener
                .track_one(packet.size_bytes);
            return;
        };

        self.drive_app(app, AppEvent::Packet(packet));
    }

    fn enqueue(&mut self, interface_id: InterfaceId, packet: Packet) {
        let now = self.now();
        let interface = &mut self.interfaces[interface_id.0];
        let packet_number = packet.number;

        match interface.queue.enqueue(packet, now, &mut self.rng) {
            EnqueueOutcome::Enqueued { depth } => {
                for observer in &interface.observers {
                    observer.lock().on_enqueue(depth);
                }
            }
            EnqueueOutcome::Dropped(reason) => {
                if !interface.already_warned_about_drops {
                    interface.already_warned_about_drops = true;
                    let link = &self.links[interface.link.0].id;
                    debug!(
                        "{:.3}s packet #{packet_number} dropped at `{link}` ({reason}, further drops on this interface omitted)",
                        now.as_secs_f64()
                    );
                }
                return;
            }
        }

        if interface.pacer.is_idle() {
            self.transmit_next(interface_id);
        }
    }

    fn transmit_next(&mut self, interface_id: InterfaceId) {
        let now = self.now();
        let interface = &mut self.interfaces[interface_id.0];
        let Some(packet) = interface.queue.dequeue(now) else {
            return;
        };

        let transmission_time = interface.pacer.track_send(packet.size_bytes);
        interface.stats.transmitted.track_one(packet.size_bytes);
        for observer in &interface.observers {
            observer.lock().on_transmit_begin(&packet);
        }

        let peer = interface.peer;
        let arrival = transmission_time + interface.delay;
        self.scheduler.schedule(transmission_time, move |network| {
            network.interfaces[interface_id.0].pacer.track_send_done();
            network.transmit_next(interface_id);
        });
        self.scheduler.schedule(arrival, move |network| {
            network.receive(peer, packet);
        });
    }

    fn receive(&mut self, interface: InterfaceId, packet: Packet) {
        let interface = &mut self.interfaces[interface.0];
        interface.stats.received.track_one(packet.size_bytes);
        let node = interface.node;
        self.route_packet(node, packet);
    }
}
