use crate::apps::AppId;
use crate::network::InterfaceId;
use crate::network::route::Route;
use crate::network::spec::NodeKind;
use crate::stats::NodeStats;
use std::collections::HashMap;
use std::sync::Arc;

const FIRST_EPHEMERAL_PORT: u16 = 49152;

pub struct Node {
    pub(crate) id: Arc<str>,
    pub(crate) kind: NodeKind,
    pub(crate) interfaces: Vec<InterfaceId>,
    pub(crate) routes: Vec<Route>,
    pub(crate) bound_ports: HashMap<u16, AppId>,
    pub(crate) next_ephemeral_port: u16,
    pub(crate) stats: NodeStats,
    pub(crate) already_warned_no_route: bool,
}

impl Node {
    pub(crate) fn new(id: Arc<str>, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            interfaces: Vec::new(),
            routes: Vec::new(),
            bound_ports: HashMap::new(),
            next_ephemeral_port: FIRST_EPHEMERAL_PORT,
            stats: NodeStats::default(),
            already_warned_no_route: false,
        }
    }

    pub fn id(&self) -> &Arc<str> {
        &self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn interfaces(&self) -> &[InterfaceId] {
        &self.interfaces
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub(crate) fn allocate_ephemeral_port(&mut self) -> Option<u16> {
        while self.bound_ports.contains_key(&self.next_ephemeral_port) {
            self.next_ephemeral_port = self.next_ephemeral_port.checked_add(1)?;
        }

        let port = self.next_ephemeral_port;
        self.next_ephemeral_port = self.next_ephemeral_port.checked_add(1)?;
        Some(port)
    }
}
