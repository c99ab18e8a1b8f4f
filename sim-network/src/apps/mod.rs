//! Traffic endpoints installed on hosts
//!
//! Applications never touch the network directly: they react to lifecycle events, packets and
//! timers by returning [`AppAction`]s, which the network carries out on their behalf.

pub mod bulk_send;
pub mod on_off;
pub mod sink;

use crate::network::NodeId;
use crate::stats::AppStats;
use crate::{Packet, Payload};
use bulk_send::BulkSend;
use on_off::OnOff;
use sink::PacketSink;
use std::net::SocketAddrV4;
use std::time::Duration;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppId(pub(crate) usize);

impl AppId {
    pub fn index(self) -> usize {
        self.0
    }
}

pub(crate) struct AppSlot {
    pub(crate) node: NodeId,
    pub(crate) local: SocketAddrV4,
    pub(crate) app: Application,
}

/// Something that happened to an application, delivered by the network
#[derive(Debug)]
pub(crate) enum AppEvent {
    Start,
    Stop,
    Packet(Packet),
    Timer(TimerToken),
}

#[derive(Debug)]
pub enum AppAction {
    Send(Outgoing),
    Timer { after: Duration, token: TimerToken },
}

#[derive(Debug)]
pub struct Outgoing {
    pub destination: SocketAddrV4,
    pub size_bytes: usize,
    pub payload: Payload,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimerToken {
    pub kind: TimerKind,
    /// Tokens from an older generation are stale and must be ignored
    pub generation: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TimerKind {
    Retransmission,
    NextPacket,
    OffPeriodStart,
    OnPeriodStart,
}

pub enum Application {
    BulkSend(BulkSend),
    OnOff(OnOff),
    Sink(PacketSink),
}

impl From<BulkSend> for Application {
    fn from(app: BulkSend) -> Self {
        Application::BulkSend(app)
    }
}

impl From<OnOff> for Application {
    fn from(app: OnOff) -> Self {
        Application::OnOff(app)
    }
}

impl From<PacketSink> for Application {
    fn from(app: PacketSink) -> Self {
        Application::Sink(app)
    }
}

impl Application {
    /// The port this application listens on, or `None` if it should get an ephemeral one
    pub(crate) fn listening_port(&self) -> Option<u16> {
        match self {
            Application::Sink(sink) => Some(sink.port()),
            Application::BulkSend(_) | Application::OnOff(_) => None,
        }
    }

    pub(crate) fn handle(&mut self, now: Duration, event: AppEvent) -> Vec<AppAction> {
        match event {
            AppEvent::Start => self.start(now),
            AppEvent::Stop => self.stop(),
            AppEvent::Packet(packet) => self.on_packet(now, &packet),
            AppEvent::Timer(token) => self.on_timer(now, token),
        }
    }

    fn start(&mut self, now: Duration) -> Vec<AppAction> {
        match self {
            Application::BulkSend(app) => app.start(now),
            Application::OnOff(app) => app.start(now),
            Application::Sink(app) => app.start(),
        }
    }

    fn stop(&mut self) -> Vec<AppAction> {
        match self {
            Application::BulkSend(app) => app.stop(),
            Application::OnOff(app) => app.stop(),
            Application::Sink(app) => app.stop(),
        }
        Vec::new()
    }

    fn on_packet(&mut self, now: Duration, packet: &Packet) -> Vec<AppAction> {
        match self {
            Application::BulkSend(app) => app.on_packet(now, packet),
            Application::OnOff(_) => Vec::new(),
            Application::Sink(app) => app.on_packet(packet),
        }
    }

    fn on_timer(&mut self, now: Duration, token: TimerToken) -> Vec<AppAction> {
        match self {
            Application::BulkSend(app) => app.on_timer(now, token),
            Application::OnOff(app) => app.on_timer(token),
            Application::Sink(_) => Vec::new(),
        }
    }

    pub fn stats(&self) -> &AppStats {
        match self {
            Application::BulkSend(app) => app.stats(),
            Application::OnOff(app) => app.stats(),
            Application::Sink(app) => app.stats(),
        }
    }

    /// In-order segments received by a sink
    pub fn delivered_segments(&self) -> Option<u64> {
        match self {
            Application::Sink(sink) => Some(sink.delivered_segments()),
            Application::BulkSend(_) | Application::OnOff(_) => None,
        }
    }
}
