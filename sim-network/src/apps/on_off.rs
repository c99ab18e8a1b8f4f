use crate::Payload;
use crate::apps::{AppAction, Outgoing, TimerKind, TimerToken};
use crate::stats::AppStats;
use std::net::SocketAddrV4;
use std::time::Duration;

/// IP and UDP headers
pub const DATAGRAM_HEADER_BYTES: usize = 28;

#[derive(Clone, Debug)]
pub struct OnOffConfig {
    pub remote: SocketAddrV4,
    pub data_rate_bps: u64,
    /// Payload size of each datagram
    pub packet_size: usize,
    pub on_time: Duration,
    /// Zero means the source never pauses
    pub off_time: Duration,
}

/// Sends datagrams at a constant bit rate during "on" periods and stays silent during "off"
/// periods
pub struct OnOff {
    config: OnOffConfig,
    running: bool,
    generation: u64,
    stats: AppStats,
}

impl OnOff {
    pub fn new(config: OnOffConfig) -> Self {
        Self {
            config,
            running: false,
            generation: 0,
            stats: AppStats::default(),
        }
    }

    pub fn config(&self) -> &OnOffConfig {
        &self.config
    }

    pub fn stats(&self) -> &AppStats {
        &self.stats
    }

    fn packet_interval(&self) -> Option<Duration> {
        if self.config.data_rate_bps == 0 {
            return None;
        }

        let bits = self.config.packet_size as u128 * 8;
        let nanos = bits * 1_000_000_000 / self.config.data_rate_bps as u128;
        Some(Duration::from_nanos(nanos.max(1) as u64))
    }

    fn timer(&self, kind: TimerKind, after: Duration) -> AppAction {
        AppAction::Timer {
            after,
            token: TimerToken {
                kind,
                generation: self.generation,
            },
        }
    }

    pub(crate) fn start(&mut self, _now: Duration) -> Vec<AppAction> {
        if self.running {
            return Vec::new();
        }

        self.running = true;
        self.generation += 1;
        self.begin_on_period()
    }

    pub(crate) fn stop(&mut self) {
        self.running = false;
        self.generation += 1;
    }

    fn begin_on_period(&mut self) -> Vec<AppAction> {
        let Some(interval) = self.packet_interval() else {
            return Vec::new();
        };

        let mut actions = vec![self.send_packet(), self.timer(TimerKind::NextPacket, interval)];
        if !self.config.off_time.is_zero() {
            actions.push(self.timer(TimerKind::OffPeriodStart, self.config.on_time));
        }

        actions
    }

    fn send_packet(&mut self) -> AppAction {
        let size_bytes = self.config.packet_size + DATAGRAM_HEADER_BYTES;
        self.stats.sent.track_one(size_bytes);
        AppAction::Send(Outgoing {
            destination: self.config.remote,
            size_bytes,
            payload: Payload::Datagram,
        })
    }

    pub(crate) fn on_timer(&mut self, token: TimerToken) -> Vec<AppAction> {
        if !self.running || token.generation != self.generation {
            return Vec::new();
        }

        match token.kind {
            TimerKind::NextPacket => {
                let Some(interval) = self.packet_interval() else {
                    return Vec::new();
                };
                vec![self.send_packet(), self.timer(TimerKind::NextPacket, interval)]
            }
            TimerKind::OffPeriodStart => {
                // Invalidates the pending `NextPacket` timer
                self.generation += 1;
                vec![self.timer(TimerKind::OnPeriodStart, self.config.off_time)]
            }
            TimerKind::OnPeriodStart => self.begin_on_period(),
            TimerKind::Retransmission => Vec::new(),
        }
    }
}
