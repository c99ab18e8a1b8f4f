//! A window-based bulk sender with TCP-style loss recovery
//!
//! Segments are numbered consecutively and acknowledged cumulatively by a
//! [`PacketSink`](crate::apps::sink::PacketSink). Congestion control follows the classic loss-based
//! variants: slow start, congestion avoidance, fast retransmit after three duplicate ACKs and
//! retransmission timeouts as in RFC 6298.

use crate::apps::{AppAction, Outgoing, TimerKind, TimerToken};
use crate::stats::AppStats;
use crate::{Packet, Payload};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddrV4;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// IP and TCP headers
pub const SEGMENT_HEADER_BYTES: usize = 40;
pub const DEFAULT_SEGMENT_SIZE: usize = 1000;

const DUPACK_THRESHOLD: u32 = 3;
const INITIAL_CWND: f64 = 2.0;
const MIN_SSTHRESH: f64 = 2.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TcpVariant {
    Tahoe,
    Reno,
    NewReno,
}

impl fmt::Display for TcpVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TcpVariant::Tahoe => "TcpTahoe",
            TcpVariant::Reno => "TcpReno",
            TcpVariant::NewReno => "TcpNewReno",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown TCP variant `{0}` (expected TcpTahoe, TcpReno or TcpNewReno)")]
pub struct UnknownTcpVariant(pub String);

impl FromStr for TcpVariant {
    type Err = UnknownTcpVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TcpTahoe" | "tahoe" => Ok(TcpVariant::Tahoe),
            "TcpReno" | "reno" => Ok(TcpVariant::Reno),
            "TcpNewReno" | "new-reno" => Ok(TcpVariant::NewReno),
            _ => Err(UnknownTcpVariant(s.to_string())),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BulkSendConfig {
    pub remote: SocketAddrV4,
    /// Zero means unlimited
    pub max_bytes: u64,
    /// Payload bytes per segment
    pub segment_size: usize,
    pub variant: TcpVariant,
}

/// Retransmission timer state, as described in RFC 6298
#[derive(Clone, Debug)]
pub struct RttEstimator {
    srtt: Option<Duration>,
    rttvar: Duration,
    rto: Duration,
}

impl RttEstimator {
    pub const MIN_RTO: Duration = Duration::from_millis(200);
    pub const INITIAL_RTO: Duration = Duration::from_secs(1);
    pub const MAX_RTO: Duration = Duration::from_secs(60);

    pub fn new() -> Self {
        Self {
            srtt: None,
            rttvar: Duration::ZERO,
            rto: Self::INITIAL_RTO,
        }
    }

    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn on_sample(&mut self, rtt: Duration) {
        let srtt = match self.srtt {
            None => {
                self.rttvar = rtt / 2;
                rtt
            }
            Some(srtt) => {
                self.rttvar = self.rttvar * 3 / 4 + srtt.abs_diff(rtt) / 4;
                srtt * 7 / 8 + rtt / 8
            }
        };

        self.srtt = Some(srtt);
        self.rto = (srtt + self.rttvar * 4).clamp(Self::MIN_RTO, Self::MAX_RTO);
    }

    pub fn back_off(&mut self) {
        self.rto = (self.rto * 2).min(Self::MAX_RTO);
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

pub struct BulkSend {
    config: BulkSendConfig,
    total_segments: u64,
    running: bool,
    // Bumped whenever the retransmission timer is re-armed or disarmed
    generation: u64,
    rto_armed: bool,

    snd_una: u64,
    snd_nxt: u64,
    // One past the highest segment ever sent
    high_tx: u64,
    cwnd: f64,
    ssthresh: f64,
    dupacks: u32,
    // Set while in fast recovery, holds `high_tx` at the time the loss was detected
    recover: Option<u64>,
    // No fast retransmit until everything sent before the last loss event is acknowledged
    loss_high_water: u64,

    rtt: RttEstimator,
    // Only segments transmitted exactly once, so their ACKs yield valid RTT samples
    send_times: BTreeMap<u64, Duration>,
    stats: AppStats,
}

impl BulkSend {
    pub fn new(config: BulkSendConfig) -> Self {
        let segment_size = config.segment_size.max(1) as u64;
        let total_segments = if config.max_bytes == 0 {
            u64::MAX
        } else {
            config.max_bytes.div_ceil(segment_size)
        };

        Self {
            config,
            total_segments,
            running: false,
            generation: 0,
            rto_armed: false,
            snd_una: 0,
            snd_nxt: 0,
            high_tx: 0,
            cwnd: INITIAL_CWND,
            ssthresh: f64::MAX,
            dupacks: 0,
            recover: None,
            loss_high_water: 0,
            rtt: RttEstimator::new(),
            send_times: BTreeMap::new(),
            stats: AppStats::default(),
        }
    }

    pub fn config(&self) -> &BulkSendConfig {
        &self.config
    }

    pub fn stats(&self) -> &AppStats {
        &self.stats
    }

    pub fn cwnd(&self) -> f64 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> f64 {
        self.ssthresh
    }

    pub fn acknowledged_segments(&self) -> u64 {
        self.snd_una
    }

    pub fn is_complete(&self) -> bool {
        self.snd_una >= self.total_segments
    }

    pub(crate) fn start(&mut self, now: Duration) -> Vec<AppAction> {
        if self.running {
            return Vec::new();
        }

        self.running = true;
        let mut actions = Vec::new();
        self.send_available(now, &mut actions);
        actions
    }

    pub(crate) fn stop(&mut self) {
        self.running = false;
        self.disarm_rto();
    }

    pub(crate) fn on_packet(&mut self, now: Duration, packet: &Packet) -> Vec<AppAction> {
        let Payload::Ack { next_expected } = packet.payload else {
            return Vec::new();
        };
        if !self.running {
            return Vec::new();
        }

        let mut actions = Vec::new();
        if next_expected > self.snd_una {
            self.on_new_ack(now, next_expected, &mut actions);
        } else if next_expected == self.snd_una && self.snd_una < self.high_tx {
            self.on_duplicate_ack(now, &mut actions);
        }

        actions
    }

    pub(crate) fn on_timer(&mut self, now: Duration, token: TimerToken) -> Vec<AppAction> {
        if !self.running
            || token.kind != TimerKind::Retransmission
            || token.generation != self.generation
        {
            return Vec::new();
        }

        self.rto_armed = false;
        if self.is_complete() {
            return Vec::new();
        }

        self.ssthresh = (self.flight_size() / 2.0).max(MIN_SSTHRESH);
        self.cwnd = 1.0;
        self.snd_nxt = self.snd_una;
        self.dupacks = 0;
        self.recover = None;
        self.loss_high_water = self.high_tx;
        self.send_times.clear();
        self.rtt.back_off();

        let mut actions = Vec::new();
        self.send_available(now, &mut actions);
        actions
    }

    fn on_new_ack(&mut self, now: Duration, next_expected: u64, actions: &mut Vec<AppAction>) {
        let newly_acked = next_expected - self.snd_una;

        if let Some(&sent_at) = self.send_times.get(&(next_expected - 1)) {
            self.rtt.on_sample(now.saturating_sub(sent_at));
        }
        self.send_times = self.send_times.split_off(&next_expected);

        self.snd_una = next_expected;
        self.snd_nxt = self.snd_nxt.max(self.snd_una);
        self.dupacks = 0;

        match (self.config.variant, self.recover) {
            (TcpVariant::Reno, Some(_)) => {
                self.cwnd = self.ssthresh;
                self.recover = None;
            }
            (TcpVariant::NewReno, Some(recover)) if next_expected < recover => {
                // Partial ACK: the next hole is lost as well
                self.cwnd = (self.cwnd - newly_acked as f64 + 1.0).max(1.0);
                self.retransmit(now, self.snd_una, actions);
            }
            (TcpVariant::NewReno, Some(_)) => {
                self.cwnd = self.ssthresh;
                self.recover = None;
            }
            (TcpVariant::Tahoe, recover) => {
                if recover.is_some_and(|r| next_expected >= r) {
                    self.recover = None;
                }
                self.grow_cwnd();
            }
            (_, None) => self.grow_cwnd(),
        }

        if self.is_complete() {
            self.disarm_rto();
            return;
        }

        self.arm_rto(actions);
        self.send_available(now, actions);
    }

    fn on_duplicate_ack(&mut self, now: Duration, actions: &mut Vec<AppAction>) {
        self.dupacks += 1;

        if self.dupacks == DUPACK_THRESHOLD
            && self.recover.is_none()
            && self.snd_una >= self.loss_high_water
        {
            self.ssthresh = (self.flight_size() / 2.0).max(MIN_SSTHRESH);
            self.recover = Some(self.high_tx);
            self.loss_high_water = self.high_tx;

            match self.config.variant {
                TcpVariant::Tahoe => {
                    self.cwnd = 1.0;
                    self.snd_nxt = self.snd_una;
                    self.send_available(now, actions);
                }
                TcpVariant::Reno | TcpVariant::NewReno => {
                    self.cwnd = self.ssthresh + DUPACK_THRESHOLD as f64;
                    self.retransmit(now, self.snd_una, actions);
                }
            }

            self.arm_rto(actions);
            return;
        }

        if self.dupacks > DUPACK_THRESHOLD
            && self.recover.is_some()
            && self.config.variant != TcpVariant::Tahoe
        {
            // Window inflation, every duplicate ACK means a segment left the network
            self.cwnd += 1.0;
            self.send_available(now, actions);
        }
    }

    fn grow_cwnd(&mut self) {
        if self.cwnd < self.ssthresh {
            self.cwnd += 1.0;
        } else {
            self.cwnd += 1.0 / self.cwnd;
        }
    }

    fn flight_size(&self) -> f64 {
        (self.snd_nxt.max(self.high_tx) - self.snd_una) as f64
    }

    fn window(&self) -> u64 {
        (self.cwnd.floor() as u64).max(1)
    }

    fn send_available(&mut self, now: Duration, actions: &mut Vec<AppAction>) {
        while self.running
            && self.snd_nxt < self.total_segments
            && self.snd_nxt - self.snd_una < self.window()
        {
            let seq = self.snd_nxt;
            self.transmit(now, seq, actions);
            self.snd_nxt += 1;
        }
    }

    fn retransmit(&mut self, now: Duration, seq: u64, actions: &mut Vec<AppAction>) {
        self.transmit(now, seq, actions);
        self.snd_nxt = self.snd_nxt.max(seq + 1);
    }

    fn transmit(&mut self, now: Duration, seq: u64, actions: &mut Vec<AppAction>) {
        if seq < self.high_tx {
            self.stats.retransmissions += 1;
            self.send_times.remove(&seq);
        } else {
            self.send_times.insert(seq, now);
            self.high_tx = seq + 1;
        }

        let size_bytes = self.payload_size(seq) + SEGMENT_HEADER_BYTES;
        self.stats.sent.track_one(size_bytes);
        actions.push(AppAction::Send(Outgoing {
            destination: self.config.remote,
            size_bytes,
            payload: Payload::Segment { seq },
        }));

        if !self.rto_armed {
            self.arm_rto(actions);
        }
    }

    fn payload_size(&self, seq: u64) -> usize {
        let segment_size = self.config.segment_size.max(1);
        if self.config.max_bytes == 0 || seq + 1 < self.total_segments {
            return segment_size;
        }

        let remainder = (self.config.max_bytes % segment_size as u64) as usize;
        if remainder == 0 { segment_size } else { remainder }
    }

    fn arm_rto(&mut self, actions: &mut Vec<AppAction>) {
        self.generation += 1;
        self.rto_armed = true;
        actions.push(AppAction::Timer {
            after: self.rtt.rto(),
            token: TimerToken {
                kind: TimerKind::Retransmission,
                generation: self.generation,
            },
        });
    }

    fn disarm_rto(&mut self) {
        self.generation += 1;
        self.rto_armed = false;
    }
}
