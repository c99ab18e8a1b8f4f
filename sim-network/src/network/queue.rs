use crate::Packet;
use crate::network::spec::{QueueSpec, RedConfig};
use crate::stats::QueueCounters;
use fastrand::Rng;
use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::time::Duration;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DropReason {
    QueueFull,
    RedEarly,
    RedForced,
}

impl Display for DropReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            DropReason::QueueFull => "queue full",
            DropReason::RedEarly => "early drop",
            DropReason::RedForced => "forced drop",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum EnqueueOutcome {
    Enqueued { depth: usize },
    Dropped(DropReason),
}

pub struct PacketQueue {
    packets: VecDeque<Packet>,
    discipline: Discipline,
    counters: QueueCounters,
}

enum Discipline {
    DropTail { max_packets: usize },
    Red(RedState),
}

impl PacketQueue {
    pub fn new(spec: &QueueSpec) -> Self {
        let discipline = match spec {
            QueueSpec::DropTail { max_packets } => Discipline::DropTail {
                max_packets: *max_packets,
            },
            QueueSpec::Red(config) => Discipline::Red(RedState::new(config.clone())),
        };

        Self {
            packets: VecDeque::new(),
            discipline,
            counters: QueueCounters::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn capacity(&self) -> usize {
        match &self.discipline {
            Discipline::DropTail { max_packets } => *max_packets,
            Discipline::Red(red) => red.config.queue_limit,
        }
    }

    pub fn counters(&self) -> &QueueCounters {
        &self.counters
    }

    pub(crate) fn enqueue(&mut self, packet: Packet, now: Duration, rng: &mut Rng) -> EnqueueOutcome {
        self.counters.received += 1;

        let queue_len = self.packets.len();
        let verdict = match &mut self.discipline {
            Discipline::DropTail { max_packets } => {
                (queue_len >= *max_packets).then_some(DropReason::QueueFull)
            }
            Discipline::Red(red) => red.admit(queue_len, now, rng),
        };

        if let Some(reason) = verdict {
            self.counters.dropped += 1;
            return EnqueueOutcome::Dropped(reason);
        }

        self.packets.push_back(packet);
        let depth = self.packets.len();
        self.counters.max_depth = self.counters.max_depth.max(depth);
        EnqueueOutcome::Enqueued { depth }
    }

    pub(crate) fn dequeue(&mut self, now: Duration) -> Option<Packet> {
        let packet = self.packets.pop_front()?;

        if self.packets.is_empty() {
            if let Discipline::Red(red) = &mut self.discipline {
                red.idle_since = Some(now);
            }
        }

        Some(packet)
    }
}

struct RedState {
    config: RedConfig,
    avg: f64,
    // Packets accepted since the last drop, -1 while the average is below `min_th`
    count: i64,
    idle_since: Option<Duration>,
}

impl RedState {
    fn new(config: RedConfig) -> Self {
        Self {
            config,
            avg: 0.0,
            count: -1,
            idle_since: None,
        }
    }

    fn update_average(&mut self, queue_len: usize, now: Duration) {
        let qw = self.config.qw;
        match self.idle_since.take() {
            Some(idle_since) if queue_len == 0 => {
                // Pretend `m` small packets arrived at an empty queue while the link was idle
                let idle_secs = now.saturating_sub(idle_since).as_secs_f64();
                let packets_per_sec = self.config.link_bandwidth_bps as f64
                    / (8.0 * self.config.mean_packet_size as f64);
                let m = idle_secs * packets_per_sec;
                self.avg *= (1.0 - qw).powf(m);
            }
            _ => {
                self.avg = (1.0 - qw) * self.avg + qw * queue_len as f64;
            }
        }
    }

    fn admit(&mut self, queue_len: usize, now: Duration, rng: &mut Rng) -> Option<DropReason> {
        self.update_average(queue_len, now);

        let config = &self.config;
        let max_p = 1.0 / config.l_interm;
        let verdict = if self.avg < config.min_th {
            self.count = -1;
            None
        } else if self.avg >= config.max_th && (!config.gentle || self.avg >= 2.0 * config.max_th)
        {
            self.count = 0;
            Some(DropReason::RedForced)
        } else {
            self.count += 1;
            let p_b = if self.avg < config.max_th {
                max_p * (self.avg - config.min_th) / (config.max_th - config.min_th)
            } else {
                max_p + (1.0 - max_p) * (self.avg - config.max_th) / config.max_th
            };

            // Spread drops evenly instead of clustering them
            let spread = 1.0 - self.count as f64 * p_b;
            let p_a = if spread <= 0.0 {
                1.0
            } else {
                (p_b / spread).min(1.0)
            };

            if rng.f64() < p_a {
                self.count = 0;
                Some(DropReason::RedEarly)
            } else {
                None
            }
        };

        verdict.or((queue_len >= config.queue_limit).then_some(DropReason::QueueFull))
    }
}
