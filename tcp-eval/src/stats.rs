//! Utilization, queue occupancy and drop statistics of the measured bottleneck interface

use crate::error::ConfigError;
use anyhow::Context;
use parking_lot::Mutex;
use serde::Serialize;
use sim_network::Network;
use sim_network::network::InterfaceId;
use sim_network::network::observer::InterfaceObserver;
use sim_network::stats::QueueCounters;
use sim_network::Packet;
use std::fmt::{Display, Formatter};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);
const AGGREGATION_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum QueueSampling {
    /// Sample the queue depth every time a packet gets enqueued
    #[default]
    OnEnqueue,
    /// Sample the queue depth at a fixed period
    Periodic(Duration),
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub enum QueueMetric {
    #[default]
    Packets,
    PercentOfCapacity,
}

impl QueueMetric {
    const NAMES: &'static str = "packets, percent-of-capacity";
}

impl FromStr for QueueMetric {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "packets" => Ok(QueueMetric::Packets),
            "percent-of-capacity" => Ok(QueueMetric::PercentOfCapacity),
            _ => Err(ConfigError::UnknownVariant {
                kind: "queue metric",
                name: s.to_string(),
                expected: Self::NAMES,
            }),
        }
    }
}

impl Display for QueueMetric {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueMetric::Packets => f.write_str("packets"),
            QueueMetric::PercentOfCapacity => f.write_str("percent-of-capacity"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SamplerSettings {
    pub sampling: QueueSampling,
    pub metric: QueueMetric,
}

/// Drop counters of the measured interface, per queueing layer
#[derive(Clone, Debug, Default)]
pub struct DropCounters {
    /// Only present when a traffic-control layer sits above the device queue
    pub traffic_control: Option<QueueCounters>,
    pub device: QueueCounters,
}

impl DropCounters {
    pub fn read(network: &Network, interface: InterfaceId) -> Self {
        Self {
            traffic_control: None,
            device: network.queue_counters(interface),
        }
    }

    /// Requeued packets are handed back to the upper layer and never lost
    pub fn dropped(&self) -> u64 {
        let (tc_dropped, tc_requeued) = self
            .traffic_control
            .as_ref()
            .map(|tc| (tc.dropped, tc.requeued))
            .unwrap_or((0, 0));
        (tc_dropped + self.device.dropped).saturating_sub(tc_requeued)
    }

    pub fn total(&self) -> u64 {
        match &self.traffic_control {
            Some(tc) => tc.received,
            None => self.device.received,
        }
    }

    pub fn drop_rate_percent(&self) -> f64 {
        let dropped = self.dropped();
        let total = self.total();
        if dropped == 0 || total == 0 {
            return 0.0;
        }

        100.0 * dropped as f64 / total as f64
    }
}

/// The single output row of an experiment
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EvalRecord {
    pub bandwidth_mbps: f64,
    pub rttp: f64,
    pub fwd_ftp_flows: usize,
    pub utilization_percent: f64,
    pub queue_metric: f64,
    pub drop_rate_percent: f64,
}

impl EvalRecord {
    pub fn to_row(&self) -> String {
        format!(
            "{}{:>15}{:>15}{:>15.4}{:>15.4}{:>15.4}\n",
            self.bandwidth_mbps,
            self.rttp,
            self.fwd_ftp_flows,
            self.utilization_percent,
            self.queue_metric,
            self.drop_rate_percent
        )
    }

    pub fn append_to(&self, path: &Path) -> anyhow::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open output file `{}`", path.display()))?;
        file.write_all(self.to_row().as_bytes())
            .with_context(|| format!("failed to append record to `{}`", path.display()))?;
        Ok(())
    }
}

pub struct EvalStats {
    bandwidth_mbps: f64,
    rttp: f64,
    fwd_ftp_flows: usize,
    sampling: QueueSampling,
    metric: QueueMetric,
    queue_capacity: usize,

    // Reset at every aggregation tick
    interval_bytes: u64,
    interval_depth_sum: u64,
    interval_samples: u64,

    total_utilization: f64,
    total_queue: f64,
    ticks: u64,
}

impl EvalStats {
    pub fn new(
        bandwidth_mbps: f64,
        rttp: f64,
        fwd_ftp_flows: usize,
        queue_capacity: usize,
        settings: &SamplerSettings,
    ) -> Self {
        Self {
            bandwidth_mbps,
            rttp,
            fwd_ftp_flows,
            sampling: settings.sampling,
            metric: settings.metric,
            queue_capacity,
            interval_bytes: 0,
            interval_depth_sum: 0,
            interval_samples: 0,
            total_utilization: 0.0,
            total_queue: 0.0,
            ticks: 0,
        }
    }

    pub fn record_bytes(&mut self, bytes: usize) {
        self.interval_bytes += bytes as u64;
    }

    pub fn record_queue_sample(&mut self, depth: usize) {
        self.interval_depth_sum += depth as u64;
        self.interval_samples += 1;
    }

    /// Closes the current interval
    pub fn aggregate(&mut self) {
        self.total_utilization +=
            self.interval_bytes as f64 * 8.0 / (self.bandwidth_mbps * 1_000_000.0);

        let mean_depth = if self.interval_samples == 0 {
            0.0
        } else {
            self.interval_depth_sum as f64 / self.interval_samples as f64
        };
        self.total_queue += match self.metric {
            QueueMetric::Packets => mean_depth,
            QueueMetric::PercentOfCapacity if self.queue_capacity == 0 => 0.0,
            QueueMetric::PercentOfCapacity => 100.0 * mean_depth / self.queue_capacity as f64,
        };

        self.interval_bytes = 0;
        self.interval_depth_sum = 0;
        self.interval_samples = 0;
        self.ticks += 1;
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn finish(&self, drops: &DropCounters) -> EvalRecord {
        let (utilization, queue) = if self.ticks == 0 {
            (0.0, 0.0)
        } else {
            let ticks = self.ticks as f64;
            (self.total_utilization / ticks, self.total_queue / ticks)
        };

        EvalRecord {
            bandwidth_mbps: self.bandwidth_mbps,
            rttp: self.rttp,
            fwd_ftp_flows: self.fwd_ftp_flows,
            utilization_percent: utilization * 100.0,
            queue_metric: queue,
            drop_rate_percent: drops.drop_rate_percent(),
        }
    }
}

impl InterfaceObserver for EvalStats {
    fn on_transmit_begin(&mut self, packet: &Packet) {
        self.record_bytes(packet.size_bytes);
    }

    fn on_enqueue(&mut self, queue_depth: usize) {
        if self.sampling == QueueSampling::OnEnqueue {
            self.record_queue_sample(queue_depth);
        }
    }
}

/// Hooks the stats into `interface` and schedules one aggregation tick per whole second of
/// `simulation_time`
pub fn attach(
    network: &mut Network,
    interface: InterfaceId,
    stats: EvalStats,
    simulation_time: Duration,
) -> Arc<Mutex<EvalStats>> {
    let sampling = stats.sampling;
    let stats = Arc::new(Mutex::new(stats));
    network.subscribe(interface, stats.clone());

    if let QueueSampling::Periodic(interval) = sampling {
        let stats = stats.clone();
        network.schedule(interval, move |network| {
            sample_queue(network, stats, interface, interval)
        });
    }

    let ticks = simulation_time.as_secs();
    for tick in 1..=ticks {
        let stats = stats.clone();
        network.schedule_at(AGGREGATION_INTERVAL * tick as u32, move |_| {
            stats.lock().aggregate()
        });
    }

    stats
}

fn sample_queue(
    network: &mut Network,
    stats: Arc<Mutex<EvalStats>>,
    interface: InterfaceId,
    interval: Duration,
) {
    stats.lock().record_queue_sample(network.queue_depth(interface));
    network.schedule(interval, move |network| {
        sample_queue(network, stats, interface, interval)
    });
}
