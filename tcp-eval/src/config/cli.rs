use crate::params::AccessBufferPolicy;
use crate::stats::QueueMetric;
use crate::traffic::StopPolicy;
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use serde_with::{DisplayFromStr, DurationSecondsWithFrac, serde_as};
use sim_network::apps::bulk_send::TcpVariant;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Evaluates TCP variants over dumbbell and parking-lot topologies")]
pub struct CliOpt {
    /// The random seed used for the simulated network and the flow start times
    #[arg(long, default_value_t = 42, global = true)]
    pub seed: u64,

    /// Whether the run should be non-deterministic, i.e. using a random seed instead of `--seed`
    #[arg(long, global = true)]
    pub non_deterministic: bool,

    /// Path to a file to which a JSON summary of every run is appended
    #[arg(long, global = true)]
    pub json_summary: Option<PathBuf>,

    #[command(flatten)]
    pub experiment: ExperimentOpt,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run one experiment over a dumbbell topology
    Dumbbell,
    /// Run one experiment over a parking-lot topology
    ParkingLot(ParkingLotOpt),
    /// Run every experiment listed in a JSON file
    Batch(BatchOpt),
}

/// Options shared by every topology
///
/// Unset options fall back to the defaults of the selected topology. The same struct is read
/// from the entries of a batch file, where durations are fractional seconds.
#[serde_as]
#[derive(Args, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ExperimentOpt {
    /// The bandwidth of every bottleneck link, in Mbps [default: 10]
    #[arg(long, global = true)]
    pub bottleneck_bandwidth: Option<f64>,

    /// The round-trip propagation delay, in seconds [default: 0.08]
    #[arg(long, global = true)]
    pub rttp: Option<f64>,

    /// The RTT difference between flows, in seconds [default: 0]
    #[arg(long, global = true)]
    pub rtt_difference: Option<f64>,

    /// Forward bulk (FTP-like) flows [default: 5]
    #[arg(long, global = true)]
    pub fwd_ftp_flows: Option<usize>,

    /// Reverse bulk (FTP-like) flows [default: 5]
    #[arg(long, global = true)]
    pub rev_ftp_flows: Option<usize>,

    /// Two-way voice flows [default: 5]
    #[arg(long, global = true)]
    pub voice_flows: Option<usize>,

    /// Forward streaming flows [default: 5]
    #[arg(long, global = true)]
    pub fwd_streaming_flows: Option<usize>,

    /// Reverse streaming flows [default: 5]
    #[arg(long, global = true)]
    pub rev_streaming_flows: Option<usize>,

    /// The rate of each streaming flow, in Kbps [default: 640]
    #[arg(long, global = true)]
    pub streaming_rate: Option<f64>,

    /// The payload size of streaming packets, in bytes [default: 840]
    #[arg(long, global = true)]
    pub streaming_packet_size: Option<usize>,

    /// Whether the bottleneck queue uses RED instead of tail-drop [default: true for dumbbell,
    /// false for parking-lot]
    #[arg(long, global = true)]
    pub use_aqm: Option<bool>,

    /// The experiment horizon, in seconds [default: 10 for dumbbell, 100 for parking-lot]
    #[arg(long, global = true, value_parser = parse_seconds)]
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub simulation_time: Option<Duration>,

    /// The congestion control of bulk senders (TcpTahoe, TcpReno or TcpNewReno) [default:
    /// TcpNewReno]
    #[arg(long, global = true)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub tcp_variant: Option<TcpVariant>,

    /// The file to which the output record is appended [default: TcpEvalDumbbell or
    /// TcpEvalParkingLot]
    #[arg(long, global = true)]
    pub file_name: Option<PathBuf>,

    /// When sources and sinks stop (drain-sinks or shared-horizon) [default: drain-sinks]
    #[arg(long, global = true)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub stop_policy: Option<StopPolicy>,

    /// How access link buffers are sized (mirror-bottleneck or own-bdp) [default:
    /// mirror-bottleneck]
    #[arg(long, global = true)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub access_buffer_policy: Option<AccessBufferPolicy>,

    /// How the mean queue is reported (packets or percent-of-capacity) [default: packets]
    #[arg(long, global = true)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub queue_metric: Option<QueueMetric>,

    /// Sample the bottleneck queue at this period instead of at every enqueue
    #[arg(long, global = true)]
    pub queue_sample_interval_ms: Option<u64>,
}

impl ExperimentOpt {
    /// Fills the options unset in `self` with the ones from `fallback`
    pub fn or(self, fallback: &ExperimentOpt) -> Self {
        let fallback = fallback.clone();
        Self {
            bottleneck_bandwidth: self.bottleneck_bandwidth.or(fallback.bottleneck_bandwidth),
            rttp: self.rttp.or(fallback.rttp),
            rtt_difference: self.rtt_difference.or(fallback.rtt_difference),
            fwd_ftp_flows: self.fwd_ftp_flows.or(fallback.fwd_ftp_flows),
            rev_ftp_flows: self.rev_ftp_flows.or(fallback.rev_ftp_flows),
            voice_flows: self.voice_flows.or(fallback.voice_flows),
            fwd_streaming_flows: self.fwd_streaming_flows.or(fallback.fwd_streaming_flows),
            rev_streaming_flows: self.rev_streaming_flows.or(fallback.rev_streaming_flows),
            streaming_rate: self.streaming_rate.or(fallback.streaming_rate),
            streaming_packet_size: self.streaming_packet_size.or(fallback.streaming_packet_size),
            use_aqm: self.use_aqm.or(fallback.use_aqm),
            simulation_time: self.simulation_time.or(fallback.simulation_time),
            tcp_variant: self.tcp_variant.or(fallback.tcp_variant),
            file_name: self.file_name.or(fallback.file_name),
            stop_policy: self.stop_policy.or(fallback.stop_policy),
            access_buffer_policy: self.access_buffer_policy.or(fallback.access_buffer_policy),
            queue_metric: self.queue_metric.or(fallback.queue_metric),
            queue_sample_interval_ms: self
                .queue_sample_interval_ms
                .or(fallback.queue_sample_interval_ms),
        }
    }
}

#[serde_as]
#[derive(Args, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ParkingLotOpt {
    /// Cross bulk flows per bottleneck hop [default: 5]
    #[arg(long)]
    pub cross_ftp_flows: Option<usize>,

    /// The propagation delay of cross links, in seconds [default: 0.01]
    #[arg(long, value_parser = parse_seconds)]
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub cross_link_delay: Option<Duration>,

    /// The number of bottleneck hops [default: 3]
    #[arg(long)]
    pub bottleneck_count: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct BatchOpt {
    /// Path to the JSON file listing the experiments
    #[arg(long)]
    pub config: PathBuf,
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let seconds: f64 = s
        .parse()
        .map_err(|_| format!("`{s}` is not a number of seconds"))?;
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| format!("`{s}` is not a valid non-negative number of seconds"))
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(args: &[&str]) -> CliOpt {
        CliOpt::try_parse_from(std::iter::once("tcp-eval").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults_are_unset() {
        let options = parse(&["dumbbell"]);
        assert_eq!(options.seed, 42);
        assert!(!options.non_deterministic);
        assert!(options.experiment.bottleneck_bandwidth.is_none());
        assert!(options.experiment.use_aqm.is_none());
        assert!(matches!(options.command, Command::Dumbbell));
    }

    #[test]
    fn test_options_after_subcommand() {
        let options = parse(&[
            "--rttp",
            "0.1",
            "parking-lot",
            "--fwd-ftp-flows",
            "2",
            "--cross-link-delay",
            "0.025",
            "--tcp-variant",
            "TcpReno",
            "--use-aqm",
            "true",
        ]);

        assert_eq!(options.experiment.rttp, Some(0.1));
        assert_eq!(options.experiment.fwd_ftp_flows, Some(2));
        assert_eq!(options.experiment.tcp_variant, Some(TcpVariant::Reno));
        assert_eq!(options.experiment.use_aqm, Some(true));
        let Command::ParkingLot(parking_lot) = options.command else {
            panic!("expected the parking-lot command");
        };
        assert_eq!(
            parking_lot.cross_link_delay,
            Some(Duration::from_millis(25))
        );
    }

    #[test]
    fn test_unknown_variant_is_rejected() {
        let result = CliOpt::try_parse_from(["tcp-eval", "dumbbell", "--tcp-variant", "TcpVegas"]);
        assert!(result.is_err());

        let result = CliOpt::try_parse_from(["tcp-eval", "dumbbell", "--simulation-time", "-1"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_or_prefers_own_values() {
        let entry = ExperimentOpt {
            fwd_ftp_flows: Some(1),
            ..Default::default()
        };
        let cli = ExperimentOpt {
            fwd_ftp_flows: Some(7),
            voice_flows: Some(0),
            ..Default::default()
        };

        let merged = entry.or(&cli);
        assert_eq!(merged.fwd_ftp_flows, Some(1));
        assert_eq!(merged.voice_flows, Some(0));
        assert_eq!(merged.rev_ftp_flows, None);
    }
}
