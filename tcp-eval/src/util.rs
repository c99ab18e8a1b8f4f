use crate::experiment::{ExperimentConfig, ExperimentReport};
use crate::topology::TopologyKind;

pub fn print_params(config: &ExperimentConfig) {
    let targets = &config.targets;
    let traffic = &config.traffic;

    println!("--- Params ---");
    println!("* Topology: {}", config.topology);
    println!("* Seed: {}", config.seed);
    println!(
        "* Bottleneck: {} Mbps, RTT {} s (difference {} s)",
        targets.bottleneck_bandwidth_mbps, targets.rttp, targets.rtt_difference
    );
    if config.topology == TopologyKind::ParkingLot {
        println!(
            "* Hops: {} ({} cross flows per hop, cross link delay {:?})",
            targets.bottleneck_count, traffic.cross_ftp_flows, targets.cross_link_delay
        );
    }
    println!(
        "* Flows: {} forward bulk, {} reverse bulk, {} voice, {} forward streaming, {} reverse streaming",
        traffic.fwd_ftp_flows,
        traffic.rev_ftp_flows,
        traffic.voice_flows,
        traffic.fwd_streaming_flows,
        traffic.rev_streaming_flows
    );
    if traffic.streaming_flows() > 0 {
        println!(
            "* Streaming: {} Kbps, {} byte packets",
            traffic.streaming_rate_kbps, traffic.streaming_packet_size
        );
    }
    println!(
        "* TCP variant: {}, stop policy: {}",
        config.traffic_settings.tcp_variant, config.traffic_settings.stop_policy
    );
    println!(
        "* AQM: {}, access buffers: {}, queue metric: {}",
        if traffic.use_aqm { "RED" } else { "off" },
        config.access_buffer_policy,
        config.sampler.metric
    );
    println!("* Simulation time: {:?}", traffic.simulation_time);
    println!("* Output file: {}", config.file_name.display());
}

pub fn print_report(report: &ExperimentReport) {
    let parameters = &report.parameters;
    println!("--- Derived parameters ---");
    println!(
        "* Bottleneck link: {} bps, {:?} delay, {} packet buffer",
        parameters.bottleneck_bandwidth_bps,
        parameters.bottleneck_delay,
        parameters.bottleneck_buffer
    );
    println!(
        "* Access links: {} bps, {:?} delay, {} packet buffer",
        parameters.access_bandwidth_bps, parameters.access_delay, parameters.access_buffer
    );
    println!("* Mean RTT: {} ms", parameters.mean_rtt_ms);
    if let Some(red) = &parameters.red {
        println!(
            "* RED thresholds: {} to {} packets (limit {})",
            red.min_th, red.max_th, red.queue_limit
        );
    }

    let shape = &report.shape;
    println!("--- Topology ---");
    println!("* Routers: {}", shape.routers);
    println!("* Leaves: {} left, {} right", shape.left_leaves, shape.right_leaves);
    println!("* Bottleneck links: {}", shape.bottleneck_links);
    if shape.cross_sources > 0 {
        println!(
            "* Cross leaves: {} sources, {} sinks",
            shape.cross_sources, shape.cross_sinks
        );
    }
    println!("* Assigned addresses: {}", shape.addresses);

    println!("--- Flows ---");
    for summary in report.classes.iter().filter(|c| c.flows > 0) {
        println!(
            "* {}: {} flows, {} bytes sent, {} bytes received, {} delivered ({:.3} Mbps goodput, {} retransmissions)",
            summary.class,
            summary.flows,
            summary.sent_bytes,
            summary.received_bytes,
            summary.delivered_bytes,
            summary.goodput_mbps,
            summary.retransmissions
        );
    }

    let record = &report.record;
    println!("--- Bottleneck ---");
    println!("* Utilization: {:.4}%", record.utilization_percent);
    println!("* Mean queue: {:.4}", record.queue_metric);
    println!("* Drop rate: {:.4}%", record.drop_rate_percent);
    println!(
        "* Simulated {:?} in {} events",
        report.simulated_time, report.executed_events
    );
}
