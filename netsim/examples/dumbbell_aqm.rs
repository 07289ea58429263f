//! Compare queue disciplines on a dumbbell bottleneck.
//!
//! Two constant bit rate flows share a 100 Mbps access link feeding a
//! 10 Mbps bottleneck; together they offer 12 Mbps. The bottleneck queue is
//! swapped between runs and sampled every 100 ms.
//!
//! Run with `RUST_LOG=debug` for per-event detail.

use netsim::prelude::*;
use netsim_core::init_simulation_logging;
use tracing::info;

const STOP: SimTime = SimTime::from_secs(5);

fn bottleneck_queues() -> Vec<QueueConfig> {
    let limit = QueueLimit::Packets(100);
    vec![
        QueueConfig::tail_drop(limit),
        QueueConfig::new(
            limit,
            QueuePolicyConfig::Red(RedConfig {
                link_rate_bps: Some(10_000_000),
                ..RedConfig::new(5.0, 15.0, 0.1)
            }),
        ),
        QueueConfig::new(limit, QueuePolicyConfig::CoDel(CoDelConfig::default())),
        QueueConfig::new(limit, QueuePolicyConfig::Pie(PieConfig::default())),
        QueueConfig::fq_codel(),
    ]
}

fn run(queue: QueueConfig) -> Result<(), NetError> {
    let policy = queue.policy.name();
    let mut sim = NetSimulation::new(SimulationConfig { seed: 42, ..Default::default() });

    let access = sim.add_link(LinkConfig::new(
        "access",
        100_000_000,
        SimTime::from_micros(100),
        QueueConfig::default(),
    ))?;
    let bottleneck = sim.add_link(LinkConfig::new(
        "bottleneck",
        10_000_000,
        SimTime::from_millis(5),
        queue,
    ))?;
    sim.connect(access, bottleneck)?;

    for (port, rate) in [(49153, 8_000_000), (49154, 4_000_000)] {
        sim.add_source(ConstantBitRateSource {
            name: format!("cbr-{port}"),
            link: access,
            flow_key: FlowKey::udp_v4([10, 1, 1, 1], port, [10, 1, 2, 2], 9),
            packet_size: 1000,
            rate_bps: rate,
            start: SimTime::from_millis(100),
            stop: STOP,
            ecn_capable: false,
        })?;
    }
    let queue_id = sim.state().link(bottleneck)?.queue;
    sim.add_queue_tracer(QueueTracer {
        name: "bottleneck".to_string(),
        queue: queue_id,
        period: SimTime::from_millis(100),
        stop: STOP,
    })?;

    let events = sim.run(Some(STOP + SimTime::from_secs(1)));
    let stats = sim.queue_stats(queue_id)?;
    let samples = sim.state().samples("bottleneck");
    let mean_backlog =
        samples.iter().map(|s| s.packets as f64).sum::<f64>() / samples.len().max(1) as f64;

    println!("== {policy} ({events} events)");
    println!(
        "   queue: {} dequeued, {} dropped, {} marked, mean backlog {:.1} packets",
        stats.dequeued_packets, stats.drop_count, stats.mark_count, mean_backlog
    );
    for record in sim.flows().flows() {
        let metrics = record.metrics();
        println!(
            "   {}: goodput {:.2} Mbps, mean delay {}, loss {:.3}",
            record.flow_key,
            metrics.throughput_bps.unwrap_or(0.0) / 1e6,
            metrics.mean_delay.map_or("n/a".to_string(), |d| d.to_string()),
            metrics.loss_ratio.unwrap_or(0.0),
        );
    }
    info!(policy, "Run finished");
    sim.destroy();
    Ok(())
}

fn main() -> Result<(), NetError> {
    init_simulation_logging();
    for queue in bottleneck_queues() {
        run(queue)?;
    }
    Ok(())
}
