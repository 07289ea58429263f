use netsim::prelude::*;
use netsim::SINK;

const FLOW_A: FlowKey = flow(49153);

const fn flow(port: u16) -> FlowKey {
    FlowKey {
        src: std::net::IpAddr::V4(std::net::Ipv4Addr::new(10, 1, 1, 1)),
        dst: std::net::IpAddr::V4(std::net::Ipv4Addr::new(10, 1, 2, 2)),
        src_port: port,
        dst_port: 9,
        protocol: Protocol::Udp,
    }
}

/// access (100 Mbps, 100 us) -> bottleneck (10 Mbps, 5 ms) -> sink
fn dumbbell(seed: u64, bottleneck_queue: QueueConfig) -> (NetSimulation, LinkId, LinkId) {
    let mut sim = NetSimulation::new(SimulationConfig {
        seed,
        ..Default::default()
    });
    let access = sim
        .add_link(LinkConfig::new(
            "access",
            100_000_000,
            SimTime::from_micros(100),
            QueueConfig::default(),
        ))
        .unwrap();
    let bottleneck = sim
        .add_link(LinkConfig::new(
            "bottleneck",
            10_000_000,
            SimTime::from_millis(5),
            bottleneck_queue,
        ))
        .unwrap();
    sim.connect(access, bottleneck).unwrap();
    (sim, access, bottleneck)
}

fn cbr(link: LinkId, key: FlowKey, rate_bps: u64, stop: SimTime) -> ConstantBitRateSource {
    ConstantBitRateSource {
        name: format!("cbr-{}", key.src_port),
        link,
        flow_key: key,
        packet_size: 1000,
        rate_bps,
        start: SimTime::zero(),
        stop,
        ecn_capable: false,
    }
}

#[test]
fn underloaded_path_has_fixed_delay_and_no_loss() {
    let (mut sim, access, _) = dumbbell(1, QueueConfig::tail_drop(QueueLimit::Packets(100)));
    sim.add_source(cbr(access, FLOW_A, 1_000_000, SimTime::from_secs(1)))
        .unwrap();
    sim.run(None);

    let record = sim.flows().record(&FLOW_A).unwrap();
    assert_eq!(record.tx_packets, 125);
    assert_eq!(record.rx_packets, 125);
    assert_eq!(record.lost_packets, 0);
    // 80 us + 100 us on the access link, 800 us + 5 ms on the bottleneck.
    let metrics = record.metrics();
    assert_eq!(metrics.mean_delay, Some(SimTime::from_micros(5980)));
    assert_eq!(metrics.mean_jitter, Some(SimTime::zero()));
    assert_eq!(metrics.loss_ratio, Some(0.0));
    assert_eq!(sim.state().counters[SINK].packets_received, 125);
}

#[test]
fn overloaded_bottleneck_conserves_packets() {
    let (mut sim, access, bottleneck) =
        dumbbell(1, QueueConfig::tail_drop(QueueLimit::Packets(50)));
    sim.add_source(cbr(access, FLOW_A, 8_000_000, SimTime::from_secs(2)))
        .unwrap();
    sim.add_source(cbr(access, flow(49154), 4_000_000, SimTime::from_secs(2)))
        .unwrap();
    sim.run(None);

    let aggregate = sim.flows().aggregate();
    assert_eq!(aggregate.flows, 2);
    assert!(aggregate.lost_packets > 0);
    assert_eq!(aggregate.in_flight_packets, 0);
    assert_eq!(aggregate.tx_packets, aggregate.rx_packets + aggregate.lost_packets);

    let queue = sim.state().link(bottleneck).unwrap().queue;
    let stats = sim.queue_stats(queue).unwrap();
    assert_eq!(stats.drop_count, aggregate.lost_packets);
    assert_eq!(stats.occupancy_packets, 0);
    assert_eq!(sim.state().link(access).unwrap().counters.packets_dropped, 0);
    // The bottleneck never sends faster than 10 Mbps.
    let last_rx = sim.flows().flows().filter_map(|r| r.last_rx_time).max().unwrap();
    let bits = aggregate.rx_bytes * 8;
    assert!(bits as f64 / last_rx.as_secs_f64() <= 10_000_000.0);
}

#[test]
fn codel_marks_ecn_capable_traffic() {
    let queue = QueueConfig::new(
        QueueLimit::Packets(1000),
        QueuePolicyConfig::CoDel(CoDelConfig {
            use_ecn: true,
            ..Default::default()
        }),
    );
    let (mut sim, access, bottleneck) = dumbbell(1, queue);
    sim.add_source(ConstantBitRateSource {
        ecn_capable: true,
        ..cbr(access, FLOW_A, 12_000_000, SimTime::from_secs(1))
    })
    .unwrap();
    sim.run(None);

    let queue = sim.state().link(bottleneck).unwrap().queue;
    let stats = sim.queue_stats(queue).unwrap();
    assert!(stats.mark_count > 0);
    assert_eq!(stats.drop_count, 0);
    assert_eq!(sim.flows().record(&FLOW_A).unwrap().lost_packets, 0);
}

fn red_report(seed: u64) -> String {
    let queue = QueueConfig::new(
        QueueLimit::Packets(100),
        QueuePolicyConfig::Red(RedConfig::new(5.0, 15.0, 0.1)),
    );
    let (mut sim, access, _) = dumbbell(seed, queue);
    sim.add_source(cbr(access, FLOW_A, 8_000_000, SimTime::from_secs(2)))
        .unwrap();
    sim.add_source(cbr(access, flow(49154), 6_000_000, SimTime::from_secs(2)))
        .unwrap();
    sim.run(None);
    sim.flows().to_json(false).unwrap()
}

#[test]
fn same_seed_replays_identically() {
    assert_eq!(red_report(9), red_report(9));
}

#[test]
fn destroy_releases_everything_and_allows_a_fresh_run() {
    let (mut sim, access, bottleneck) =
        dumbbell(3, QueueConfig::tail_drop(QueueLimit::Packets(20)));
    sim.add_source(cbr(access, FLOW_A, 12_000_000, SimTime::from_secs(1)))
        .unwrap();
    sim.run(Some(SimTime::from_millis(500)));
    assert!(sim.state().uids.issued() > 0);

    assert!(sim.destroy());
    assert!(!sim.destroy());
    assert_eq!(sim.time(), SimTime::zero());
    assert!(sim.flows().is_empty());
    assert!(sim.state().queues.is_empty());
    assert_eq!(sim.state().links().count(), 0);
    assert_eq!(sim.state().uids.issued(), 0);
    assert!(matches!(sim.state().link(bottleneck), Err(NetError::UnknownLink(_))));

    // The same topology rebuilt on the destroyed simulation gets the same ids.
    let again = sim
        .add_link(LinkConfig::new(
            "access",
            100_000_000,
            SimTime::from_micros(100),
            QueueConfig::default(),
        ))
        .unwrap();
    assert_eq!(again, access);
    sim.add_source(cbr(again, FLOW_A, 1_000_000, SimTime::from_millis(80)))
        .unwrap();
    sim.run(None);
    assert_eq!(sim.flows().record(&FLOW_A).unwrap().rx_packets, 10);
    assert!(sim.destroy());
}

#[test]
fn unknown_references_are_rejected() {
    let (mut sim, _, _) = dumbbell(1, QueueConfig::default());
    let err = sim
        .add_source(cbr(LinkId(7), FLOW_A, 1_000_000, SimTime::from_secs(1)))
        .unwrap_err();
    assert!(matches!(err, NetError::UnknownLink(LinkId(7))));
    assert!(sim.connect(LinkId(0), LinkId(7)).is_err());
    assert!(sim
        .add_source(cbr(LinkId(0), FLOW_A, 0, SimTime::from_secs(1)))
        .is_err());
    assert!(sim
        .add_queue_tracer(QueueTracer {
            name: "q".to_string(),
            queue: QueueId(0),
            period: SimTime::zero(),
            stop: SimTime::from_secs(1),
        })
        .is_err());
    assert_eq!(sim.simulation().pending_events(), 0);
}

#[test]
fn stalled_packets_are_declared_lost() {
    let mut sim = NetSimulation::new(SimulationConfig::default());
    let slow = sim
        .add_link(LinkConfig::new(
            "satellite",
            1_000_000,
            SimTime::from_secs(30),
            QueueConfig::default(),
        ))
        .unwrap();
    let uid = sim.state_mut().uids.next_uid();
    let packet = PacketDescriptor::new(uid, 500, FLOW_A, SimTime::zero());
    assert_eq!(sim.send(slow, packet).unwrap(), Decision::Enqueue);
    sim.schedule(SimTime::from_secs(15), |_, _| {});
    sim.run(Some(SimTime::from_secs(15)));

    assert_eq!(sim.check_for_lost_packets(), 1);
    let record = sim.flows().record(&FLOW_A).unwrap();
    assert_eq!(record.lost_packets, 1);
    assert_eq!(sim.flows().in_flight(&FLOW_A), 0);

    // The packet still reaches the sink at 30 s but is not counted again.
    sim.run(None);
    let record = sim.flows().record(&FLOW_A).unwrap();
    assert_eq!(record.rx_packets, 0);
    assert_eq!(record.lost_packets, 1);
    assert_eq!(sim.state().counters[SINK].packets_received, 1);
}

#[test]
fn rejected_send_records_nothing() {
    let (mut sim, access, _) = dumbbell(1, QueueConfig::default());
    let uid = sim.state_mut().uids.next_uid();
    let empty = PacketDescriptor::new(uid, 0, FLOW_A, SimTime::zero());
    assert!(matches!(sim.send(access, empty), Err(NetError::Queue(_))));

    let uid = sim.state_mut().uids.next_uid();
    let packet = PacketDescriptor::new(uid, 1000, FLOW_A, SimTime::zero());
    assert!(matches!(sim.send(LinkId(42), packet), Err(NetError::UnknownLink(LinkId(42)))));

    assert!(sim.flows().is_empty());
    assert_eq!(sim.flows().aggregate().in_flight_packets, 0);
    assert_eq!(sim.simulation().pending_events(), 0);
    sim.schedule(SimTime::from_secs(20), |_, _| {});
    sim.run(None);
    assert_eq!(sim.check_for_lost_packets(), 0);
}

#[test]
fn destroy_after_topology_only_setup_resets() {
    let (mut sim, _, _) = dumbbell(1, QueueConfig::default());
    assert!(sim.destroy());

    sim.add_link(LinkConfig::new(
        "access",
        100_000_000,
        SimTime::from_micros(100),
        QueueConfig::default(),
    ))
    .unwrap();
    sim.create_queue(QueueConfig::default()).unwrap();
    assert!(!sim.is_destroyed());

    assert!(sim.destroy());
    assert_eq!(sim.state().links().count(), 0);
    assert!(sim.state().queues.is_empty());
}
