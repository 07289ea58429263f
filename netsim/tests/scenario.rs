use netsim::aqm::QueueDisc;
use netsim::prelude::*;
use netsim::LinkEnd;

const SCENARIO: &str = r#"{
    "simulation": { "seed": 11 },
    "stop_time": 2000000000,
    "links": [
        { "name": "access", "rate_bps": 100000000, "delay": 100000, "next": "bottleneck" },
        { "name": "bottleneck", "rate_bps": 10000000, "delay": 5000000,
          "queue": { "limit": { "packets": 100 }, "policy": { "type": "fq_codel" } } }
    ],
    "sources": [
        { "name": "bulk", "link": "access", "packet_size": 1000, "rate_bps": 9000000,
          "stop": 1000000000,
          "flow": { "src": "10.1.1.1", "dst": "10.1.2.2", "src_port": 49153,
                    "dst_port": 9, "protocol": "udp" } },
        { "name": "light", "link": "access", "packet_size": 500, "rate_bps": 1000000,
          "start": 100000000, "stop": 1000000000,
          "flow": { "src": "10.1.1.2", "dst": "10.1.2.2", "src_port": 49154,
                    "dst_port": 9, "protocol": "udp" } }
    ],
    "tracers": [
        { "name": "bottleneck-q", "link": "bottleneck", "period": 100000000, "stop": 1000000000 }
    ]
}"#;

fn build() -> (NetSimulation, Option<SimTime>) {
    let scenario = ScenarioConfig::from_json_str(SCENARIO).unwrap();
    let sim = NetSimulation::from_scenario(&scenario).unwrap();
    (sim, scenario.stop_time)
}

#[test]
fn scenario_builds_the_described_topology() {
    let (sim, _) = build();
    assert_eq!(sim.config().seed, 11);
    let access = sim.state().link_by_name("access").unwrap();
    let bottleneck = sim.state().link_by_name("bottleneck").unwrap();
    assert_eq!(access.next, LinkEnd::Link(bottleneck.id));
    assert_eq!(bottleneck.next, LinkEnd::Sink);
    assert_eq!(sim.state().queues.get(bottleneck.queue).unwrap().kind(), "fq_codel");
    // Two sources and one tracer are waiting to start.
    assert_eq!(sim.simulation().pending_events(), 3);
}

#[test]
fn scenario_runs_to_its_stop_time() {
    let (mut sim, stop) = build();
    sim.run(stop);
    assert!(sim.time() <= SimTime::from_secs(2));

    let samples = sim.state().samples("bottleneck-q");
    assert_eq!(samples.len(), 10);
    assert_eq!(samples[0].time, SimTime::from_millis(100));
    assert_eq!(samples[9].time, SimTime::from_secs(1));

    let light = FlowKey::udp_v4([10, 1, 1, 2], 49154, [10, 1, 2, 2], 9);
    let record = sim.flows().record(&light).unwrap();
    assert_eq!(record.first_tx_time, Some(SimTime::from_millis(100)));
    assert_eq!(record.lost_packets, 0);
    assert_eq!(sim.flows().aggregate().in_flight_packets, 0);
    assert_eq!(sim.state().counters["bulk"].packets_sent, 1125);
}

#[test]
fn scenario_loads_from_a_file() {
    let path = std::env::temp_dir().join(format!("netsim-scenario-{}.json", std::process::id()));
    std::fs::write(&path, SCENARIO).unwrap();
    let scenario = ScenarioConfig::from_path(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(scenario, ScenarioConfig::from_json_str(SCENARIO).unwrap());

    assert!(matches!(
        ScenarioConfig::from_path(std::env::temp_dir().join("netsim-no-such-scenario.json")),
        Err(NetError::Io(_))
    ));
}

#[test]
fn scenario_with_dangling_reference_is_rejected() {
    let mut scenario = ScenarioConfig::from_json_str(SCENARIO).unwrap();
    scenario.tracers[0].link = "core".to_string();
    assert!(matches!(
        NetSimulation::from_scenario(&scenario),
        Err(NetError::UnknownName(name)) if name == "core"
    ));
}
