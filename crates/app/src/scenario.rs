//! Demo topologies: small networks wired up, driven, and narrated.
//!
//! Each scenario builds its devices, injects a bit of traffic, runs the
//! simulation to quiescence, and prints what happened. MAC addresses come
//! from a seeded RNG so repeated runs are identical.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::net::Ipv4Addr;
use std::rc::{Rc, Weak};

use tcpip_sim_core::addr::{MacAddress, SubnetMask};
use tcpip_sim_core::ethernet::{EtherType, FramePayload};
use tcpip_sim_core::ip::{IpPacket, IpPayload, IpProtocol};
use tcpip_sim_core::nic::{NetworkInterface, NetworkLayer};
use tcpip_sim_core::phy::{Cable, RepeaterHub};
use tcpip_sim_core::sim::Simulation;
use tcpip_sim_core::stack::{IpStack, TransportLayer};
use tcpip_sim_core::switch::L2Switch;

use crate::config::Config;

struct PrintingTransport {
    name: String,
}

impl PrintingTransport {
    fn new(name: impl Into<String>) -> Rc<Self> {
        Rc::new(Self { name: name.into() })
    }
}

impl TransportLayer for PrintingTransport {
    fn on_receive(&self, packet: &IpPacket, sim: &mut Simulation) {
        let body = match &packet.payload {
            IpPayload::Text(text) => text.clone(),
            IpPayload::Bytes(bytes) => format!("{} bytes", bytes.len()),
        };
        println!(
            "  [{:>6} ms] {} received {packet}: {body:?}",
            sim.now(),
            self.name
        );
    }
}

struct PrintingLayer {
    name: String,
}

impl PrintingLayer {
    fn new(name: impl Into<String>) -> Rc<Self> {
        Rc::new(Self { name: name.into() })
    }
}

impl NetworkLayer for PrintingLayer {
    fn receive(
        &self,
        payload: FramePayload,
        _ether_type: EtherType,
        source_mac: MacAddress,
        sim: &mut Simulation,
    ) {
        if let FramePayload::Raw(bytes) = payload {
            println!(
                "  [{:>6} ms] {} received {} raw bytes from {source_mac}",
                sim.now(),
                self.name,
                bytes.len()
            );
        }
    }
}

struct Host {
    stack: Rc<IpStack>,
    nic: Rc<NetworkInterface>,
    // the stack and NIC hold the transport weakly
    _transport: Rc<PrintingTransport>,
}

fn host(
    name: &str,
    addr: Ipv4Addr,
    mask: SubnetMask,
    rng: &mut ChaCha8Rng,
) -> Host {
    let nic = NetworkInterface::new(MacAddress::random(rng), format!("{name}-eth0"));
    let stack = IpStack::new();
    stack.add_interface("eth0", Rc::clone(&nic), addr, mask);
    let transport = PrintingTransport::new(name);
    stack.set_transport_layer(Rc::downgrade(&transport) as Weak<dyn TransportLayer>);
    Host {
        stack,
        nic,
        _transport: transport,
    }
}

fn finish(sim: &mut Simulation, config: &Config) {
    sim.run();
    if config.print_trace {
        println!();
        println!("  trace:");
        for record in sim.events() {
            println!("    {record}");
        }
    }
    if config.print_stats {
        let stats = sim.stats();
        println!();
        println!(
            "  {} events executed, {} scheduled, {} cancelled (final clock: {} ms)",
            stats.events_executed,
            stats.events_scheduled,
            stats.events_cancelled,
            sim.now()
        );
    }
    println!();
}

/// Two interfaces, one cable, one raw frame.
pub fn run_direct(config: &Config) {
    println!("--- direct: two hosts, one cable ---");
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut sim = Simulation::new();

    let alice = NetworkInterface::new(MacAddress::random(&mut rng), "alice-eth0");
    let bob = NetworkInterface::new(MacAddress::random(&mut rng), "bob-eth0");
    let _cable = Cable::connect(alice.port(), bob.port(), config.latency_ms);

    let sink = PrintingLayer::new("bob");
    bob.bind_upper_layer(Rc::downgrade(&sink) as Weak<dyn NetworkLayer>);

    alice.send_frame(
        bob.mac(),
        EtherType::Other(0x88B5),
        FramePayload::Raw(b"hello over the wire".to_vec()),
        &mut sim,
    );

    finish(&mut sim, config);
}

/// Three hosts on a hub: everyone hears everything, NICs filter.
pub fn run_hub(config: &Config) {
    println!("--- hub: three hosts on a repeater ---");
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut sim = Simulation::new();
    let mask = SubnetMask::CLASS_C;

    let hub = RepeaterHub::new("hub0", 3);
    let hosts = [
        host("alice", Ipv4Addr::new(192, 168, 1, 10), mask, &mut rng),
        host("bob", Ipv4Addr::new(192, 168, 1, 20), mask, &mut rng),
        host("carol", Ipv4Addr::new(192, 168, 1, 30), mask, &mut rng),
    ];
    let _cables: Vec<Rc<Cable>> = hosts
        .iter()
        .zip(hub.ports())
        .map(|(h, p)| Cable::connect(h.nic.port(), Rc::clone(p), config.latency_ms))
        .collect();

    if let Err(err) = hosts[0].stack.send_packet(
        Ipv4Addr::new(192, 168, 1, 20),
        IpProtocol::Udp,
        IpPayload::Text("for bob only".into()),
        None,
        &mut sim,
    ) {
        eprintln!("send failed: {err}");
    }

    finish(&mut sim, config);
}

/// Three hosts on a switch: flood once, then unicast.
pub fn run_switch(config: &Config) {
    println!("--- switch: learning, then unicast ---");
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut sim = Simulation::new();
    let mask = SubnetMask::CLASS_C;

    let switch = L2Switch::new("sw0", 3);
    let hosts = [
        host("alice", Ipv4Addr::new(192, 168, 1, 10), mask, &mut rng),
        host("bob", Ipv4Addr::new(192, 168, 1, 20), mask, &mut rng),
        host("carol", Ipv4Addr::new(192, 168, 1, 30), mask, &mut rng),
    ];
    let _cables: Vec<Rc<Cable>> = hosts
        .iter()
        .zip(switch.ports())
        .map(|(h, p)| Cable::connect(h.nic.port(), Rc::clone(p), config.latency_ms))
        .collect();

    for text in ["first (floods)", "second (unicast)"] {
        if let Err(err) = hosts[0].stack.send_packet(
            Ipv4Addr::new(192, 168, 1, 20),
            IpProtocol::Udp,
            IpPayload::Text(text.into()),
            None,
            &mut sim,
        ) {
            eprintln!("send failed: {err}");
        }
        sim.run();
    }

    println!(
        "  switch learned {} addresses",
        switch.mac_table_len()
    );
    finish(&mut sim, config);
}

/// Two subnets joined by a forwarding stack.
pub fn run_router(config: &Config) {
    println!("--- router: forwarding between subnets ---");
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut sim = Simulation::new();
    let mask = SubnetMask::CLASS_C;

    let alice = host("alice", Ipv4Addr::new(192, 168, 1, 10), mask, &mut rng);
    let bob = host("bob", Ipv4Addr::new(10, 0, 0, 20), mask, &mut rng);

    let left = NetworkInterface::new(MacAddress::random(&mut rng), "router-eth0");
    let right = NetworkInterface::new(MacAddress::random(&mut rng), "router-eth1");
    let router = IpStack::with_forwarding(true);
    router.add_interface("eth0", Rc::clone(&left), Ipv4Addr::new(192, 168, 1, 1), mask);
    router.add_interface("eth1", Rc::clone(&right), Ipv4Addr::new(10, 0, 0, 1), mask);

    let _c1 = Cable::connect(alice.nic.port(), left.port(), config.latency_ms);
    let _c2 = Cable::connect(bob.nic.port(), right.port(), config.latency_ms);

    let wired = alice
        .stack
        .set_default_gateway(Ipv4Addr::new(192, 168, 1, 1), "eth0")
        .and_then(|_| bob.stack.set_default_gateway(Ipv4Addr::new(10, 0, 0, 1), "eth0"));
    if let Err(err) = wired {
        eprintln!("gateway setup failed: {err}");
        return;
    }

    println!("  routing table of the router:");
    for line in router.routing_table().borrow().to_string().lines() {
        println!("    {line}");
    }

    if let Err(err) = alice.stack.send_packet(
        Ipv4Addr::new(10, 0, 0, 20),
        IpProtocol::Udp,
        IpPayload::Text("across the router".into()),
        None,
        &mut sim,
    ) {
        eprintln!("send failed: {err}");
    }

    finish(&mut sim, config);
}
