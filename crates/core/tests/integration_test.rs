//! End-to-end scenarios: full topologies wired up and driven through the
//! virtual clock, asserting on delivered traffic and the trace log.

use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::rc::{Rc, Weak};

use tcpip_sim_core::addr::{MacAddress, SubnetMask};
use tcpip_sim_core::ethernet::{EtherType, FramePayload};
use tcpip_sim_core::ip::{IpPacket, IpPayload, IpProtocol, DEFAULT_TTL};
use tcpip_sim_core::nic::{NetworkInterface, NetworkLayer};
use tcpip_sim_core::phy::{Cable, RepeaterHub};
use tcpip_sim_core::sim::{Simulation, TraceEvent};
use tcpip_sim_core::stack::{IpStack, TransportLayer};
use tcpip_sim_core::switch::L2Switch;

fn mac(last: u8) -> MacAddress {
    MacAddress::new([0x02, 0, 0, 0, 0, last])
}

fn ip(a: u8, b: u8, c: u8, d: u8) -> Ipv4Addr {
    Ipv4Addr::new(a, b, c, d)
}

fn mask24() -> SubnetMask {
    SubnetMask::CLASS_C
}

struct CaptureLayer {
    frames: RefCell<Vec<(FramePayload, MacAddress)>>,
}

impl CaptureLayer {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            frames: RefCell::new(Vec::new()),
        })
    }
}

impl NetworkLayer for CaptureLayer {
    fn receive(
        &self,
        payload: FramePayload,
        _ether_type: EtherType,
        source_mac: MacAddress,
        _sim: &mut Simulation,
    ) {
        self.frames.borrow_mut().push((payload, source_mac));
    }
}

struct CaptureTransport {
    packets: RefCell<Vec<IpPacket>>,
}

impl CaptureTransport {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            packets: RefCell::new(Vec::new()),
        })
    }
}

impl TransportLayer for CaptureTransport {
    fn on_receive(&self, packet: &IpPacket, _sim: &mut Simulation) {
        self.packets.borrow_mut().push(packet.clone());
    }
}

struct Host {
    stack: Rc<IpStack>,
    nic: Rc<NetworkInterface>,
    transport: Rc<CaptureTransport>,
}

fn host(mac_last: u8, addr: Ipv4Addr) -> Host {
    let nic = NetworkInterface::new(mac(mac_last), format!("eth-{mac_last}"));
    let stack = IpStack::new();
    stack.add_interface("eth0", Rc::clone(&nic), addr, mask24());
    let transport = CaptureTransport::new();
    stack.set_transport_layer(Rc::downgrade(&transport) as Weak<dyn TransportLayer>);
    Host {
        stack,
        nic,
        transport,
    }
}

#[test]
fn test_direct_frame_exchange() {
    let mut sim = Simulation::new();
    let a = NetworkInterface::new(MacAddress::new([0x11; 6]), "eth-a");
    let b = NetworkInterface::new(MacAddress::new([0x22; 6]), "eth-b");
    let _cable = Cable::connect(a.port(), b.port(), 1);

    let capture = CaptureLayer::new();
    b.bind_upper_layer(Rc::downgrade(&capture) as Weak<dyn NetworkLayer>);

    a.send_frame(
        MacAddress::new([0x22; 6]),
        EtherType::Other(0x88B5),
        FramePayload::Raw(b"hello".to_vec()),
        &mut sim,
    );
    sim.run();

    let frames = capture.frames.borrow();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0, FramePayload::Raw(b"hello".to_vec()));
    assert_eq!(frames[0].1, MacAddress::new([0x11; 6]));
}

#[test]
fn test_arp_then_ip_delivery_and_caching() {
    let mut sim = Simulation::new();
    let a = host(1, ip(192, 168, 1, 10));
    let b = host(2, ip(192, 168, 1, 20));
    let _cable = Cable::connect(a.nic.port(), b.nic.port(), 1);

    a.stack
        .send_packet(
            ip(192, 168, 1, 20),
            IpProtocol::Udp,
            IpPayload::Text("first".into()),
            None,
            &mut sim,
        )
        .unwrap();
    sim.run();

    // one request, one reply, one delivery
    assert_eq!(
        sim.count_events(|e| matches!(e, TraceEvent::ArpRequestSent { .. })),
        1
    );
    assert_eq!(
        sim.count_events(|e| matches!(e, TraceEvent::ArpReplySent { .. })),
        1
    );
    assert_eq!(a.transport.packets.borrow().len(), 0);
    assert_eq!(b.transport.packets.borrow().len(), 1);
    assert_eq!(
        b.transport.packets.borrow()[0].payload,
        IpPayload::Text("first".into())
    );

    // the second send rides the cache: no new ARP traffic on the wire
    sim.clear_events();
    a.stack
        .send_packet(
            ip(192, 168, 1, 20),
            IpProtocol::Udp,
            IpPayload::Text("second".into()),
            None,
            &mut sim,
        )
        .unwrap();
    sim.run();

    assert_eq!(
        sim.count_events(|e| matches!(e, TraceEvent::ArpRequestSent { .. })),
        0
    );
    assert_eq!(
        sim.count_events(|e| matches!(e, TraceEvent::ArpCacheHit { .. })),
        1
    );
    assert_eq!(b.transport.packets.borrow().len(), 2);
}

#[test]
fn test_hub_floods_but_nics_filter() {
    let mut sim = Simulation::new();
    let hub = RepeaterHub::new("hub0", 3);
    let a = host(1, ip(192, 168, 1, 10));
    let b = host(2, ip(192, 168, 1, 20));
    let c = host(3, ip(192, 168, 1, 30));
    let _c1 = Cable::connect(a.nic.port(), hub.port(0).unwrap(), 1);
    let _c2 = Cable::connect(b.nic.port(), hub.port(1).unwrap(), 1);
    let _c3 = Cable::connect(c.nic.port(), hub.port(2).unwrap(), 1);

    a.stack
        .send_packet(
            ip(192, 168, 1, 20),
            IpProtocol::Udp,
            IpPayload::Text("for b only".into()),
            None,
            &mut sim,
        )
        .unwrap();
    sim.run();

    // the hub copied everything everywhere, but only b delivered
    assert_eq!(b.transport.packets.borrow().len(), 1);
    assert!(c.transport.packets.borrow().is_empty());
    assert!(
        sim.count_events(|e| matches!(e, TraceEvent::HubFlooded { .. })) >= 2,
        "request and data frame must both flood"
    );
}

#[test]
fn test_switch_converges_to_unicast() {
    let mut sim = Simulation::new();
    let switch = L2Switch::new("sw0", 3);
    let a = host(1, ip(192, 168, 1, 10));
    let b = host(2, ip(192, 168, 1, 20));
    let c = host(3, ip(192, 168, 1, 30));
    let _c1 = Cable::connect(a.nic.port(), switch.port(0).unwrap(), 1);
    let _c2 = Cable::connect(b.nic.port(), switch.port(1).unwrap(), 1);
    let _c3 = Cable::connect(c.nic.port(), switch.port(2).unwrap(), 1);

    a.stack
        .send_packet(
            ip(192, 168, 1, 20),
            IpProtocol::Udp,
            IpPayload::Text("warmup".into()),
            None,
            &mut sim,
        )
        .unwrap();
    sim.run();

    assert_eq!(b.transport.packets.borrow().len(), 1);
    assert_eq!(switch.learned_port(a.nic.mac()), Some(0));
    assert_eq!(switch.learned_port(b.nic.mac()), Some(1));

    // both endpoints are learned now, so the next packet never floods
    sim.clear_events();
    a.stack
        .send_packet(
            ip(192, 168, 1, 20),
            IpProtocol::Udp,
            IpPayload::Text("quiet".into()),
            None,
            &mut sim,
        )
        .unwrap();
    sim.run();

    use tcpip_sim_core::sim::SwitchDecision;
    assert_eq!(
        sim.count_events(|e| matches!(
            e,
            TraceEvent::SwitchForwarded {
                decision: SwitchDecision::Flooded { .. },
                ..
            }
        )),
        0
    );
    assert_eq!(b.transport.packets.borrow().len(), 2);
}

#[test]
fn test_arp_gives_up_after_three_attempts() {
    let mut sim = Simulation::new();
    let a = host(1, ip(192, 168, 1, 10));
    let b = host(2, ip(192, 168, 1, 20));
    let _cable = Cable::connect(a.nic.port(), b.nic.port(), 1);

    // .99 does not exist, so the packet is eventually dropped
    a.stack
        .send_packet(
            ip(192, 168, 1, 99),
            IpProtocol::Udp,
            IpPayload::Text("void".into()),
            None,
            &mut sim,
        )
        .unwrap();
    sim.run();

    assert_eq!(
        sim.count_events(|e| matches!(e, TraceEvent::ArpRequestSent { .. })),
        3
    );
    assert_eq!(
        sim.count_events(|e| matches!(e, TraceEvent::ArpFailed { attempts: 3, .. })),
        1
    );
    assert_eq!(sim.now(), 9_000, "failure lands on the third timeout");
}

/// Two subnets joined by a forwarding stack with two interfaces.
///
/// a (192.168.1.10) --- router (.1 / 10.0.0.1) --- b (10.0.0.20)
#[test]
fn test_router_forwards_between_subnets() {
    let mut sim = Simulation::new();

    let a = host(1, ip(192, 168, 1, 10));
    let b = host(2, ip(10, 0, 0, 20));

    let r_left = NetworkInterface::new(mac(0xA1), "r-left");
    let r_right = NetworkInterface::new(mac(0xA2), "r-right");
    let router = IpStack::with_forwarding(true);
    router.add_interface("eth0", Rc::clone(&r_left), ip(192, 168, 1, 1), mask24());
    router.add_interface("eth1", Rc::clone(&r_right), ip(10, 0, 0, 1), mask24());

    let _c1 = Cable::connect(a.nic.port(), r_left.port(), 1);
    let _c2 = Cable::connect(b.nic.port(), r_right.port(), 1);

    a.stack.set_default_gateway(ip(192, 168, 1, 1), "eth0").unwrap();
    b.stack.set_default_gateway(ip(10, 0, 0, 1), "eth0").unwrap();

    a.stack
        .send_packet(
            ip(10, 0, 0, 20),
            IpProtocol::Udp,
            IpPayload::Text("across".into()),
            None,
            &mut sim,
        )
        .unwrap();
    sim.run();

    let delivered = b.transport.packets.borrow();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].header.source, ip(192, 168, 1, 10));
    assert_eq!(delivered[0].header.ttl, DEFAULT_TTL - 1, "one hop, one decrement");
    assert_eq!(
        sim.count_events(|e| matches!(e, TraceEvent::PacketForwarded { via, .. } if via == "eth1")),
        1
    );
}

#[test]
fn test_router_drops_expired_ttl() {
    let mut sim = Simulation::new();

    let a = host(1, ip(192, 168, 1, 10));
    let b = host(2, ip(10, 0, 0, 20));

    let r_left = NetworkInterface::new(mac(0xA1), "r-left");
    let r_right = NetworkInterface::new(mac(0xA2), "r-right");
    let router = IpStack::with_forwarding(true);
    router.add_interface("eth0", Rc::clone(&r_left), ip(192, 168, 1, 1), mask24());
    router.add_interface("eth1", Rc::clone(&r_right), ip(10, 0, 0, 1), mask24());

    let _c1 = Cable::connect(a.nic.port(), r_left.port(), 1);
    let _c2 = Cable::connect(b.nic.port(), r_right.port(), 1);

    // hand-build a packet already at the end of its hop budget and launch
    // it straight at the router's MAC-facing interface
    let doomed = IpPacket::new(
        ip(192, 168, 1, 10),
        ip(10, 0, 0, 20),
        IpProtocol::Udp,
        IpPayload::Text("tired".into()),
    )
    .with_ttl(1);

    a.nic
        .send_to_ip(
            ip(192, 168, 1, 1),
            EtherType::Ipv4,
            FramePayload::Ipv4(doomed),
            &mut sim,
        )
        .unwrap();
    sim.run();

    assert!(b.transport.packets.borrow().is_empty());
    use tcpip_sim_core::sim::DropReason;
    assert_eq!(
        sim.count_events(|e| matches!(
            e,
            TraceEvent::PacketDropped {
                reason: DropReason::TtlExceeded,
            }
        )),
        1
    );
}

#[test]
fn test_trace_log_is_ordered_by_time() {
    let mut sim = Simulation::new();
    let a = host(1, ip(192, 168, 1, 10));
    let b = host(2, ip(192, 168, 1, 20));
    let _cable = Cable::connect(a.nic.port(), b.nic.port(), 3);

    a.stack
        .send_packet(
            ip(192, 168, 1, 20),
            IpProtocol::Udp,
            IpPayload::Text("tick".into()),
            None,
            &mut sim,
        )
        .unwrap();
    sim.run();

    let times: Vec<u64> = sim.events().iter().map(|r| r.at).collect();
    let mut sorted = times.clone();
    sorted.sort_unstable();
    assert_eq!(times, sorted);
    assert!(sim.stats().events_executed > 0);
}
