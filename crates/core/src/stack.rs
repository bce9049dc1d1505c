//! The host-side IPv4 stack: interfaces, routing, local delivery, and
//! optional forwarding between subnets.
//!
//! An [`IpStack`] binds itself as the upper layer of every interface added
//! to it. Inbound IPv4 packets destined for one of the stack's own
//! addresses are delivered to the transport layer; anything else is either
//! forwarded (when forwarding is enabled, after the TTL check) or dropped.
//! Outbound, [`IpStack::send_packet`] consults the routing table and hands
//! the packet to the chosen interface, which resolves the next hop by ARP.

use crate::addr::{is_same_network, MacAddress, SubnetMask};
use crate::error::{Error, Result, RoutingError};
use crate::ethernet::{EtherType, FramePayload};
use crate::ip::{IpPacket, IpPayload, IpProtocol};
use crate::nic::{NetworkInterface, NetworkLayer};
use crate::route::{RouteMatch, RoutingTable};
use crate::sim::{DropReason, Simulation, TraceEvent};
use std::cell::RefCell;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::rc::{Rc, Weak};

/// Implemented by whatever consumes locally delivered packets.
pub trait TransportLayer {
    /// Called once per packet addressed to one of the stack's interfaces.
    fn on_receive(&self, packet: &IpPacket, sim: &mut Simulation);
}

/// Observer invoked on every inbound IPv4 packet before any routing
/// decision, local or not.
pub type PacketInspector = Box<dyn Fn(&IpPacket)>;

/// An interface as the stack sees it.
#[derive(Clone)]
pub struct InterfaceConfig {
    /// Stack-local identifier, used in routes and traces
    pub id: String,

    /// The interface itself
    pub nic: Rc<NetworkInterface>,

    /// Configured address
    pub ip: Ipv4Addr,

    /// Configured mask
    pub mask: SubnetMask,
}

/// The stack.
pub struct IpStack {
    interfaces: RefCell<HashMap<String, InterfaceConfig>>,
    routing: RefCell<RoutingTable>,
    forwarding: bool,
    transport: RefCell<Option<Weak<dyn TransportLayer>>>,
    inspector: RefCell<Option<PacketInspector>>,
}

impl IpStack {
    /// A host stack: local delivery only, transit packets are dropped.
    pub fn new() -> Rc<Self> {
        Self::with_forwarding(false)
    }

    /// A stack with forwarding chosen explicitly; `true` builds a router.
    pub fn with_forwarding(forwarding: bool) -> Rc<Self> {
        Rc::new(Self {
            interfaces: RefCell::new(HashMap::new()),
            routing: RefCell::new(RoutingTable::new()),
            forwarding,
            transport: RefCell::new(None),
            inspector: RefCell::new(None),
        })
    }

    /// Whether this stack forwards transit packets.
    pub fn is_forwarding(&self) -> bool {
        self.forwarding
    }

    /// Attach an interface under `id`, configure its address, bind the
    /// stack as its upper layer, and install the connected route.
    pub fn add_interface(
        self: &Rc<Self>,
        id: impl Into<String>,
        nic: Rc<NetworkInterface>,
        ip: Ipv4Addr,
        mask: SubnetMask,
    ) {
        let id = id.into();
        nic.set_ip_address(ip);
        nic.bind_upper_layer(Rc::downgrade(self) as Weak<dyn NetworkLayer>);
        self.routing
            .borrow_mut()
            .add_connected_route(ip, mask, id.clone());
        self.interfaces.borrow_mut().insert(
            id.clone(),
            InterfaceConfig { id, nic, ip, mask },
        );
    }

    /// Look up an attached interface.
    pub fn interface(&self, id: &str) -> Option<InterfaceConfig> {
        self.interfaces.borrow().get(id).cloned()
    }

    /// Route every otherwise-unmatched destination through `gateway`, out
    /// of the named interface.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::UnknownInterface`] for an id the stack does
    /// not know and [`RoutingError::NoRouteToHost`] if the gateway is not
    /// on that interface's subnet.
    pub fn set_default_gateway(&self, gateway: Ipv4Addr, interface_id: &str) -> Result<()> {
        let via = self.interface(interface_id).ok_or_else(|| {
            Error::Routing(RoutingError::UnknownInterface(interface_id.to_string()))
        })?;
        if !is_same_network(via.ip, gateway, via.mask) {
            return Err(Error::Routing(RoutingError::NoRouteToHost(gateway)));
        }
        self.routing
            .borrow_mut()
            .set_default_gateway(gateway, via.id);
        Ok(())
    }

    /// Install a static route out of a named interface.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::UnknownInterface`] for an id the stack does
    /// not know.
    pub fn add_static_route(
        &self,
        destination: Ipv4Addr,
        mask: SubnetMask,
        next_hop: Ipv4Addr,
        interface_id: &str,
        metric: Option<u32>,
    ) -> Result<()> {
        if !self.interfaces.borrow().contains_key(interface_id) {
            return Err(Error::Routing(RoutingError::UnknownInterface(
                interface_id.to_string(),
            )));
        }
        self.routing
            .borrow_mut()
            .add_static_route(destination, mask, next_hop, interface_id, metric);
        Ok(())
    }

    /// Direct access to the routing table, for display and assertions.
    pub fn routing_table(&self) -> &RefCell<RoutingTable> {
        &self.routing
    }

    /// Attach the transport layer. Held weakly.
    pub fn set_transport_layer(&self, transport: Weak<dyn TransportLayer>) {
        *self.transport.borrow_mut() = Some(transport);
    }

    /// Install an observer for every inbound IPv4 packet.
    pub fn set_packet_inspector(&self, inspector: PacketInspector) {
        *self.inspector.borrow_mut() = Some(inspector);
    }

    /// Whether `ip` is one of this stack's own addresses.
    pub fn is_local_address(&self, ip: Ipv4Addr) -> bool {
        self.interfaces.borrow().values().any(|cfg| cfg.ip == ip)
    }

    /// Originate a packet.
    ///
    /// The routing table picks the egress interface and next hop; the
    /// source address defaults to the egress interface's own address.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::NoRouteToHost`] when nothing matches the
    /// destination and [`RoutingError::UnknownInterface`] when the winning
    /// route names an interface the stack no longer has.
    pub fn send_packet(
        &self,
        destination: Ipv4Addr,
        protocol: IpProtocol,
        payload: IpPayload,
        source: Option<Ipv4Addr>,
        sim: &mut Simulation,
    ) -> Result<()> {
        let route = self
            .routing
            .borrow()
            .lookup(destination)
            .ok_or(Error::Routing(RoutingError::NoRouteToHost(destination)))?;
        let iface = self.interface(&route.entry.interface_id).ok_or_else(|| {
            Error::Routing(RoutingError::UnknownInterface(
                route.entry.interface_id.clone(),
            ))
        })?;

        let source = source.unwrap_or(iface.ip);
        let packet = IpPacket::new(source, destination, protocol, payload);
        sim.trace(TraceEvent::PacketSent {
            source,
            destination,
        });
        self.transmit(&iface, &route, packet, sim)
    }

    fn transmit(
        &self,
        iface: &InterfaceConfig,
        route: &RouteMatch,
        packet: IpPacket,
        sim: &mut Simulation,
    ) -> Result<()> {
        iface.nic.send_to_ip(
            route.forward_to,
            EtherType::Ipv4,
            FramePayload::Ipv4(packet),
            sim,
        )
    }

    fn deliver_locally(&self, packet: &IpPacket, sim: &mut Simulation) {
        let transport = self.transport.borrow().as_ref().and_then(Weak::upgrade);
        match transport {
            Some(transport) => {
                sim.trace(TraceEvent::PacketDelivered {
                    destination: packet.header.destination,
                    protocol: packet.header.protocol.as_u8(),
                });
                transport.on_receive(packet, sim);
            }
            None => sim.trace(TraceEvent::PacketDropped {
                reason: DropReason::NoTransportLayer,
            }),
        }
    }

    fn forward(&self, packet: &IpPacket, sim: &mut Simulation) {
        if packet.header.ttl <= 1 {
            sim.trace(TraceEvent::PacketDropped {
                reason: DropReason::TtlExceeded,
            });
            return;
        }
        let packet = packet.decrement_ttl();

        let Some(route) = self.routing.borrow().lookup(packet.header.destination) else {
            sim.trace(TraceEvent::PacketDropped {
                reason: DropReason::NoRoute,
            });
            return;
        };
        let Some(iface) = self.interface(&route.entry.interface_id) else {
            sim.trace(TraceEvent::PacketDropped {
                reason: DropReason::UnknownInterface,
            });
            return;
        };

        sim.trace(TraceEvent::PacketForwarded {
            destination: packet.header.destination,
            ttl: packet.header.ttl,
            via: iface.id.clone(),
        });
        if self.transmit(&iface, &route, packet, sim).is_err() {
            sim.trace(TraceEvent::PacketDropped {
                reason: DropReason::NoArpHandler,
            });
        }
    }
}

impl NetworkLayer for IpStack {
    fn receive(
        &self,
        payload: FramePayload,
        ether_type: EtherType,
        _source_mac: MacAddress,
        sim: &mut Simulation,
    ) {
        if ether_type != EtherType::Ipv4 {
            sim.trace(TraceEvent::PacketDropped {
                reason: DropReason::NonIpv4EtherType,
            });
            return;
        }
        let FramePayload::Ipv4(packet) = payload else {
            sim.trace(TraceEvent::PacketDropped {
                reason: DropReason::MalformedPacket,
            });
            return;
        };
        if !packet.is_valid() {
            sim.trace(TraceEvent::PacketDropped {
                reason: DropReason::MalformedPacket,
            });
            return;
        }

        if let Some(inspector) = self.inspector.borrow().as_ref() {
            inspector(&packet);
        }

        if self.is_local_address(packet.header.destination) {
            self.deliver_locally(&packet, sim);
        } else if self.forwarding {
            self.forward(&packet, sim);
        } else {
            sim.trace(TraceEvent::PacketDropped {
                reason: DropReason::ForwardingDisabled,
            });
        }
    }
}
