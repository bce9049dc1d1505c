//! The network interface card: the boundary between layer 2 and layer 3.
//!
//! A [`NetworkInterface`] owns one [`Port`], filters inbound frames by
//! destination address, dispatches ARP traffic to its [`ArpHandler`], and
//! hands everything else to the bound upper layer. Outbound, it stamps the
//! source address and, for IP-addressed sends, resolves the next hop first.

use crate::addr::MacAddress;
use crate::arp::{ArpHandler, ArpHandlerConfig, ResolveCallback};
use crate::error::{ArpError, Error, Result};
use crate::ethernet::{EtherType, EthernetFrame, FramePayload};
use crate::phy::{Port, Signal, UpstreamReceiver};
use crate::sim::{DropReason, Simulation, TraceEvent};
use std::cell::{Cell, RefCell};
use std::net::Ipv4Addr;
use std::rc::{Rc, Weak};

/// Implemented by whatever sits above the interface (normally an IP stack).
pub trait NetworkLayer {
    /// Called with the payload of every frame the interface accepts that is
    /// not ARP.
    fn receive(
        &self,
        payload: FramePayload,
        ether_type: EtherType,
        source_mac: MacAddress,
        sim: &mut Simulation,
    );
}

/// A simulated NIC.
pub struct NetworkInterface {
    mac: MacAddress,
    port: Rc<Port>,
    upper_layer: RefCell<Option<Weak<dyn NetworkLayer>>>,
    promiscuous: Cell<bool>,
    arp: RefCell<Option<Rc<ArpHandler>>>,
}

impl NetworkInterface {
    /// Create an interface with the given hardware address. The port is
    /// named `{port_id}` and wired back to the interface.
    pub fn new(mac: MacAddress, port_id: impl Into<String>) -> Rc<Self> {
        Rc::new_cyclic(|weak: &Weak<Self>| {
            let port = Port::new(port_id);
            port.bind_receiver(weak.clone() as Weak<dyn UpstreamReceiver>);
            Self {
                mac,
                port,
                upper_layer: RefCell::new(None),
                promiscuous: Cell::new(false),
                arp: RefCell::new(None),
            }
        })
    }

    /// The interface's hardware address.
    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    /// The interface's port, for cabling.
    pub fn port(&self) -> Rc<Port> {
        Rc::clone(&self.port)
    }

    /// Accept every frame regardless of destination address.
    pub fn set_promiscuous(&self, enabled: bool) {
        self.promiscuous.set(enabled);
    }

    /// Configure the interface's IPv4 address, creating or re-pointing the
    /// ARP handler.
    pub fn set_ip_address(self: &Rc<Self>, ip: Ipv4Addr) {
        let mut slot = self.arp.borrow_mut();
        match slot.as_ref() {
            Some(handler) => handler.set_ip(ip),
            None => {
                *slot = Some(ArpHandler::new(
                    Rc::downgrade(self),
                    ip,
                    ArpHandlerConfig::default(),
                ));
            }
        }
    }

    /// The ARP handler, once an address is configured.
    pub fn arp_handler(&self) -> Option<Rc<ArpHandler>> {
        self.arp.borrow().clone()
    }

    /// Attach the layer above. The interface holds it weakly.
    pub fn bind_upper_layer(&self, layer: Weak<dyn NetworkLayer>) {
        *self.upper_layer.borrow_mut() = Some(layer);
    }

    /// Resolve an IPv4 address to a hardware address via ARP.
    ///
    /// # Errors
    ///
    /// Returns [`ArpError::NotConfigured`] if no IP address has been set;
    /// resolution failures are reported through the callback.
    pub fn resolve_ip_to_mac(
        &self,
        target: Ipv4Addr,
        sim: &mut Simulation,
        callback: ResolveCallback,
    ) -> Result<()> {
        let handler = self
            .arp
            .borrow()
            .clone()
            .ok_or(Error::Arp(ArpError::NotConfigured))?;
        handler.resolve(target, sim, callback);
        Ok(())
    }

    /// Send a frame to a known hardware address. The source is always
    /// stamped with this interface's own address.
    pub fn send_frame(
        &self,
        destination: MacAddress,
        ether_type: EtherType,
        payload: FramePayload,
        sim: &mut Simulation,
    ) {
        sim.trace(TraceEvent::FrameSent {
            nic: self.mac,
            destination,
            ether_type,
        });
        let frame = EthernetFrame::new(destination, self.mac, ether_type, payload);
        self.port.send(Signal::new(frame), sim);
    }

    /// Send a frame to an IPv4 destination, resolving the hardware address
    /// first. The frame goes out as soon as resolution completes; on
    /// failure it is dropped and traced.
    ///
    /// # Errors
    ///
    /// Returns [`ArpError::NotConfigured`] if no IP address has been set.
    pub fn send_to_ip(
        self: &Rc<Self>,
        destination: Ipv4Addr,
        ether_type: EtherType,
        payload: FramePayload,
        sim: &mut Simulation,
    ) -> Result<()> {
        let weak = Rc::downgrade(self);
        self.resolve_ip_to_mac(
            destination,
            sim,
            Box::new(move |outcome, sim| {
                let Some(nic) = weak.upgrade() else {
                    return;
                };
                match outcome {
                    Ok(mac) => nic.send_frame(mac, ether_type, payload, sim),
                    Err(err) => {
                        tracing::warn!(destination = %destination, error = %err, "dropping frame");
                        sim.trace(TraceEvent::FrameDropped {
                            nic: nic.mac,
                            reason: DropReason::ArpResolutionFailed,
                        });
                    }
                }
            }),
        )
    }
}

impl UpstreamReceiver for NetworkInterface {
    fn on_signal(&self, signal: Signal, _ingress: &Rc<Port>, sim: &mut Simulation) {
        let frame = signal.payload;
        let for_us = frame.destination == self.mac || frame.is_broadcast();
        if !for_us && !self.promiscuous.get() {
            sim.trace(TraceEvent::FrameDropped {
                nic: self.mac,
                reason: DropReason::WrongDestination,
            });
            return;
        }
        sim.trace(TraceEvent::FrameAccepted {
            nic: self.mac,
            source: frame.source,
            ether_type: frame.ether_type,
        });

        if frame.ether_type == EtherType::Arp {
            let FramePayload::Arp(packet) = frame.payload else {
                sim.trace(TraceEvent::FrameDropped {
                    nic: self.mac,
                    reason: DropReason::MalformedPacket,
                });
                return;
            };
            let handler = self.arp.borrow().clone();
            match handler {
                Some(handler) => handler.handle_arp_packet(&packet, sim),
                None => sim.trace(TraceEvent::FrameDropped {
                    nic: self.mac,
                    reason: DropReason::NoArpHandler,
                }),
            }
            return;
        }

        let upper = self.upper_layer.borrow().as_ref().and_then(Weak::upgrade);
        match upper {
            Some(upper) => upper.receive(frame.payload, frame.ether_type, frame.source, sim),
            None => sim.trace(TraceEvent::FrameDropped {
                nic: self.mac,
                reason: DropReason::NoUpperLayer,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::Cable;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x02, 0, 0, 0, 0, last])
    }

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(192, 168, 1, last)
    }

    struct CaptureLayer {
        received: RefCell<Vec<(FramePayload, EtherType, MacAddress)>>,
    }

    impl CaptureLayer {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                received: RefCell::new(Vec::new()),
            })
        }
    }

    impl NetworkLayer for CaptureLayer {
        fn receive(
            &self,
            payload: FramePayload,
            ether_type: EtherType,
            source_mac: MacAddress,
            _sim: &mut Simulation,
        ) {
            self.received.borrow_mut().push((payload, ether_type, source_mac));
        }
    }

    fn linked_pair() -> (Rc<NetworkInterface>, Rc<NetworkInterface>, Rc<Cable>) {
        let a = NetworkInterface::new(mac(1), "eth-a");
        let b = NetworkInterface::new(mac(2), "eth-b");
        let cable = Cable::connect(a.port(), b.port(), 1);
        (a, b, cable)
    }

    #[test]
    fn test_unicast_reaches_upper_layer() {
        let mut sim = Simulation::new();
        let (a, b, _cable) = linked_pair();
        let capture = CaptureLayer::new();
        b.bind_upper_layer(Rc::downgrade(&capture) as Weak<dyn NetworkLayer>);

        a.send_frame(
            mac(2),
            EtherType::Other(0x88B5),
            FramePayload::Raw(vec![1, 2, 3]),
            &mut sim,
        );
        sim.run();

        let received = capture.received.borrow();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, FramePayload::Raw(vec![1, 2, 3]));
        assert_eq!(received[0].2, mac(1), "source must be the sender's address");
    }

    #[test]
    fn test_frame_for_other_mac_is_filtered() {
        let mut sim = Simulation::new();
        let (a, b, _cable) = linked_pair();
        let capture = CaptureLayer::new();
        b.bind_upper_layer(Rc::downgrade(&capture) as Weak<dyn NetworkLayer>);

        a.send_frame(
            mac(99),
            EtherType::Other(0x88B5),
            FramePayload::Raw(vec![]),
            &mut sim,
        );
        sim.run();

        assert!(capture.received.borrow().is_empty());
        assert_eq!(
            sim.count_events(|e| matches!(
                e,
                TraceEvent::FrameDropped {
                    reason: DropReason::WrongDestination,
                    ..
                }
            )),
            1
        );
    }

    #[test]
    fn test_promiscuous_mode_accepts_everything() {
        let mut sim = Simulation::new();
        let (a, b, _cable) = linked_pair();
        let capture = CaptureLayer::new();
        b.bind_upper_layer(Rc::downgrade(&capture) as Weak<dyn NetworkLayer>);
        b.set_promiscuous(true);

        a.send_frame(
            mac(99),
            EtherType::Other(0x88B5),
            FramePayload::Raw(vec![]),
            &mut sim,
        );
        sim.run();

        assert_eq!(capture.received.borrow().len(), 1);
    }

    #[test]
    fn test_broadcast_is_accepted() {
        let mut sim = Simulation::new();
        let (a, b, _cable) = linked_pair();
        let capture = CaptureLayer::new();
        b.bind_upper_layer(Rc::downgrade(&capture) as Weak<dyn NetworkLayer>);

        a.send_frame(
            MacAddress::BROADCAST,
            EtherType::Other(0x88B5),
            FramePayload::Raw(vec![7]),
            &mut sim,
        );
        sim.run();

        assert_eq!(capture.received.borrow().len(), 1);
    }

    #[test]
    fn test_resolve_without_ip_fails() {
        let mut sim = Simulation::new();
        let (a, _b, _cable) = linked_pair();
        let result = a.resolve_ip_to_mac(ip(2), &mut sim, Box::new(|_, _| {}));
        assert!(matches!(result, Err(Error::Arp(ArpError::NotConfigured))));
    }

    #[test]
    fn test_arp_round_trip_resolves() {
        let mut sim = Simulation::new();
        let (a, b, _cable) = linked_pair();
        a.set_ip_address(ip(10));
        b.set_ip_address(ip(20));

        let outcome = Rc::new(RefCell::new(None));
        let outcome_clone = Rc::clone(&outcome);
        a.resolve_ip_to_mac(
            ip(20),
            &mut sim,
            Box::new(move |result, _sim| {
                *outcome_clone.borrow_mut() = Some(result);
            }),
        )
        .unwrap();
        sim.run();

        assert_eq!(*outcome.borrow(), Some(Ok(mac(2))));
        assert_eq!(
            sim.count_events(|e| matches!(e, TraceEvent::ArpRequestSent { .. })),
            1,
            "one request must suffice on a direct link"
        );
        // the responder learned the requester's mapping opportunistically
        let handler = b.arp_handler().unwrap();
        let cached = handler.table().borrow_mut().lookup(ip(10), sim.now());
        assert_eq!(cached, Some(mac(1)));
    }

    #[test]
    fn test_arp_retries_then_fails_with_no_responder() {
        let mut sim = Simulation::new();
        let (a, b, _cable) = linked_pair();
        a.set_ip_address(ip(10));
        b.set_ip_address(ip(20));

        let outcome = Rc::new(RefCell::new(None));
        let outcome_clone = Rc::clone(&outcome);
        // nobody owns .99, so every request times out
        a.resolve_ip_to_mac(
            ip(99),
            &mut sim,
            Box::new(move |result, _sim| {
                *outcome_clone.borrow_mut() = Some(result);
            }),
        )
        .unwrap();
        sim.run();

        assert_eq!(
            *outcome.borrow(),
            Some(Err(ArpError::ResolutionFailed {
                target: ip(99),
                attempts: 3
            }))
        );
        assert_eq!(
            sim.count_events(|e| matches!(e, TraceEvent::ArpRequestSent { .. })),
            3,
            "exactly max_retries broadcasts"
        );
        assert_eq!(sim.now(), 3 * 3_000, "failure lands on the third timeout");
        assert_eq!(a.arp_handler().unwrap().pending_count(), 0);
    }

    #[test]
    fn test_concurrent_resolves_share_one_request() {
        let mut sim = Simulation::new();
        let (a, b, _cable) = linked_pair();
        a.set_ip_address(ip(10));
        b.set_ip_address(ip(20));

        let hits = Rc::new(Cell::new(0u32));
        for _ in 0..3 {
            let hits = Rc::clone(&hits);
            a.resolve_ip_to_mac(
                ip(20),
                &mut sim,
                Box::new(move |result, _sim| {
                    assert!(result.is_ok());
                    hits.set(hits.get() + 1);
                }),
            )
            .unwrap();
        }
        sim.run();

        assert_eq!(hits.get(), 3);
        assert_eq!(
            sim.count_events(|e| matches!(e, TraceEvent::ArpRequestSent { .. })),
            1,
            "waiters must coalesce onto one in-flight request"
        );
    }

    #[test]
    fn test_cleanup_rejects_waiters_and_clears_timers() {
        let mut sim = Simulation::new();
        let (a, b, _cable) = linked_pair();
        a.set_ip_address(ip(10));
        b.set_ip_address(ip(20));

        let outcome = Rc::new(RefCell::new(None));
        let outcome_clone = Rc::clone(&outcome);
        a.resolve_ip_to_mac(
            ip(99),
            &mut sim,
            Box::new(move |result, _sim| {
                *outcome_clone.borrow_mut() = Some(result);
            }),
        )
        .unwrap();

        let handler = a.arp_handler().unwrap();
        handler.cleanup(&mut sim);

        assert_eq!(*outcome.borrow(), Some(Err(ArpError::HandlerShutdown)));
        assert_eq!(handler.pending_count(), 0);
        sim.run();
        // the retransmit timer was cancelled, so no further requests fire
        assert_eq!(
            sim.count_events(|e| matches!(e, TraceEvent::ArpRequestSent { .. })),
            1
        );
        assert_eq!(sim.stats().events_cancelled, 1);
    }

    #[test]
    fn test_cached_resolve_sends_nothing() {
        let mut sim = Simulation::new();
        let (a, b, _cable) = linked_pair();
        a.set_ip_address(ip(10));
        b.set_ip_address(ip(20));

        a.resolve_ip_to_mac(ip(20), &mut sim, Box::new(|_, _| {})).unwrap();
        sim.run();
        sim.clear_events();

        let resolved = Rc::new(Cell::new(false));
        let resolved_clone = Rc::clone(&resolved);
        a.resolve_ip_to_mac(
            ip(20),
            &mut sim,
            Box::new(move |result, _sim| {
                assert_eq!(result, Ok(mac(2)));
                resolved_clone.set(true);
            }),
        )
        .unwrap();

        assert!(resolved.get(), "cache hit completes synchronously");
        assert_eq!(
            sim.count_events(|e| matches!(e, TraceEvent::ArpRequestSent { .. })),
            0
        );
        assert_eq!(
            sim.count_events(|e| matches!(e, TraceEvent::ArpCacheHit { .. })),
            1
        );
    }

    #[test]
    fn test_callback_may_resolve_again_on_cache_hit() {
        let mut sim = Simulation::new();
        let (a, b, _cable) = linked_pair();
        a.set_ip_address(ip(10));
        b.set_ip_address(ip(20));

        a.resolve_ip_to_mac(ip(20), &mut sim, Box::new(|_, _| {})).unwrap();
        sim.run();

        // a follow-up send resolving its own next hop from inside the
        // completion callback must not trip the handler's cache borrow
        let inner_hits = Rc::new(Cell::new(0u32));
        let inner_clone = Rc::clone(&inner_hits);
        let nic = Rc::clone(&a);
        a.resolve_ip_to_mac(
            ip(20),
            &mut sim,
            Box::new(move |result, sim| {
                assert_eq!(result, Ok(mac(2)));
                nic.resolve_ip_to_mac(
                    ip(20),
                    sim,
                    Box::new(move |inner, _sim| {
                        assert_eq!(inner, Ok(mac(2)));
                        inner_clone.set(inner_clone.get() + 1);
                    }),
                )
                .unwrap();
            }),
        )
        .unwrap();

        assert_eq!(inner_hits.get(), 1, "both resolves complete synchronously");
    }
}
