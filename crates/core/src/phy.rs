//! Physical layer: signals, ports, cables, and the repeater hub.
//!
//! A [`Port`] is a device's attachment point. A [`Cable`] joins exactly two
//! ports and delivers a [`Signal`] to the far end after its propagation
//! latency, via the simulation scheduler. Devices register themselves on
//! their ports as an [`UpstreamReceiver`] so an arriving signal climbs back
//! up into the owning device.
//!
//! Per-direction ordering over a cable is first-in first-out: the scheduler
//! breaks same-instant ties by insertion order, and every transmission on a
//! given cable uses the same fixed latency.

use crate::ethernet::EthernetFrame;
use crate::sim::{DropReason, Simulation, TraceEvent};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Default cable propagation delay in virtual milliseconds.
pub const DEFAULT_LATENCY_MS: u64 = 1;

/// What actually travels over a cable: a frame plus line-condition state.
#[derive(Debug, Clone)]
pub struct Signal {
    /// The frame being carried
    pub payload: EthernetFrame,

    /// Set when the line mangled the signal in transit
    pub is_corrupted: bool,
}

impl Signal {
    /// Wrap a frame in a clean signal.
    pub fn new(payload: EthernetFrame) -> Self {
        Self {
            payload,
            is_corrupted: false,
        }
    }
}

/// Implemented by any device that owns ports and consumes arriving signals.
pub trait UpstreamReceiver {
    /// Called when a signal arrives on `ingress`, one of the device's ports.
    fn on_signal(&self, signal: Signal, ingress: &Rc<Port>, sim: &mut Simulation);
}

/// A single attachment point on a device.
///
/// Holds weak references both downward (to the cable, if attached) and
/// upward (to the owning device), so ports never keep either side alive.
pub struct Port {
    id: String,
    cable: RefCell<Option<Weak<Cable>>>,
    receiver: RefCell<Option<Weak<dyn UpstreamReceiver>>>,
}

impl Port {
    /// Create an unattached port.
    pub fn new(id: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            id: id.into(),
            cable: RefCell::new(None),
            receiver: RefCell::new(None),
        })
    }

    /// The port's identifier, used in traces and switch decisions.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Register the owning device. Called by device constructors.
    pub(crate) fn bind_receiver(&self, receiver: Weak<dyn UpstreamReceiver>) {
        *self.receiver.borrow_mut() = Some(receiver);
    }

    pub(crate) fn attach_cable(&self, cable: Weak<Cable>) {
        *self.cable.borrow_mut() = Some(cable);
    }

    /// Whether a live cable is plugged in.
    pub fn is_attached(&self) -> bool {
        self.cable
            .borrow()
            .as_ref()
            .map_or(false, |c| c.upgrade().is_some())
    }

    /// Transmit a signal out of this port.
    ///
    /// With no cable attached the signal is dropped and traced; real hardware
    /// would light no carrier at all.
    pub fn send(self: &Rc<Self>, signal: Signal, sim: &mut Simulation) {
        let cable = self.cable.borrow().as_ref().and_then(Weak::upgrade);
        match cable {
            Some(cable) => cable.transmit(self, signal, sim),
            None => sim.trace(TraceEvent::SignalDropped {
                port: self.id.clone(),
                reason: DropReason::NoCableAttached,
            }),
        }
    }

    /// Deliver an arriving signal up into the owning device.
    pub fn receive(self: &Rc<Self>, signal: Signal, sim: &mut Simulation) {
        let receiver = self.receiver.borrow().as_ref().and_then(Weak::upgrade);
        if let Some(receiver) = receiver {
            receiver.on_signal(signal, self, sim);
        }
    }
}

/// A point-to-point link between two ports with fixed propagation latency.
pub struct Cable {
    port_a: Rc<Port>,
    port_b: Rc<Port>,
    latency_ms: u64,
}

impl Cable {
    /// Join two ports and return the cable keeping the link alive.
    ///
    /// The cable owns strong references to both ports; the ports hold weak
    /// references back, so dropping the cable severs the link.
    pub fn connect(port_a: Rc<Port>, port_b: Rc<Port>, latency_ms: u64) -> Rc<Self> {
        let cable = Rc::new(Self {
            port_a,
            port_b,
            latency_ms,
        });
        cable.port_a.attach_cable(Rc::downgrade(&cable));
        cable.port_b.attach_cable(Rc::downgrade(&cable));
        cable
    }

    /// Propagation delay in virtual milliseconds.
    pub fn latency_ms(&self) -> u64 {
        self.latency_ms
    }

    /// Carry a signal from `from` to the opposite end after the latency.
    fn transmit(&self, from: &Rc<Port>, signal: Signal, sim: &mut Simulation) {
        let peer = if Rc::ptr_eq(from, &self.port_a) {
            Rc::clone(&self.port_b)
        } else {
            Rc::clone(&self.port_a)
        };
        sim.schedule_in(self.latency_ms, move |sim| peer.receive(signal, sim));
    }
}

/// A layer-1 repeater: every signal arriving on one port is copied out of
/// all the others, with no addressing or learning.
pub struct RepeaterHub {
    name: String,
    ports: Vec<Rc<Port>>,
}

impl RepeaterHub {
    /// Build a hub with `port_count` ports named `{name}-port{i}`.
    pub fn new(name: impl Into<String>, port_count: usize) -> Rc<Self> {
        let name = name.into();
        Rc::new_cyclic(|weak: &Weak<Self>| {
            let ports: Vec<Rc<Port>> = (0..port_count)
                .map(|i| {
                    let port = Port::new(format!("{name}-port{i}"));
                    port.bind_receiver(weak.clone() as Weak<dyn UpstreamReceiver>);
                    port
                })
                .collect();
            Self { name, ports }
        })
    }

    /// The hub's name as used in traces.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Borrow a port for cabling. `None` if `index` is out of range.
    pub fn port(&self, index: usize) -> Option<Rc<Port>> {
        self.ports.get(index).cloned()
    }

    /// All ports, in index order.
    pub fn ports(&self) -> &[Rc<Port>] {
        &self.ports
    }

    /// Number of ports.
    pub fn port_count(&self) -> usize {
        self.ports.len()
    }
}

impl UpstreamReceiver for RepeaterHub {
    fn on_signal(&self, signal: Signal, ingress: &Rc<Port>, sim: &mut Simulation) {
        let mut egress_count = 0;
        for port in &self.ports {
            if Rc::ptr_eq(port, ingress) {
                continue;
            }
            port.send(signal.clone(), sim);
            egress_count += 1;
        }
        sim.trace(TraceEvent::HubFlooded {
            hub: self.name.clone(),
            ingress: ingress.id().to_string(),
            egress_count,
        });
    }
}
