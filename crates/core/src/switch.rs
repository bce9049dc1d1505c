//! Transparent learning switch.
//!
//! The switch reads source addresses to populate its MAC table and forwards
//! on destination addresses: broadcast floods, a known destination goes out
//! its learned port, a destination learned on the ingress port is filtered,
//! and an unknown destination floods like a hub. Learning always overwrites,
//! so a station moving between ports is picked up on its next transmission.

use crate::addr::MacAddress;
use crate::phy::{Port, Signal, UpstreamReceiver};
use crate::sim::{Simulation, SwitchDecision, TraceEvent};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// A multi-port layer-2 switch.
pub struct L2Switch {
    name: String,
    ports: Vec<Rc<Port>>,
    mac_table: RefCell<HashMap<MacAddress, usize>>,
}

impl L2Switch {
    /// Build a switch with `port_count` ports named `{name}-port{i}`.
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
            Self {
                name,
                ports,
                mac_table: RefCell::new(HashMap::new()),
            }
        })
    }

    /// The switch's name as used in traces.
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

    /// The port index a MAC was last learned on, if any.
    pub fn learned_port(&self, mac: MacAddress) -> Option<usize> {
        self.mac_table.borrow().get(&mac).copied()
    }

    /// Number of learned addresses.
    pub fn mac_table_len(&self) -> usize {
        self.mac_table.borrow().len()
    }

    /// Forget everything learned so far.
    pub fn flush_mac_table(&self) {
        self.mac_table.borrow_mut().clear();
    }

    fn learn(&self, source: MacAddress, ingress_idx: usize, sim: &mut Simulation) {
        // broadcast can never be a legitimate source
        if source.is_broadcast() {
            return;
        }
        let previous = self.mac_table.borrow_mut().insert(source, ingress_idx);
        match previous {
            None => sim.trace(TraceEvent::SwitchLearned {
                switch: self.name.clone(),
                mac: source,
                port: self.ports[ingress_idx].id().to_string(),
            }),
            Some(old_idx) if old_idx != ingress_idx => sim.trace(TraceEvent::SwitchMoved {
                switch: self.name.clone(),
                mac: source,
                from: self.ports[old_idx].id().to_string(),
                to: self.ports[ingress_idx].id().to_string(),
            }),
            Some(_) => {}
        }
    }

    fn flood(&self, signal: &Signal, ingress_idx: usize, sim: &mut Simulation) -> usize {
        let mut egress_count = 0;
        for (idx, port) in self.ports.iter().enumerate() {
            if idx == ingress_idx {
                continue;
            }
            port.send(signal.clone(), sim);
            egress_count += 1;
        }
        egress_count
    }
}

impl UpstreamReceiver for L2Switch {
    fn on_signal(&self, signal: Signal, ingress: &Rc<Port>, sim: &mut Simulation) {
        let Some(ingress_idx) = self.ports.iter().position(|p| Rc::ptr_eq(p, ingress)) else {
            return;
        };

        self.learn(signal.payload.source, ingress_idx, sim);

        let destination = signal.payload.destination;
        let decision = if destination.is_broadcast() {
            let egress_count = self.flood(&signal, ingress_idx, sim);
            SwitchDecision::Flooded { egress_count }
        } else {
            match self.mac_table.borrow().get(&destination).copied() {
                Some(idx) if idx == ingress_idx => SwitchDecision::Filtered,
                Some(idx) => {
                    self.ports[idx].send(signal.clone(), sim);
                    SwitchDecision::Unicast {
                        port: self.ports[idx].id().to_string(),
                    }
                }
                None => {
                    let egress_count = self.flood(&signal, ingress_idx, sim);
                    SwitchDecision::Flooded { egress_count }
                }
            }
        };

        sim.trace(TraceEvent::SwitchForwarded {
            switch: self.name.clone(),
            destination,
            decision,
        });
    }
}
