//! The routing table: longest-prefix matching over static and connected
//! routes, with metrics breaking ties at equal prefix length.

use crate::addr::{network_address, SubnetMask};
use std::fmt;
use std::net::Ipv4Addr;

/// How a route entered the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// Derived from an interface's own subnet
    Connected,
    /// Explicitly configured
    Static,
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Static => write!(f, "static"),
        }
    }
}

/// Default metric for configured static routes.
pub const DEFAULT_STATIC_METRIC: u32 = 1;

/// Metric assigned to the default gateway route, so any explicit route with
/// a reasonable metric wins even at equal prefix length.
pub const DEFAULT_GATEWAY_METRIC: u32 = 1000;

/// One row of the routing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingEntry {
    /// Destination network (host bits zero)
    pub destination: Ipv4Addr,

    /// Destination mask
    pub mask: SubnetMask,

    /// Gateway to forward through; `None` means deliver on-link
    pub next_hop: Option<Ipv4Addr>,

    /// Identifier of the interface to send out of
    pub interface_id: String,

    /// Preference among routes of equal prefix length; lower wins
    pub metric: u32,

    /// Provenance
    pub kind: RouteKind,
}

impl RoutingEntry {
    /// Prefix length of this route's destination.
    pub fn prefix_len(&self) -> u8 {
        self.mask.prefix_len()
    }

    /// Whether `ip` falls inside this route's destination network.
    pub fn matches(&self, ip: Ipv4Addr) -> bool {
        network_address(ip, self.mask) == self.destination
    }
}

/// Outcome of a successful lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// The winning entry
    pub entry: RoutingEntry,

    /// Address to resolve at layer 2: the gateway if the route has one,
    /// otherwise the destination itself
    pub forward_to: Ipv4Addr,
}

/// The table itself.
#[derive(Debug, Default)]
pub struct RoutingTable {
    entries: Vec<RoutingEntry>,
}

impl RoutingTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a route. A route to the same destination and mask replaces
    /// the existing entry.
    pub fn add_route(&mut self, mut entry: RoutingEntry) {
        entry.destination = network_address(entry.destination, entry.mask);
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|e| e.destination == entry.destination && e.mask == entry.mask)
        {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }

    /// Install the connected route for an interface's subnet, metric 0.
    pub fn add_connected_route(
        &mut self,
        ip: Ipv4Addr,
        mask: SubnetMask,
        interface_id: impl Into<String>,
    ) {
        self.add_route(RoutingEntry {
            destination: network_address(ip, mask),
            mask,
            next_hop: None,
            interface_id: interface_id.into(),
            metric: 0,
            kind: RouteKind::Connected,
        });
    }

    /// Install a static route through a gateway.
    pub fn add_static_route(
        &mut self,
        destination: Ipv4Addr,
        mask: SubnetMask,
        next_hop: Ipv4Addr,
        interface_id: impl Into<String>,
        metric: Option<u32>,
    ) {
        self.add_route(RoutingEntry {
            destination,
            mask,
            next_hop: Some(next_hop),
            interface_id: interface_id.into(),
            metric: metric.unwrap_or(DEFAULT_STATIC_METRIC),
            kind: RouteKind::Static,
        });
    }

    /// Install or replace the default route (0.0.0.0/0) through a gateway.
    pub fn set_default_gateway(&mut self, gateway: Ipv4Addr, interface_id: impl Into<String>) {
        self.add_route(RoutingEntry {
            destination: Ipv4Addr::UNSPECIFIED,
            mask: SubnetMask::ANY,
            next_hop: Some(gateway),
            interface_id: interface_id.into(),
            metric: DEFAULT_GATEWAY_METRIC,
            kind: RouteKind::Static,
        });
    }

    /// Remove the route for an exact destination and mask.
    pub fn remove_route(&mut self, destination: Ipv4Addr, mask: SubnetMask) -> bool {
        let normalized = network_address(destination, mask);
        let before = self.entries.len();
        self.entries
            .retain(|e| !(e.destination == normalized && e.mask == mask));
        self.entries.len() != before
    }

    /// Drop all routes.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Find the best route for a destination: longest prefix first, lowest
    /// metric among equal prefixes.
    pub fn lookup(&self, destination: Ipv4Addr) -> Option<RouteMatch> {
        let entry = self
            .entries
            .iter()
            .filter(|e| e.matches(destination))
            .min_by_key(|e| (std::cmp::Reverse(e.prefix_len()), e.metric))
            .cloned()?;
        let forward_to = entry.next_hop.unwrap_or(destination);
        Some(RouteMatch { entry, forward_to })
    }

    /// Whether the destination is reachable on-link (a connected route with
    /// no gateway matches it).
    pub fn is_directly_connected(&self, destination: Ipv4Addr) -> bool {
        self.entries
            .iter()
            .any(|e| e.kind == RouteKind::Connected && e.matches(destination))
    }

    /// All entries, most specific first.
    pub fn entries(&self) -> Vec<RoutingEntry> {
        let mut entries = self.entries.clone();
        entries.sort_by_key(|e| (std::cmp::Reverse(e.prefix_len()), e.metric));
        entries
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no routes are installed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<18} {:<15} {:>6} {:>5} {}", "destination", "next hop", "metric", "if", "kind")?;
        for entry in self.entries() {
            let next_hop = entry
                .next_hop
                .map_or_else(|| "on-link".to_string(), |g| g.to_string());
            writeln!(
                f,
                "{:<18} {:<15} {:>6} {:>5} {}",
                format!("{}/{}", entry.destination, entry.prefix_len()),
                next_hop,
                entry.metric,
                entry.interface_id,
                entry.kind
            )?;
        }
        Ok(())
    }
}
