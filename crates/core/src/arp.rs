//! Address Resolution Protocol: packets, the neighbor cache, and the
//! per-interface resolution handler.
//!
//! [`ArpTable`] is a pure cache keyed by IPv4 address; all timestamps are
//! passed in as virtual times so the table itself never reads a clock.
//! [`ArpHandler`] drives resolution on top of it: a lookup miss broadcasts a
//! request, arms a retransmit timer, and retries up to a configured bound
//! before failing every waiter. Concurrent resolutions of the same address
//! coalesce onto one in-flight request.
//!
//! The handler also learns opportunistically: the sender mapping of every
//! inbound ARP packet is cached, request or reply, solicited or not.

use crate::addr::MacAddress;
use crate::error::ArpError;
use crate::ethernet::{EtherType, FramePayload};
use crate::nic::NetworkInterface;
use crate::sim::{SimTime, Simulation, TimerId, TraceEvent};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::rc::{Rc, Weak};

/// ARP operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpOperation {
    /// Who-has broadcast
    Request,
    /// Is-at unicast answer
    Reply,
}

/// A structured ARP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpPacket {
    /// Request or reply
    pub operation: ArpOperation,

    /// Hardware address of the sender
    pub sender_mac: MacAddress,

    /// Protocol address of the sender
    pub sender_ip: Ipv4Addr,

    /// Hardware address being asked about (unspecified in requests)
    pub target_mac: MacAddress,

    /// Protocol address being asked about
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// Build a who-has request.
    pub fn request(sender_mac: MacAddress, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self {
            operation: ArpOperation::Request,
            sender_mac,
            sender_ip,
            target_mac: MacAddress::UNSPECIFIED,
            target_ip,
        }
    }

    /// Build an is-at reply to `request`.
    pub fn reply(sender_mac: MacAddress, sender_ip: Ipv4Addr, request: &ArpPacket) -> Self {
        Self {
            operation: ArpOperation::Reply,
            sender_mac,
            sender_ip,
            target_mac: request.sender_mac,
            target_ip: request.sender_ip,
        }
    }
}

impl fmt::Display for ArpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operation {
            ArpOperation::Request => write!(
                f,
                "ARP request: who has {}? tell {}",
                self.target_ip, self.sender_ip
            ),
            ArpOperation::Reply => {
                write!(f, "ARP reply: {} is at {}", self.sender_ip, self.sender_mac)
            }
        }
    }
}

/// Lifecycle state of a neighbor cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpEntryState {
    /// Resolution in flight, no hardware address yet
    Incomplete,
    /// Recently confirmed mapping
    Reachable,
    /// Mapping aged past the freshness window, treated as a miss
    Stale,
}

/// One neighbor cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpEntry {
    /// The protocol address this entry maps
    pub ip: Ipv4Addr,

    /// The learned hardware address; `None` exactly while incomplete
    pub mac: Option<MacAddress>,

    /// Current lifecycle state
    pub state: ArpEntryState,

    /// Virtual time the entry first appeared
    pub created_at: SimTime,

    /// Virtual time of the most recent confirmation
    pub updated_at: SimTime,
}

/// Tunables for the neighbor cache.
#[derive(Debug, Clone, Copy)]
pub struct ArpTableConfig {
    /// Confirmed entries are discarded after this long without refresh
    pub timeout_ms: u64,

    /// Incomplete entries are discarded after this long
    pub incomplete_timeout_ms: u64,

    /// Confirmed entries older than this report stale on lookup
    pub stale_after_ms: u64,

    /// Hard capacity; at the limit the oldest entry is evicted
    pub max_entries: usize,
}

impl Default for ArpTableConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 300_000,
            incomplete_timeout_ms: 3_000,
            stale_after_ms: 30_000,
            max_entries: 512,
        }
    }
}

/// The neighbor cache. Pure data structure; callers supply the clock.
#[derive(Debug, Default)]
pub struct ArpTable {
    entries: HashMap<Ipv4Addr, ArpEntry>,
    config: ArpTableConfig,
}

impl ArpTable {
    /// Empty table with default tunables.
    pub fn new() -> Self {
        Self::with_config(ArpTableConfig::default())
    }

    /// Empty table with explicit tunables.
    pub fn with_config(config: ArpTableConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
        }
    }

    /// Look up a usable mapping.
    ///
    /// Returns the hardware address only for fresh confirmed entries.
    /// Expired entries are removed on the way; aged entries flip to
    /// [`ArpEntryState::Stale`] and report as a miss, which prompts the
    /// caller to re-resolve.
    pub fn lookup(&mut self, ip: Ipv4Addr, now: SimTime) -> Option<MacAddress> {
        let (state, age, mac) = {
            let entry = self.entries.get(&ip)?;
            (
                entry.state,
                now.saturating_sub(entry.updated_at),
                entry.mac,
            )
        };
        match state {
            ArpEntryState::Incomplete => {
                if age > self.config.incomplete_timeout_ms {
                    self.entries.remove(&ip);
                }
                None
            }
            ArpEntryState::Reachable | ArpEntryState::Stale => {
                if age > self.config.timeout_ms {
                    self.entries.remove(&ip);
                    None
                } else if age > self.config.stale_after_ms {
                    if let Some(entry) = self.entries.get_mut(&ip) {
                        entry.state = ArpEntryState::Stale;
                    }
                    None
                } else {
                    mac
                }
            }
        }
    }

    /// Inspect an entry without touching its state.
    pub fn entry(&self, ip: Ipv4Addr) -> Option<&ArpEntry> {
        self.entries.get(&ip)
    }

    /// Record a confirmed mapping, evicting the oldest entry at capacity.
    pub fn update(&mut self, ip: Ipv4Addr, mac: MacAddress, now: SimTime) {
        if !self.entries.contains_key(&ip) && self.entries.len() >= self.config.max_entries {
            self.evict_oldest();
        }
        let created_at = self.entries.get(&ip).map_or(now, |e| e.created_at);
        self.entries.insert(
            ip,
            ArpEntry {
                ip,
                mac: Some(mac),
                state: ArpEntryState::Reachable,
                created_at,
                updated_at: now,
            },
        );
    }

    /// Mark an address as resolution-in-flight.
    ///
    /// A fresh confirmed entry is left alone; a request round must not
    /// clobber a mapping that arrives concurrently.
    pub fn set_incomplete(&mut self, ip: Ipv4Addr, now: SimTime) {
        if matches!(
            self.entries.get(&ip),
            Some(ArpEntry {
                state: ArpEntryState::Reachable,
                ..
            })
        ) {
            return;
        }
        if !self.entries.contains_key(&ip) && self.entries.len() >= self.config.max_entries {
            self.evict_oldest();
        }
        let created_at = self.entries.get(&ip).map_or(now, |e| e.created_at);
        self.entries.insert(
            ip,
            ArpEntry {
                ip,
                mac: None,
                state: ArpEntryState::Incomplete,
                created_at,
                updated_at: now,
            },
        );
    }

    /// Drop a single entry.
    pub fn remove(&mut self, ip: Ipv4Addr) -> Option<ArpEntry> {
        self.entries.remove(&ip)
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Sweep out every entry past its lifetime.
    pub fn purge_expired(&mut self, now: SimTime) {
        let timeout = self.config.timeout_ms;
        let incomplete_timeout = self.config.incomplete_timeout_ms;
        self.entries.retain(|_, entry| {
            let age = now.saturating_sub(entry.updated_at);
            match entry.state {
                ArpEntryState::Incomplete => age <= incomplete_timeout,
                _ => age <= timeout,
            }
        });
    }

    /// Snapshot of all entries, in no particular order.
    pub fn entries(&self) -> impl Iterator<Item = &ArpEntry> {
        self.entries.values()
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self
            .entries
            .values()
            .min_by_key(|e| e.updated_at)
            .map(|e| e.ip)
        {
            self.entries.remove(&oldest);
        }
    }
}

/// Tunables for the resolution handler.
#[derive(Debug, Clone, Copy)]
pub struct ArpHandlerConfig {
    /// How long to wait for a reply before retransmitting
    pub request_timeout_ms: u64,

    /// Total request broadcasts before giving up
    pub max_retries: u32,
}

impl Default for ArpHandlerConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 3_000,
            max_retries: 3,
        }
    }
}

/// Invoked exactly once with the outcome of a resolution.
pub type ResolveCallback = Box<dyn FnOnce(Result<MacAddress, ArpError>, &mut Simulation)>;

struct PendingResolve {
    attempts: u32,
    timer: Option<TimerId>,
    waiters: Vec<ResolveCallback>,
}

/// Per-interface ARP engine: answers requests for the interface's address,
/// learns from everything it sees, and resolves outbound addresses with
/// retransmission.
pub struct ArpHandler {
    nic: Weak<NetworkInterface>,
    ip: Cell<Ipv4Addr>,
    table: RefCell<ArpTable>,
    config: ArpHandlerConfig,
    pending: RefCell<HashMap<Ipv4Addr, PendingResolve>>,
}

impl ArpHandler {
    /// Create a handler bound to an interface and its configured address.
    pub fn new(nic: Weak<NetworkInterface>, ip: Ipv4Addr, config: ArpHandlerConfig) -> Rc<Self> {
        Rc::new(Self {
            nic,
            ip: Cell::new(ip),
            table: RefCell::new(ArpTable::new()),
            config,
            pending: RefCell::new(HashMap::new()),
        })
    }

    /// The protocol address this handler answers for.
    pub fn ip(&self) -> Ipv4Addr {
        self.ip.get()
    }

    /// Re-point the handler at a new address, keeping the cache.
    pub fn set_ip(&self, ip: Ipv4Addr) {
        self.ip.set(ip);
    }

    /// Direct access to the neighbor cache.
    pub fn table(&self) -> &RefCell<ArpTable> {
        &self.table
    }

    /// Number of resolutions currently in flight.
    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Resolve `target` to a hardware address, invoking `callback` when the
    /// outcome is known.
    ///
    /// A cache hit completes synchronously. A miss joins or starts an
    /// in-flight request; at most one request round runs per target no
    /// matter how many callers wait on it.
    pub fn resolve(
        self: &Rc<Self>,
        target: Ipv4Addr,
        sim: &mut Simulation,
        callback: ResolveCallback,
    ) {
        let now = sim.now();
        // The callback may re-enter this handler; the table borrow must be
        // released before it runs.
        let hit = self.table.borrow_mut().lookup(target, now);
        if let Some(mac) = hit {
            sim.trace(TraceEvent::ArpCacheHit {
                nic: self.label(),
                ip: target,
                mac,
            });
            callback(Ok(mac), sim);
            return;
        }
        sim.trace(TraceEvent::ArpCacheMiss {
            nic: self.label(),
            ip: target,
        });

        let mut pending = self.pending.borrow_mut();
        if let Some(entry) = pending.get_mut(&target) {
            entry.waiters.push(callback);
            return;
        }
        pending.insert(
            target,
            PendingResolve {
                attempts: 0,
                timer: None,
                waiters: vec![callback],
            },
        );
        drop(pending);
        self.send_request_round(target, sim);
    }

    /// Process an inbound ARP packet: learn the sender mapping, answer
    /// requests for our address, and complete any matching resolution.
    pub fn handle_arp_packet(&self, packet: &ArpPacket, sim: &mut Simulation) {
        let now = sim.now();
        self.table
            .borrow_mut()
            .update(packet.sender_ip, packet.sender_mac, now);
        sim.trace(TraceEvent::ArpLearned {
            nic: self.label(),
            ip: packet.sender_ip,
            mac: packet.sender_mac,
        });

        match packet.operation {
            ArpOperation::Request => {
                if packet.target_ip == self.ip.get() {
                    if let Some(nic) = self.nic.upgrade() {
                        sim.trace(TraceEvent::ArpReplySent {
                            nic: self.label(),
                            target: packet.sender_ip,
                        });
                        let reply = ArpPacket::reply(nic.mac(), self.ip.get(), packet);
                        nic.send_frame(
                            packet.sender_mac,
                            EtherType::Arp,
                            FramePayload::Arp(reply),
                            sim,
                        );
                    }
                }
            }
            ArpOperation::Reply => {
                self.complete(packet.sender_ip, packet.sender_mac, sim);
            }
        }
    }

    /// Cancel every in-flight resolution and empty the cache. Waiters are
    /// failed with [`ArpError::HandlerShutdown`].
    pub fn cleanup(&self, sim: &mut Simulation) {
        let pending: Vec<(Ipv4Addr, PendingResolve)> =
            self.pending.borrow_mut().drain().collect();
        for (ip, entry) in pending {
            if let Some(timer) = entry.timer {
                sim.cancel(timer);
            }
            for waiter in entry.waiters {
                waiter(Err(ArpError::HandlerShutdown), sim);
            }
            self.table.borrow_mut().remove(ip);
        }
        self.table.borrow_mut().clear();
    }

    fn send_request_round(self: &Rc<Self>, target: Ipv4Addr, sim: &mut Simulation) {
        let attempt = {
            let mut pending = self.pending.borrow_mut();
            let Some(entry) = pending.get_mut(&target) else {
                return;
            };
            if entry.attempts >= self.config.max_retries {
                drop(pending);
                self.fail(target, sim);
                return;
            }
            entry.attempts += 1;
            entry.attempts
        };

        let Some(nic) = self.nic.upgrade() else {
            self.fail(target, sim);
            return;
        };

        let now = sim.now();
        self.table.borrow_mut().set_incomplete(target, now);
        sim.trace(TraceEvent::ArpRequestSent {
            nic: self.label(),
            target,
            attempt,
        });

        let request = ArpPacket::request(nic.mac(), self.ip.get(), target);
        nic.send_frame(
            MacAddress::BROADCAST,
            EtherType::Arp,
            FramePayload::Arp(request),
            sim,
        );

        let weak = Rc::downgrade(self);
        let timer = sim.schedule_in(self.config.request_timeout_ms, move |sim| {
            if let Some(handler) = weak.upgrade() {
                handler.send_request_round(target, sim);
            }
        });
        if let Some(entry) = self.pending.borrow_mut().get_mut(&target) {
            entry.timer = Some(timer);
        } else {
            sim.cancel(timer);
        }
    }

    fn complete(&self, ip: Ipv4Addr, mac: MacAddress, sim: &mut Simulation) {
        let Some(entry) = self.pending.borrow_mut().remove(&ip) else {
            return;
        };
        if let Some(timer) = entry.timer {
            sim.cancel(timer);
        }
        sim.trace(TraceEvent::ArpResolved {
            nic: self.label(),
            ip,
            mac,
        });
        for waiter in entry.waiters {
            waiter(Ok(mac), sim);
        }
    }

    fn fail(&self, ip: Ipv4Addr, sim: &mut Simulation) {
        let Some(entry) = self.pending.borrow_mut().remove(&ip) else {
            return;
        };
        if let Some(timer) = entry.timer {
            sim.cancel(timer);
        }
        self.table.borrow_mut().remove(ip);
        sim.trace(TraceEvent::ArpFailed {
            nic: self.label(),
            ip,
            attempts: entry.attempts,
        });
        for waiter in entry.waiters {
            waiter(
                Err(ArpError::ResolutionFailed {
                    target: ip,
                    attempts: entry.attempts,
                }),
                sim,
            );
        }
    }

    fn label(&self) -> MacAddress {
        self.nic
            .upgrade()
            .map_or(MacAddress::UNSPECIFIED, |nic| nic.mac())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x02, 0, 0, 0, 0, last])
    }

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    #[test]
    fn test_table_update_then_lookup() {
        let mut table = ArpTable::new();
        table.update(ip(1), mac(1), 100);
        assert_eq!(table.lookup(ip(1), 200), Some(mac(1)));
        assert_eq!(table.lookup(ip(2), 200), None);
    }

    #[test]
    fn test_table_incomplete_is_a_miss() {
        let mut table = ArpTable::new();
        table.set_incomplete(ip(1), 0);
        assert_eq!(table.lookup(ip(1), 10), None);
        assert_eq!(table.entry(ip(1)).unwrap().state, ArpEntryState::Incomplete);
        assert_eq!(table.entry(ip(1)).unwrap().mac, None);
    }

    #[test]
    fn test_table_incomplete_expires() {
        let mut table = ArpTable::new();
        table.set_incomplete(ip(1), 0);
        assert_eq!(table.lookup(ip(1), 5_000), None);
        assert!(table.entry(ip(1)).is_none());
    }

    #[test]
    fn test_table_set_incomplete_keeps_fresh_mapping() {
        let mut table = ArpTable::new();
        table.update(ip(1), mac(1), 0);
        table.set_incomplete(ip(1), 10);
        assert_eq!(table.lookup(ip(1), 20), Some(mac(1)));
    }

    #[test]
    fn test_table_entry_goes_stale_then_expires() {
        let mut table = ArpTable::new();
        table.update(ip(1), mac(1), 0);
        // inside freshness window
        assert_eq!(table.lookup(ip(1), 29_000), Some(mac(1)));
        // past stale_after, still cached but reported as a miss
        assert_eq!(table.lookup(ip(1), 31_000), None);
        assert_eq!(table.entry(ip(1)).unwrap().state, ArpEntryState::Stale);
        // past the hard timeout, gone
        assert_eq!(table.lookup(ip(1), 301_000), None);
        assert!(table.entry(ip(1)).is_none());
    }

    #[test]
    fn test_table_refresh_resets_staleness() {
        let mut table = ArpTable::new();
        table.update(ip(1), mac(1), 0);
        table.update(ip(1), mac(2), 31_000);
        assert_eq!(table.lookup(ip(1), 32_000), Some(mac(2)));
        assert_eq!(table.entry(ip(1)).unwrap().created_at, 0);
    }

    #[test]
    fn test_table_capacity_evicts_oldest() {
        let mut table = ArpTable::with_config(ArpTableConfig {
            max_entries: 2,
            ..ArpTableConfig::default()
        });
        table.update(ip(1), mac(1), 100);
        table.update(ip(2), mac(2), 200);
        table.update(ip(3), mac(3), 300);
        assert_eq!(table.len(), 2);
        assert!(table.entry(ip(1)).is_none(), "oldest entry must go first");
        assert!(table.entry(ip(2)).is_some());
        assert!(table.entry(ip(3)).is_some());
    }

    #[test]
    fn test_table_purge_expired() {
        let mut table = ArpTable::new();
        table.update(ip(1), mac(1), 0);
        table.update(ip(2), mac(2), 200_000);
        table.set_incomplete(ip(3), 299_000);
        table.purge_expired(301_000);
        assert!(table.entry(ip(1)).is_none());
        assert!(table.entry(ip(2)).is_some());
        assert!(table.entry(ip(3)).is_some());
    }

    #[test]
    fn test_packet_builders() {
        let req = ArpPacket::request(mac(1), ip(1), ip(2));
        assert_eq!(req.operation, ArpOperation::Request);
        assert_eq!(req.target_mac, MacAddress::UNSPECIFIED);
        assert_eq!(
            req.to_string(),
            "ARP request: who has 10.0.0.2? tell 10.0.0.1"
        );

        let rep = ArpPacket::reply(mac(2), ip(2), &req);
        assert_eq!(rep.operation, ArpOperation::Reply);
        assert_eq!(rep.target_mac, mac(1));
        assert_eq!(rep.target_ip, ip(1));
        assert_eq!(rep.to_string(), "ARP reply: 10.0.0.2 is at 02:00:00:00:00:02");
    }
}
